//! CLI for running a model on an Android or iOS device through an Appium
//! server.
//!
//! `run` stages the local data directory onto the test app, starts the run,
//! waits for it and prints the result blocks to stdout. `extract` recovers
//! the artifacts from a captured log afterwards.
//!
//! # Usage
//!
//! ```bash
//! # Run on Android with the defaults from ~/.devicerun/config.json
//! devicerun run --platform android --data-dir ./data --app ./app.apk > run.log
//!
//! # Run on iOS against a remote server, giving up after 10 minutes
//! devicerun run --platform ios --server http://mac-mini:4723 --poll-timeout 600 > run.log
//!
//! # Verbose logs to a file instead of stderr
//! RUST_LOG=devicerun_core=debug devicerun run --log-file run-debug.log > run.log
//!
//! # Recover model_outputs.msgpack and metrics.json from the captured log
//! devicerun extract run.log --out-dir results/
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use devicerun_core::appium::AppiumClient;
use devicerun_core::artifacts::{METRICS_FILE, MODEL_OUTPUT_FILE};
use devicerun_core::config::{ConfigError, RunConfig};
use devicerun_core::driver::DeviceClient;
use devicerun_core::harvest::{HarvestError, RunOutputs};
use devicerun_core::metrics::{MetricsError, PerfSummary};
use devicerun_core::orchestrator::{RunError, RunOrchestrator};
use devicerun_core::platform::Platform;
use devicerun_core::session::DeviceSession;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Run models on mobile devices through an Appium server.
#[derive(Parser)]
#[command(name = "devicerun")]
#[command(about = "Stage data onto a mobile test app, run it and collect the results")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the test app on a device and print its results to stdout
    Run(RunArgs),

    /// Recover the result artifacts from a captured run log
    Extract {
        /// Log file containing the run's stdout
        log: PathBuf,
        /// Directory to write model_outputs.msgpack and metrics.json into
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// JSON config file (defaults to ~/.devicerun/config.json when present)
    #[arg(short, long, env = "DEVICERUN_CONFIG")]
    config: Option<PathBuf>,

    /// Appium server URL
    #[arg(short, long, env = "DEVICERUN_SERVER")]
    server: Option<String>,

    /// Device platform (android or ios)
    #[arg(short, long, env = "DEVICERUN_PLATFORM")]
    platform: Option<Platform>,

    /// Local directory whose files are pushed to the device
    #[arg(short, long, env = "DEVICERUN_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Device data directory (`/path` or `@bundle.id:path`)
    #[arg(long)]
    remote_data_dir: Option<String>,

    /// iOS bundle id of the test app
    #[arg(long)]
    bundle_id: Option<String>,

    /// App package to install (.apk / .ipa)
    #[arg(long)]
    app: Option<PathBuf>,

    /// Give up polling the status field after this many seconds
    #[arg(long)]
    poll_timeout: Option<u64>,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl RunArgs {
    fn apply(&self, config: &mut RunConfig) {
        if let Some(server) = &self.server {
            config.server_url = server.clone();
        }
        if let Some(platform) = self.platform {
            config.platform = platform;
        }
        if let Some(dir) = &self.data_dir {
            config.local_data_dir = dir.clone();
        }
        if let Some(dir) = &self.remote_data_dir {
            config.remote_data_dir = Some(dir.clone());
        }
        if let Some(bundle_id) = &self.bundle_id {
            config.bundle_id = bundle_id.clone();
        }
        if let Some(app) = &self.app {
            config.app = Some(app.clone());
        }
        if let Some(secs) = self.poll_timeout {
            if !config.set_poll_timeout(Duration::from_secs(secs)) {
                warn!(
                    platform = %config.platform,
                    "--poll-timeout ignored: this run waits a fixed delay instead of polling"
                );
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_file = match &cli.command {
        Command::Run(args) => args.log_file.as_deref(),
        Command::Extract { .. } => None,
    };
    let _guard = match init_logging(log_file) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {}", e);
            return e.exit_code();
        }
    };

    let result = match cli.command {
        Command::Run(args) => run(args).await,
        Command::Extract { log, out_dir } => extract(&log, &out_dir),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

/// Logs go to stderr (or `log_file`); stdout is reserved for run output.
fn init_logging(log_file: Option<&Path>) -> Result<Option<WorkerGuard>, CliError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            let name = path
                .file_name()
                .ok_or_else(|| CliError::Io(std::io::Error::other(format!("invalid log file: {}", path.display()))))?;
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

async fn run(args: RunArgs) -> Result<(), CliError> {
    let mut config = RunConfig::load_or_default(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    info!(server = %config.server_url, platform = %config.platform, "connecting");
    let client = AppiumClient::connect(&config.server_url, config.capabilities())
        .await
        .map_err(RunError::Session)?;
    let client: Arc<dyn DeviceClient> = Arc::new(client);
    let platform = config.platform;

    let mut out = std::io::stdout().lock();
    let report = DeviceSession::scoped(client, platform, |session| async move {
        RunOrchestrator::new(session, config).run(&mut out).await
    })
    .await?;

    info!(
        session_id = %report.session_id,
        remote = %report.remote_data_dir,
        files = report.staging.files.len(),
        failed = report.staging.failed().count(),
        bytes = report.staging.total_bytes(),
        model_output_bytes = report.model_output_bytes,
        metrics_bytes = report.metrics_bytes,
        elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
        "run finished"
    );
    Ok(())
}

fn extract(log: &Path, out_dir: &Path) -> Result<(), CliError> {
    let text = std::fs::read_to_string(log)?;
    let outputs = RunOutputs::from_log(&text)?;

    std::fs::create_dir_all(out_dir)?;
    std::fs::write(out_dir.join(MODEL_OUTPUT_FILE), &outputs.model_output)?;
    std::fs::write(out_dir.join(METRICS_FILE), &outputs.metrics_text)?;
    info!(
        out_dir = %out_dir.display(),
        model_output_bytes = outputs.model_output.len(),
        "artifacts extracted"
    );

    let summary = PerfSummary::from_json(&outputs.metrics_text)?;
    let json = serde_json::to_string_pretty(&summary).map_err(MetricsError::Json)?;
    println!("{}", json);
    Ok(())
}

#[derive(Debug)]
enum CliError {
    Run(RunError),
    Config(ConfigError),
    Harvest(HarvestError),
    Metrics(MetricsError),
    Io(std::io::Error),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        let code = match self {
            CliError::Run(e) => e.exit_code(),
            CliError::Harvest(_) | CliError::Metrics(_) => 1,
            CliError::Config(_) | CliError::Io(_) => 5,
        };
        ExitCode::from(code as u8)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Run(e) => write!(f, "{}", e),
            CliError::Config(e) => write!(f, "{}", e),
            CliError::Harvest(e) => write!(f, "{}", e),
            CliError::Metrics(e) => write!(f, "{}", e),
            CliError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl From<RunError> for CliError {
    fn from(e: RunError) -> Self {
        CliError::Run(e)
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e)
    }
}

impl From<HarvestError> for CliError {
    fn from(e: HarvestError) -> Self {
        CliError::Harvest(e)
    }
}

impl From<MetricsError> for CliError {
    fn from(e: MetricsError) -> Self {
        CliError::Metrics(e)
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e)
    }
}
