//! Run orchestration against one device session.
//!
//! The [`RunOrchestrator`] drives a single run as a linear sequence:
//!
//! 1. prepare the device and resolve the remote data directory
//! 2. stage every local data file onto the device (best-effort)
//! 3. click the app's start control
//! 4. wait for completion using the configured [`CompletionPolicy`]
//! 5. pull both result artifacts, then write them to the output
//!
//! The session is closed after the sequence on every path, success or
//! failure.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use devicerun_core::appium::AppiumClient;
//! use devicerun_core::config::RunConfig;
//! use devicerun_core::orchestrator::RunOrchestrator;
//! use devicerun_core::session::DeviceSession;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RunConfig::default();
//!     let client = AppiumClient::connect(&config.server_url, config.capabilities())
//!         .await
//!         .expect("no session");
//!     let session = DeviceSession::start(Arc::new(client), config.platform).await;
//!
//!     let report = RunOrchestrator::new(session, config)
//!         .run(&mut std::io::stdout())
//!         .await
//!         .expect("run failed");
//!     eprintln!("staged {} files", report.staging.files.len());
//! }
//! ```

use std::io::Write;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::artifacts::RunArtifacts;
use crate::completion::{Completion, CompletionError, CompletionPolicy};
use crate::config::{ConfigError, RunConfig};
use crate::driver::{AndroidKey, DeviceClient, DriverError, Selector};
use crate::platform::{Platform, RemoteDataDir};
use crate::session::DeviceSession;
use crate::staging::{stage_files, StagingError, StagingReport};
use crate::status::RunStatus;

/// Class of the Android all-files-access permission switch.
const PERMISSION_SWITCH_CLASS: &str = "android.widget.Switch";

/// Errors that end a run.
#[derive(Error, Debug)]
pub enum RunError {
    /// No session could be created on the automation server.
    #[error("device session could not be established: {0}")]
    Session(#[source] DriverError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("staging failed: {0}")]
    Staging(#[from] StagingError),

    /// The app reported `Error`, or never left `NOT_STARTED`.
    #[error("internal error during app run: status '{status}' after {reads} status read(s)")]
    AppFailure { status: RunStatus, reads: u32 },

    #[error("run did not finish within {elapsed:?} (last status '{last_status}')")]
    PollTimeout { elapsed: Duration, last_status: RunStatus },

    /// A result artifact could not be pulled from the device.
    #[error("failed to retrieve result artifacts: {0}")]
    Retrieval(#[source] DriverError),

    #[error("{step} failed: {source}")]
    Driver {
        step: &'static str,
        #[source]
        source: DriverError,
    },

    #[error("failed to write run output: {0}")]
    Output(#[from] std::io::Error),
}

impl RunError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::AppFailure { .. } | RunError::PollTimeout { .. } => 1,
            RunError::Retrieval(_) => 2,
            RunError::Session(_) => 3,
            RunError::Driver { .. } => 4,
            RunError::Config(_) | RunError::Staging(_) | RunError::Output(_) => 5,
        }
    }

    fn driver(step: &'static str) -> impl FnOnce(DriverError) -> RunError {
        move |source| RunError::Driver { step, source }
    }
}

impl From<CompletionError> for RunError {
    fn from(err: CompletionError) -> Self {
        match err {
            CompletionError::AppFailure { status, reads } => RunError::AppFailure { status, reads },
            CompletionError::Timeout { elapsed, last_status } => {
                RunError::PollTimeout { elapsed, last_status }
            }
            CompletionError::Driver(source) => RunError::Driver {
                step: "status poll",
                source,
            },
        }
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub session_id: Uuid,
    pub platform: Platform,
    pub remote_data_dir: RemoteDataDir,
    pub staging: StagingReport,
    pub completion: Completion,
    pub model_output_bytes: usize,
    pub metrics_bytes: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Drives one complete run against one device session.
pub struct RunOrchestrator {
    session: DeviceSession,
    config: RunConfig,
    policy: CompletionPolicy,
}

impl RunOrchestrator {
    /// Create an orchestrator; the completion policy comes from the config
    /// (or the platform default).
    pub fn new(session: DeviceSession, config: RunConfig) -> Self {
        let policy = config.completion_policy();
        Self {
            session,
            config,
            policy,
        }
    }

    /// Replace the completion policy.
    pub fn with_policy(mut self, policy: CompletionPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn client(&self) -> &dyn DeviceClient {
        self.session.client()
    }

    /// Run the whole sequence and write the output blocks to `out`.
    ///
    /// The session is closed before returning, whatever the result.
    pub async fn run<W: Write>(self, out: &mut W) -> Result<RunReport, RunError> {
        let span = info_span!(
            "run",
            session_id = %self.session.id,
            platform = %self.session.platform,
            policy = self.policy.name()
        );
        async {
            let result = self.run_steps(out).await;
            if let Err(ref e) = result {
                warn!(error = %e, "run failed");
            }
            self.session.close().await;
            result
        }
        .instrument(span)
        .await
    }

    async fn run_steps<W: Write>(&self, out: &mut W) -> Result<RunReport, RunError> {
        let started_at = Utc::now();

        let remote = self.prepare().await?;
        let staging = self.stage(&remote).await?;
        self.trigger().await?;
        let completion = self.await_completion().await?;
        let artifacts = self.retrieve(&remote).await?;
        artifacts.write_blocks(out)?;

        info!(
            staged = staging.pushed().count(),
            failed = staging.failed().count(),
            "run complete"
        );
        Ok(RunReport {
            session_id: self.session.id,
            platform: self.session.platform,
            remote_data_dir: remote,
            staging,
            completion,
            model_output_bytes: artifacts.model_output.len(),
            metrics_bytes: artifacts.metrics.len(),
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Prepare the device and resolve where data files go.
    ///
    /// On Android this grants all-files access (when enabled) and reads the
    /// data directory the app displays, unless one is configured.
    pub async fn prepare(&self) -> Result<RemoteDataDir, RunError> {
        if self.session.platform == Platform::Android && self.config.grant_file_access {
            self.grant_file_access().await?;
        }

        let remote = match self.config.static_remote_data_dir() {
            Some(dir) => dir,
            None => {
                let field = Selector::accessibility_id(self.config.data_dir_field.clone());
                let element = self
                    .client()
                    .find_element(&field)
                    .await
                    .map_err(RunError::driver("read data directory"))?;
                let text = self
                    .client()
                    .element_text(&element)
                    .await
                    .map_err(RunError::driver("read data directory"))?;
                if text.trim().is_empty() {
                    return Err(RunError::Driver {
                        step: "read data directory",
                        source: DriverError::CommandFailed("app shows an empty data directory".into()),
                    });
                }
                RemoteDataDir::path(text.trim())
            }
        };
        info!(
            local = %self.config.local_data_dir.display(),
            remote = %remote,
            "data directories resolved"
        );
        Ok(remote)
    }

    async fn grant_file_access(&self) -> Result<(), RunError> {
        let step = "grant file access";
        let switch = self
            .client()
            .find_element(&Selector::class_name(PERMISSION_SWITCH_CLASS))
            .await
            .map_err(RunError::driver(step))?;
        self.client().click(&switch).await.map_err(RunError::driver(step))?;
        tokio::time::sleep(Duration::from_millis(self.config.permission_settle_ms)).await;
        self.client()
            .label("Allow All File Access")
            .await
            .map_err(RunError::driver(step))?;
        self.client()
            .press_key(AndroidKey::Back)
            .await
            .map_err(RunError::driver(step))?;
        Ok(())
    }

    /// Push the local data directory to `remote`.
    pub async fn stage(&self, remote: &RemoteDataDir) -> Result<StagingReport, RunError> {
        Ok(stage_files(self.client(), &self.config.local_data_dir, remote).await?)
    }

    /// Click the app's start control.
    pub async fn trigger(&self) -> Result<(), RunError> {
        let step = "trigger run";
        let start = self.config.start_control();
        let button = self
            .client()
            .find_element(&start)
            .await
            .map_err(RunError::driver(step))?;
        self.client().click(&button).await.map_err(RunError::driver(step))?;
        self.client()
            .label("Make Inference Calls")
            .await
            .map_err(RunError::driver(step))?;
        info!(control = %start, "run triggered");
        Ok(())
    }

    pub async fn await_completion(&self) -> Result<Completion, RunError> {
        Ok(self.policy.wait(self.client()).await?)
    }

    /// Pull both artifacts. Nothing is returned unless both arrive.
    pub async fn retrieve(&self, remote: &RemoteDataDir) -> Result<RunArtifacts, RunError> {
        RunArtifacts::retrieve(self.client(), remote)
            .await
            .map_err(RunError::Retrieval)
    }
}
