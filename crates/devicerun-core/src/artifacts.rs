//! Result artifacts and the stdout output contract.
//!
//! After a successful run the app leaves two files in its data directory.
//! They are pulled back and written to standard output between literal marker
//! lines, which is the only machine-readable interface for whatever captures
//! the run's logs (see [`crate::harvest`] for the reading side).

use std::io::{self, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{debug, info};

use crate::driver::{DeviceClient, DriverError};
use crate::platform::RemoteDataDir;

pub const MODEL_OUTPUT_FILE: &str = "model_outputs.msgpack";
pub const METRICS_FILE: &str = "metrics.json";

pub const MODEL_OUTPUT_START: &str = "MODEL_OUTPUT_START";
pub const MODEL_OUTPUT_END: &str = "MODEL_OUTPUT_END";
pub const METRICS_OUTPUT_START: &str = "METRICS_OUTPUT_START";
pub const METRICS_OUTPUT_END: &str = "METRICS_OUTPUT_END";

/// The two files produced by a successful device run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunArtifacts {
    /// Raw `model_outputs.msgpack` bytes.
    pub model_output: Vec<u8>,
    /// Raw `metrics.json` bytes.
    pub metrics: Vec<u8>,
}

impl RunArtifacts {
    /// Pull both result files from `remote`.
    ///
    /// Both pulls finish before anything is returned, so a missing second file
    /// means nothing gets emitted.
    pub async fn retrieve(
        client: &dyn DeviceClient,
        remote: &RemoteDataDir,
    ) -> Result<Self, DriverError> {
        let model_path = remote.join(MODEL_OUTPUT_FILE);
        debug!(remote = %model_path, "pulling model outputs");
        let model_output = client.pull_file(&model_path).await?;

        let metrics_path = remote.join(METRICS_FILE);
        debug!(remote = %metrics_path, "pulling metrics");
        let metrics = client.pull_file(&metrics_path).await?;

        info!(
            model_bytes = model_output.len(),
            metrics_bytes = metrics.len(),
            "artifacts retrieved"
        );
        Ok(Self {
            model_output,
            metrics,
        })
    }

    /// Base64 text of the model output.
    pub fn model_output_base64(&self) -> String {
        BASE64.encode(&self.model_output)
    }

    /// Metrics as text. Invalid UTF-8 is replaced rather than rejected.
    pub fn metrics_text(&self) -> String {
        String::from_utf8_lossy(&self.metrics).into_owned()
    }

    /// Write both marker-delimited blocks to `out`.
    pub fn write_blocks<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "{}", MODEL_OUTPUT_START)?;
        writeln!(out, "{}", self.model_output_base64())?;
        writeln!(out, "{}", MODEL_OUTPUT_END)?;

        writeln!(out, "{}", METRICS_OUTPUT_START)?;
        let metrics = self.metrics_text();
        out.write_all(metrics.as_bytes())?;
        if !metrics.ends_with('\n') {
            writeln!(out)?;
        }
        writeln!(out, "{}", METRICS_OUTPUT_END)?;
        out.flush()
    }
}
