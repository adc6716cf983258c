//! Recovering run results from captured logs.
//!
//! A device farm or local test runner captures the run's standard output into
//! a log alongside its own noise. This module finds the marker-delimited
//! blocks written by [`RunArtifacts::write_blocks`](crate::artifacts::RunArtifacts::write_blocks)
//! and decodes them back into bytes and JSON.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use thiserror::Error;

use crate::artifacts::{METRICS_OUTPUT_END, METRICS_OUTPUT_START, MODEL_OUTPUT_END, MODEL_OUTPUT_START};

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("no {0} block found in log")]
    MissingBlock(&'static str),

    #[error("expected exactly one {marker} block, found {count}")]
    DuplicateBlock { marker: &'static str, count: usize },

    #[error("model output block is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("metrics block is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Every block body found between `start` and `end` markers, in order.
///
/// Markers are matched as substrings so prefixed log lines still work. A start
/// marker without a matching end marker runs to the end of the log. Bodies are
/// trimmed of surrounding whitespace. An empty `start` marker matches nothing.
pub fn extract_blocks<'a>(log: &'a str, start: &str, end: &str) -> Vec<&'a str> {
    let mut blocks = Vec::new();
    if start.is_empty() {
        return blocks;
    }
    let mut cursor = 0;
    while let Some(found) = log[cursor..].find(start) {
        let body_start = cursor + found + start.len();
        let body_end = log[body_start..]
            .find(end)
            .map(|i| body_start + i)
            .unwrap_or(log.len());
        blocks.push(log[body_start..body_end].trim());
        cursor = (body_end + end.len()).min(log.len());
    }
    blocks
}

fn single_block<'a>(
    log: &'a str,
    start: &'static str,
    end: &'static str,
) -> Result<&'a str, HarvestError> {
    let blocks = extract_blocks(log, start, end);
    match blocks.len() {
        0 => Err(HarvestError::MissingBlock(start)),
        1 => Ok(blocks[0]),
        count => Err(HarvestError::DuplicateBlock { marker: start, count }),
    }
}

/// Decoded results of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutputs {
    /// Raw `model_outputs.msgpack` bytes.
    pub model_output: Vec<u8>,
    /// `metrics.json` text as captured.
    pub metrics_text: String,
    /// Parsed metrics.
    pub metrics: serde_json::Value,
}

impl RunOutputs {
    /// Parse a captured log that contains exactly one run's output.
    pub fn from_log(log: &str) -> Result<Self, HarvestError> {
        let model_b64 = single_block(log, MODEL_OUTPUT_START, MODEL_OUTPUT_END)?;
        let metrics_text = single_block(log, METRICS_OUTPUT_START, METRICS_OUTPUT_END)?;

        // Some log collectors hard-wrap long lines.
        let compact: String = model_b64.chars().filter(|c| !c.is_whitespace()).collect();
        let model_output = BASE64.decode(compact)?;
        let metrics = serde_json::from_str(metrics_text)?;

        Ok(Self {
            model_output,
            metrics_text: metrics_text.to_string(),
            metrics,
        })
    }
}
