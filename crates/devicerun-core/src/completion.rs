//! Waiting for the on-device run to finish.
//!
//! Two interchangeable policies exist. Apps that expose no queryable status
//! get a [`CompletionPolicy::FixedDelay`]; apps with a status field are polled
//! with [`CompletionPolicy::Poll`]. The orchestrator picks one per platform at
//! construction time and only ever calls [`CompletionPolicy::wait`].

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::driver::{DeviceClient, DriverError, Selector};
use crate::platform::Platform;
use crate::status::RunStatus;

/// Default fixed delay for apps without a status field.
pub const DEFAULT_FIXED_DELAY: Duration = Duration::from_secs(10);

/// Default interval between status reads.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default accessibility id of the status field.
pub const DEFAULT_STATUS_FIELD: &str = "statusField";

#[derive(Error, Debug)]
pub enum CompletionError {
    /// The app reported a failed or never-started run.
    #[error("internal error during app run: status {status} after {reads} read(s)")]
    AppFailure { status: RunStatus, reads: u32 },

    /// The status never reached a terminal value within the poll timeout.
    #[error("run still '{last_status}' after {elapsed:?}")]
    Timeout { elapsed: Duration, last_status: RunStatus },

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// How the orchestrator waits for the device run to finish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionPolicy {
    /// Sleep for a constant duration and proceed unconditionally.
    FixedDelay(Duration),
    /// Read the status field every `interval` until it reads `Done`.
    Poll {
        status_field: Selector,
        interval: Duration,
        /// `None` polls for as long as the app reports `Running`.
        timeout: Option<Duration>,
    },
}

/// Result of a completed wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Final status read, `None` under a fixed delay.
    pub status: Option<RunStatus>,
    /// Number of status reads performed.
    pub reads: u32,
    pub waited: Duration,
}

impl CompletionPolicy {
    /// The default policy for a platform.
    ///
    /// The Android test app has no status field; the iOS app does.
    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::Android => CompletionPolicy::FixedDelay(DEFAULT_FIXED_DELAY),
            Platform::Ios => CompletionPolicy::poll(DEFAULT_STATUS_FIELD),
        }
    }

    /// A poll policy with the default interval and no timeout.
    pub fn poll(status_field: impl Into<String>) -> Self {
        CompletionPolicy::Poll {
            status_field: Selector::accessibility_id(status_field),
            interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CompletionPolicy::FixedDelay(_) => "fixed_delay",
            CompletionPolicy::Poll { .. } => "poll",
        }
    }

    /// Block until the run is complete according to this policy.
    pub async fn wait(&self, client: &dyn DeviceClient) -> Result<Completion, CompletionError> {
        let start = Instant::now();
        match self {
            CompletionPolicy::FixedDelay(delay) => {
                info!(delay_ms = delay.as_millis() as u64, "waiting fixed delay for run to finish");
                tokio::time::sleep(*delay).await;
                Ok(Completion {
                    status: None,
                    reads: 0,
                    waited: start.elapsed(),
                })
            }
            CompletionPolicy::Poll {
                status_field,
                interval,
                timeout,
            } => poll_status(client, status_field, *interval, *timeout, start).await,
        }
    }
}

async fn poll_status(
    client: &dyn DeviceClient,
    status_field: &Selector,
    interval: Duration,
    timeout: Option<Duration>,
    start: Instant,
) -> Result<Completion, CompletionError> {
    let mut reads = 0u32;
    loop {
        let element = client.find_element(status_field).await?;
        let text = client.element_text(&element).await?;
        reads += 1;
        let status = RunStatus::parse(&text);
        debug!(reads, status = %status, "status read");

        if status.is_done() {
            info!(reads, "run succeeded");
            return Ok(Completion {
                status: Some(status),
                reads,
                waited: start.elapsed(),
            });
        }
        if status.is_failure() {
            warn!(reads, status = %status, "app reported run failure");
            return Err(CompletionError::AppFailure { status, reads });
        }

        if let Some(limit) = timeout {
            let elapsed = start.elapsed();
            if elapsed >= limit {
                warn!(elapsed_ms = elapsed.as_millis() as u64, status = %status, "poll timeout");
                return Err(CompletionError::Timeout {
                    elapsed,
                    last_status: status,
                });
            }
        }

        if let RunStatus::Unknown(ref text) = status {
            debug!(text = %text, "unrecognised status, treating as running");
        }
        info!(interval_ms = interval.as_millis() as u64, "still running");
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_defaults() {
        assert_eq!(
            CompletionPolicy::for_platform(Platform::Android),
            CompletionPolicy::FixedDelay(Duration::from_secs(10))
        );
        match CompletionPolicy::for_platform(Platform::Ios) {
            CompletionPolicy::Poll {
                status_field,
                interval,
                timeout,
            } => {
                assert_eq!(status_field, Selector::accessibility_id("statusField"));
                assert_eq!(interval, Duration::from_secs(1));
                assert!(timeout.is_none());
            }
            other => panic!("expected poll policy, got {:?}", other),
        }
    }

    #[test]
    fn test_policy_names() {
        assert_eq!(CompletionPolicy::FixedDelay(Duration::ZERO).name(), "fixed_delay");
        assert_eq!(CompletionPolicy::poll("s").name(), "poll");
    }

    #[test]
    fn test_app_failure_message() {
        let err = CompletionError::AppFailure {
            status: RunStatus::Error,
            reads: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("internal error"));
        assert!(msg.contains("Error"));
    }
}
