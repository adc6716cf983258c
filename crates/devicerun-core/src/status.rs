//! Run status reported by the application under test.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The app's self-reported state of its current inference run.
///
/// Read from the status text field. Text that does not match a known state is
/// preserved in [`RunStatus::Unknown`] so it can be reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    NotStarted,
    Running,
    Done,
    Error,
    Unknown(String),
}

impl RunStatus {
    /// Parse the status field text. Surrounding whitespace is ignored; the
    /// known values are case-sensitive, matching what the app writes.
    pub fn parse(text: &str) -> Self {
        match text.trim() {
            "NOT_STARTED" => RunStatus::NotStarted,
            "Running" => RunStatus::Running,
            "Done" => RunStatus::Done,
            "Error" => RunStatus::Error,
            other => RunStatus::Unknown(other.to_string()),
        }
    }

    /// Whether this status ends the run with a failure when seen mid-poll.
    ///
    /// A run that still reads `NOT_STARTED` after the start control was
    /// clicked never started, which the app reports the same way as an error.
    pub fn is_failure(&self) -> bool {
        matches!(self, RunStatus::Error | RunStatus::NotStarted)
    }

    pub fn is_done(&self) -> bool {
        matches!(self, RunStatus::Done)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::NotStarted => write!(f, "NOT_STARTED"),
            RunStatus::Running => write!(f, "Running"),
            RunStatus::Done => write!(f, "Done"),
            RunStatus::Error => write!(f, "Error"),
            RunStatus::Unknown(text) => write!(f, "{}", text),
        }
    }
}
