//! Error types for the provisioning gateway.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by a [`Runner`](crate::Runner) invocation.
///
/// Serialized with a `kind` tag so callers can tell a timeout from a
/// runner-reported failure without parsing the message.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RunnerError {
    /// The runner completed and reported a failure.
    #[error("runner failed: {message}")]
    Failed {
        /// Failure text reported by the runner.
        message: String,
        /// Process exit code, when the runner exited normally.
        exit_code: Option<i32>,
    },

    /// The run did not finish within its deadline and was killed.
    #[error("runner timed out after {seconds}s")]
    TimedOut {
        /// The deadline that expired.
        seconds: u64,
    },

    /// The run was cancelled by the caller and was killed.
    #[error("runner cancelled")]
    Cancelled,

    /// The runner process could not be started.
    #[error("failed to start runner: {0}")]
    Spawn(String),

    /// The runner exited successfully but its output could not be parsed.
    #[error("invalid runner output: {0}")]
    InvalidOutput(String),
}

impl RunnerError {
    /// Check if a later attempt could succeed without operator action.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::TimedOut { .. } | Self::Failed { .. })
    }
}

/// A specialized Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_kind_separates_timeout_from_failure() {
        let timed_out = serde_json::to_value(RunnerError::TimedOut { seconds: 30 }).unwrap();
        assert_eq!(timed_out["kind"], "timed_out");
        assert_eq!(timed_out["detail"]["seconds"], 30);

        let failed = serde_json::to_value(RunnerError::Failed {
            message: "unreachable".to_string(),
            exit_code: Some(4),
        })
        .unwrap();
        assert_eq!(failed["kind"], "failed");

        let spawn = RunnerError::Spawn("no such file".to_string());
        let round: RunnerError =
            serde_json::from_value(serde_json::to_value(&spawn).unwrap()).unwrap();
        assert_eq!(round, spawn);
    }

    #[test]
    fn retriable_kinds() {
        assert!(RunnerError::TimedOut { seconds: 1 }.is_retriable());
        assert!(!RunnerError::Cancelled.is_retriable());
        assert!(!RunnerError::Spawn(String::new()).is_retriable());
    }
}
