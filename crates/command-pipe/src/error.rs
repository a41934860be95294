//! Error types for pipe runs

use crate::process::ExitStatus;
use thiserror::Error;

/// Boxed error returned by custom aggregation functions
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Unified error type for pipe runs
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to spawn a process
    #[error("failed to spawn `{command}`: {reason}")]
    SpawnFailed {
        /// The command line that failed to start
        command: String,
        /// The reason for the spawn failure
        reason: String,
    },

    /// Reading a line from the child's stdout failed
    #[error("failed to read process output: {0}")]
    Read(#[source] std::io::Error),

    /// The exit status of the child could not be obtained
    #[error("failed to wait for process: {reason}")]
    Wait {
        /// The reason the wait failed
        reason: String,
    },

    /// The child exited unsuccessfully on its own
    #[error("process exited unsuccessfully: {status}")]
    Exited {
        /// The reported exit status
        status: ExitStatus,
    },

    /// The JSON aggregation buffer grew past its safety bound
    #[error("aggregation buffer exceeds {limit} lines")]
    AggregationOverflow {
        /// The bound that was exceeded
        limit: usize,
    },

    /// A custom aggregation function failed
    #[error("aggregation function failed: {0}")]
    Aggregation(#[source] BoxError),

    /// Failed to send signal to process
    #[error("failed to send signal {signal}: {reason}")]
    SignalFailed {
        /// The signal number that failed to send
        signal: i32,
        /// The reason for the signal failure
        reason: String,
    },

    /// Invalid pipe configuration
    #[error("invalid pipe configuration: {0}")]
    Config(#[from] serde_yaml::Error),

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Sending SIGKILL to the child failed
    #[cfg(unix)]
    #[error("failed to kill process: {0}")]
    Nix(#[from] nix::Error),
}

impl Error {
    /// Create a spawn failed error
    pub fn spawn_failed(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Create a wait error
    pub fn wait_failed(reason: impl Into<String>) -> Self {
        Self::Wait {
            reason: reason.into(),
        }
    }

    /// Create a signal failed error
    pub fn signal_failed(signal: i32, reason: impl Into<String>) -> Self {
        Self::SignalFailed {
            signal,
            reason: reason.into(),
        }
    }

    /// Returns true for errors raised by the aggregator, which always fail a run
    pub fn is_aggregation(&self) -> bool {
        matches!(self, Error::AggregationOverflow { .. } | Error::Aggregation(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
