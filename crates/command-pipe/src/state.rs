//! Run lifecycle and outcome reconciliation

use crate::error::Error;
use crate::process::ExitStatus;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Where a run is in its lifecycle
///
/// ```text
/// Idle -> Spawning -> Streaming -> Draining(cause) -> Done
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No run has been started
    Idle,
    /// The process is being spawned
    Spawning,
    /// Lines are being read
    Streaming,
    /// Reading stopped; waiting for the process to exit
    Draining(DrainCause),
    /// The outcome has been reported
    Done,
}

/// Why a run stopped reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainCause {
    /// The child closed its stdout
    EndOfStream,
    /// Reading stdout failed
    ReadError,
    /// The caller or the aggregator asked the run to stop
    Cancelled,
}

/// What a cancel request has to do to the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CancelAction {
    /// Stop reading and kill the process
    Terminate,
    /// Reading already stopped on its own; kill the process that is still running
    Kill,
    /// Nothing left to do
    Nothing,
}

impl RunState {
    /// Returns true if the stop was caused by a cancel request
    pub fn termination_requested(&self) -> bool {
        matches!(self, RunState::Draining(DrainCause::Cancelled))
    }

    /// Returns true between spawning and reporting the outcome
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RunState::Spawning | RunState::Streaming | RunState::Draining(_)
        )
    }

    /// Apply a cancel request
    ///
    /// Any cancel that arrives before the exit was confirmed counts as a
    /// requested termination. A read error recorded earlier still fails the
    /// run through [`RunOutcome::success`].
    pub(crate) fn request_cancel(&mut self) -> CancelAction {
        match *self {
            RunState::Streaming => {
                *self = RunState::Draining(DrainCause::Cancelled);
                CancelAction::Terminate
            }
            RunState::Draining(DrainCause::EndOfStream | DrainCause::ReadError) => {
                *self = RunState::Draining(DrainCause::Cancelled);
                CancelAction::Kill
            }
            RunState::Spawning => {
                *self = RunState::Done;
                CancelAction::Nothing
            }
            RunState::Idle | RunState::Draining(DrainCause::Cancelled) | RunState::Done => {
                CancelAction::Nothing
            }
        }
    }

    /// Leave `Streaming` because the stream ended on its own
    ///
    /// A cancellation that got in first keeps its cause.
    pub(crate) fn stream_finished(&mut self, cause: DrainCause) {
        if *self == RunState::Streaming {
            *self = RunState::Draining(cause);
        }
    }
}

/// Everything known about a finished run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The command line that ran
    pub command_line: String,
    /// Whether the caller or the aggregator stopped the run
    pub termination_requested: bool,
    /// Exit status, absent when waiting failed
    pub exit_status: Option<ExitStatus>,
    /// Failure while reading stdout before any cancellation
    pub read_error: Option<Arc<Error>>,
    /// Failure while waiting for the exit
    pub wait_error: Option<Arc<Error>>,
    /// Aggregation overflow or custom aggregator failure
    pub aggregation_error: Option<Arc<Error>>,
    /// When the process was spawned
    pub started_at: DateTime<Utc>,
    /// When the exit was confirmed
    pub finished_at: DateTime<Utc>,
}

impl RunOutcome {
    /// The value reported to `on_exit`
    ///
    /// A requested termination ignores the exit status; errors from reading,
    /// waiting or aggregating always fail the run.
    pub fn success(&self) -> bool {
        if self.aggregation_error.is_some()
            || self.read_error.is_some()
            || self.wait_error.is_some()
        {
            return false;
        }
        self.termination_requested || self.exit_status.is_some_and(|s| s.success())
    }

    /// All causes of failure, most fundamental first
    pub fn failures(&self) -> Vec<Arc<Error>> {
        let exit_error = match self.exit_status {
            Some(status) if !status.success() && !self.termination_requested => {
                Some(Arc::new(Error::Exited { status }))
            }
            _ => None,
        };

        [
            self.aggregation_error.clone(),
            self.read_error.clone(),
            exit_error,
            self.wait_error.clone(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// How long the process ran
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}
