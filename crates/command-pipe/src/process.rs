//! Process facility traits and types
//!
//! A [`Launcher`] turns a [`Command`] into a [`Spawned`] process: a stream of
//! stdout lines plus a [`ProcessHandle`] to await its exit. Forced
//! termination goes through a separate [`ForceExit`] so that it can be
//! triggered synchronously while the handle is busy waiting.

use crate::command::Command;
use crate::error::Result;
use async_trait::async_trait;
use futures::stream::Stream;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

/// Stdout of a child, one item per line without the trailing newline
///
/// `None` is end-of-stream; an `Err` item is a read failure.
pub type LineStream = Pin<Box<dyn Stream<Item = std::io::Result<String>> + Send>>;

/// Spawns processes for a pipe
pub trait Launcher: Send + Sync + 'static {
    /// Start `command` with a piped stdout
    ///
    /// Spawning is synchronous so that failures surface directly from
    /// `Pipe::start`.
    fn spawn(&self, command: &Command) -> Result<Spawned>;
}

/// A freshly spawned process
pub struct Spawned {
    /// Lines read from the child's stdout
    pub lines: LineStream,
    /// Control handle used to await the exit
    pub handle: Box<dyn ProcessHandle>,
}

/// A handle to await a running process
#[async_trait]
pub trait ProcessHandle: Send {
    /// Get the process ID
    fn pid(&self) -> Option<u32>;

    /// Wait for the process to complete and return its exit status
    async fn wait(&mut self) -> Result<ExitStatus>;

    /// Get a switch that kills the process without borrowing the handle
    fn force_exit(&self) -> Arc<dyn ForceExit>;
}

/// Immediate forced termination of a single process
pub trait ForceExit: Send + Sync {
    /// Kill the process (SIGKILL or equivalent)
    ///
    /// Must be a no-op once the process has been reaped.
    fn force_exit(&self) -> Result<()>;
}

/// Process exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code if the process exited normally
    pub code: Option<i32>,
    /// Signal that terminated the process (Unix only)
    #[cfg(unix)]
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Status of a process that exited normally with `code`
    pub fn from_code(code: i32) -> Self {
        Self {
            code: Some(code),
            #[cfg(unix)]
            signal: None,
        }
    }

    /// Status of a process that was terminated by `signal`
    #[cfg(unix)]
    pub fn from_signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    /// Returns true if the process exited successfully (code 0)
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Returns true if the process was terminated by a signal
    pub fn terminated_by_signal(&self) -> bool {
        #[cfg(unix)]
        {
            self.signal.is_some()
        }
        #[cfg(not(unix))]
        {
            false
        }
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
            #[cfg(unix)]
            signal: {
                use std::os::unix::process::ExitStatusExt;
                status.signal()
            },
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[cfg(unix)]
        {
            if let Some(signal) = self.signal {
                return write!(f, "terminated by signal {}", signal);
            }
        }
        match self.code {
            Some(code) => write!(f, "exit code {}", code),
            None => write!(f, "unknown exit status"),
        }
    }
}
