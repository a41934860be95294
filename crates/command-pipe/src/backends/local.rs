//! Local process execution backend

use async_process::{Child, Stdio};
use async_trait::async_trait;
use futures_lite::io::{AsyncBufReadExt, BufReader};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::trace;

use crate::command::Command;
use crate::error::{Error, Result};
use crate::process::{ExitStatus, ForceExit, Launcher, ProcessHandle, Spawned};

/// Launcher for executing processes locally
///
/// Only stdout is piped. Stdin is closed and stderr is inherited from the
/// parent.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalLauncher;

/// A handle to await a local process
pub struct LocalProcessHandle {
    /// The underlying child process
    child: Child,
    /// Shared with the pipe's cancel handle
    kill_switch: Arc<PidKillSwitch>,
}

/// Kills a local process by pid until it has been reaped
///
/// The child is reaped inside `Child::status()`, and the switch is marked in
/// the same poll right after it returns. A `force_exit` racing from another
/// thread can only slip into that gap, which is far shorter than the kernel
/// takes to hand out the freed pid again.
#[derive(Debug)]
pub struct PidKillSwitch {
    pid: u32,
    reaped: AtomicBool,
}

impl Launcher for LocalLauncher {
    fn spawn(&self, command: &Command) -> Result<Spawned> {
        let mut async_cmd = command.prepare();

        async_cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            // async-process reaps children killed on drop in its background thread
            .kill_on_drop(true);

        let mut child = async_cmd
            .spawn()
            .map_err(|e| Error::spawn_failed(command.command_line(), e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::spawn_failed(command.command_line(), "stdout was not piped"))?;

        let pid = child.id();
        trace!(pid, command = %command.command_line(), "spawned local process");

        let handle = LocalProcessHandle {
            child,
            kill_switch: Arc::new(PidKillSwitch::new(pid)),
        };

        Ok(Spawned {
            lines: Box::pin(BufReader::new(stdout).lines()),
            handle: Box::new(handle),
        })
    }
}

#[async_trait]
impl ProcessHandle for LocalProcessHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.child.id())
    }

    async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.child.status().await;
        // Once status() returns the pid may be recycled, so stop signalling it
        self.kill_switch.mark_reaped();

        let status = status.map_err(|e| Error::wait_failed(e.to_string()))?;
        Ok(status.into())
    }

    fn force_exit(&self) -> Arc<dyn ForceExit> {
        self.kill_switch.clone()
    }
}

impl PidKillSwitch {
    /// Create a kill switch for a running process
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            reaped: AtomicBool::new(false),
        }
    }

    /// Record that the process has been waited on
    pub fn mark_reaped(&self) {
        self.reaped.store(true, Ordering::SeqCst);
    }

    /// Returns true once the process has been waited on
    pub fn is_reaped(&self) -> bool {
        self.reaped.load(Ordering::SeqCst)
    }
}

impl ForceExit for PidKillSwitch {
    fn force_exit(&self) -> Result<()> {
        if self.is_reaped() {
            return Ok(());
        }

        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            match signal::kill(Pid::from_raw(self.pid as i32), Signal::SIGKILL) {
                // Already gone
                Ok(()) | Err(Errno::ESRCH) => Ok(()),
                Err(e) => Err(e.into()),
            }
        }

        #[cfg(not(unix))]
        {
            // Dropping the child still kills it through kill_on_drop
            Err(Error::signal_failed(-1, "forced exit by pid requires Unix"))
        }
    }
}
