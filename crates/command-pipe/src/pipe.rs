//! The pipe runner
//!
//! A [`Pipe`] runs one command at a time. Each [`Pipe::start`] spawns the
//! process and hands a task to the spawner that reads stdout, aggregates
//! lines, waits for the exit and reports the outcome exactly once.

use crate::aggregate::{Aggregator, Record};
use crate::backends::LocalLauncher;
use crate::command::Command;
use crate::config::PipeConfig;
use crate::error::{Error, Result};
use crate::process::{ForceExit, Launcher, ProcessHandle, Spawned};
use crate::reader::{LineReader, ReadEnd};
use crate::state::{CancelAction, DrainCause, RunOutcome, RunState};
use async_channel::Sender;
use async_runtime_compat::Spawner;
use chrono::{DateTime, Utc};
use std::ffi::OsStr;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A restartable runner for one command
///
/// ```no_run
/// use command_pipe::{AggType, Pipe, PipeConfig};
///
/// let mut pipe = Pipe::new("bash", ["-c", "while sleep 1; do echo looping; done"]);
/// pipe.configure(PipeConfig::default().agg_type(AggType::Lines).keep(10));
///
/// let cancel = pipe
///     .start(|batch| println!("{:?}", batch), |ok| println!("ok={}", ok))
///     .expect("bash is installed");
/// // ... some time later. Always cancel, or the child outlives its use.
/// cancel.cancel();
/// ```
pub struct Pipe {
    command: Command,
    command_line: String,
    config: PipeConfig,
    launcher: Arc<dyn Launcher>,
    spawner: Arc<dyn Spawner>,
    shared: Arc<Mutex<Shared>>,
    active: Option<CancelHandle>,
}

/// State written by runs and read through the accessors
#[derive(Default)]
struct Shared {
    /// Bumped per start; writes from older runs are dropped
    generation: u64,
    line: String,
    last_error: Option<Arc<Error>>,
    last_outcome: Option<RunOutcome>,
}

/// Stops the run it was returned for
///
/// Cloneable and idempotent. Calling it after the run finished is harmless
/// and still kills a process that closed its stdout but kept running.
#[derive(Clone)]
pub struct CancelHandle {
    run: Arc<RunControl>,
}

struct RunControl {
    command_line: String,
    verbose: bool,
    cancel_tx: Sender<()>,
    inner: Mutex<ControlInner>,
}

struct ControlInner {
    state: RunState,
    pid: Option<u32>,
    kill: Option<Arc<dyn ForceExit>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn lifecycle(verbose: bool, command_line: &str, message: &str) {
    if verbose {
        info!(command = %command_line, "{}", message);
    } else {
        debug!(command = %command_line, "{}", message);
    }
}

impl Pipe {
    /// Create a pipe for `program` with `args`
    pub fn new<S, I, A>(program: S, args: I) -> Self
    where
        S: AsRef<OsStr>,
        I: IntoIterator<Item = A>,
        A: AsRef<OsStr>,
    {
        let mut command = Command::new(program);
        command.args(args);
        Self::from_command(command)
    }

    /// Create a pipe for a prepared command
    pub fn from_command(command: Command) -> Self {
        let spawner: Arc<dyn Spawner> = async_runtime_compat::current_runtime_spawner()
            .map(Arc::from)
            .unwrap_or_else(|| Arc::new(async_runtime_compat::smol::SmolSpawner) as Arc<dyn Spawner>);

        Self {
            command_line: command.command_line(),
            command,
            config: PipeConfig::default(),
            launcher: Arc::new(LocalLauncher),
            spawner,
            shared: Arc::new(Mutex::new(Shared::default())),
            active: None,
        }
    }

    /// Use a different process facility
    pub fn with_launcher<L: Launcher>(mut self, launcher: L) -> Self {
        self.launcher = Arc::new(launcher);
        self
    }

    /// Run the orchestrating tasks on a different runtime
    pub fn with_spawner<S: Spawner + 'static>(mut self, spawner: S) -> Self {
        self.spawner = Arc::new(spawner);
        self
    }

    /// Replace the whole configuration
    ///
    /// A run in progress keeps the configuration it was started with.
    pub fn configure(&mut self, config: PipeConfig) -> &mut Self {
        self.config = config;
        self
    }

    /// The current configuration
    pub fn config(&self) -> &PipeConfig {
        &self.config
    }

    /// The command this pipe runs
    pub fn command(&self) -> &Command {
        &self.command
    }

    /// Program and arguments joined by spaces
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// The last raw line read by the current run
    pub fn line(&self) -> String {
        lock(&self.shared).line.clone()
    }

    /// The most fundamental failure of the last finished run
    pub fn last_error(&self) -> Option<Arc<Error>> {
        lock(&self.shared).last_error.clone()
    }

    /// The outcome of the last finished run
    pub fn last_outcome(&self) -> Option<RunOutcome> {
        lock(&self.shared).last_outcome.clone()
    }

    /// State of the latest run, `Idle` if none was started
    pub fn state(&self) -> RunState {
        self.active
            .as_ref()
            .map(CancelHandle::state)
            .unwrap_or(RunState::Idle)
    }

    /// Returns true while the latest run has not reported its outcome
    pub fn is_running(&self) -> bool {
        self.state().is_active()
    }

    /// Start a new run, stopping the previous one first
    ///
    /// `on_result` receives every line, or every non-empty aggregator output,
    /// in order. `on_exit` is called exactly once after the last result. Only
    /// spawn failures are returned as errors; they call neither callback.
    pub fn start<R, X>(&mut self, on_result: R, on_exit: X) -> Result<CancelHandle>
    where
        R: FnMut(Record) + Send + 'static,
        X: FnOnce(bool) + Send + 'static,
    {
        self.stop();

        let generation = {
            let mut shared = lock(&self.shared);
            shared.generation += 1;
            shared.generation
        };

        let (cancel_tx, cancel_rx) = async_channel::bounded(1);
        let handle = CancelHandle {
            run: Arc::new(RunControl {
                command_line: self.command_line.clone(),
                verbose: self.config.verbose,
                cancel_tx,
                inner: Mutex::new(ControlInner {
                    state: RunState::Spawning,
                    pid: None,
                    kill: None,
                }),
            }),
        };
        self.active = Some(handle.clone());

        lifecycle(self.config.verbose, &self.command_line, "starting pipe");
        let Spawned {
            lines,
            handle: process,
        } = match self.launcher.spawn(&self.command) {
            Ok(spawned) => spawned,
            Err(e) => {
                handle.cancel();
                warn!(command = %self.command_line, error = %e, "pipe failed to start");
                return Err(e);
            }
        };

        handle.run.spawned(process.pid(), process.force_exit());

        let run = Run {
            control: handle.run.clone(),
            shared: self.shared.clone(),
            generation,
            aggregator: Aggregator::from_config(&self.config),
            read_timeout: self.config.read_timeout,
            started_at: Utc::now(),
            read_error: None,
            aggregation_error: None,
            on_result,
            on_exit,
        };
        let reader = LineReader::new(lines, cancel_rx);
        self.spawner.spawn(Box::pin(run.drive(reader, process)));

        Ok(handle)
    }

    /// Stop the current run, if any, and clear the transient state
    ///
    /// Returns without waiting; the stopped run still reports through its
    /// `on_exit` once the process is gone.
    pub fn stop(&mut self) {
        if let Some(active) = &self.active {
            active.cancel();
        }

        let mut shared = lock(&self.shared);
        shared.line.clear();
        shared.last_error = None;
        shared.last_outcome = None;
    }
}

impl std::fmt::Debug for Pipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipe")
            .field("command_line", &self.command_line)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl CancelHandle {
    /// Stop the run: stop reading and force the process to exit
    pub fn cancel(&self) {
        let run = &self.run;
        let mut inner = lock(&run.inner);

        match inner.state.request_cancel() {
            CancelAction::Terminate => {
                lifecycle(run.verbose, &run.command_line, "terminating pipe on request");
                run.cancel_tx.close();
                inner.force_exit(&run.command_line);
            }
            CancelAction::Kill => inner.force_exit(&run.command_line),
            CancelAction::Nothing => {}
        }
    }

    /// Current state of the run
    pub fn state(&self) -> RunState {
        lock(&self.run.inner).state
    }

    /// Process id of the run, once spawned
    pub fn pid(&self) -> Option<u32> {
        lock(&self.run.inner).pid
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("command_line", &self.run.command_line)
            .field("state", &self.state())
            .finish()
    }
}

impl ControlInner {
    fn force_exit(&self, command_line: &str) {
        if let Some(kill) = &self.kill {
            if let Err(e) = kill.force_exit() {
                warn!(command = %command_line, error = %e, "failed to kill pipe process");
            }
        }
    }
}

impl RunControl {
    fn spawned(&self, pid: Option<u32>, kill: Arc<dyn ForceExit>) {
        let mut inner = lock(&self.inner);
        inner.pid = pid;
        inner.kill = Some(kill);
        inner.state = RunState::Streaming;
    }

    fn stream_finished(&self, cause: DrainCause) {
        lock(&self.inner).state.stream_finished(cause);
    }

    /// Enter `Done`, returning whether termination had been requested
    fn finish(&self) -> bool {
        let mut inner = lock(&self.inner);
        let requested = inner.state.termination_requested();
        inner.state = RunState::Done;
        requested
    }
}

/// Everything the orchestrating task owns for one run
struct Run<R, X> {
    control: Arc<RunControl>,
    shared: Arc<Mutex<Shared>>,
    generation: u64,
    aggregator: Aggregator,
    read_timeout: Duration,
    started_at: DateTime<Utc>,
    read_error: Option<Arc<Error>>,
    aggregation_error: Option<Arc<Error>>,
    on_result: R,
    on_exit: X,
}

impl<R, X> Run<R, X>
where
    R: FnMut(Record) + Send + 'static,
    X: FnOnce(bool) + Send + 'static,
{
    async fn drive(mut self, mut reader: LineReader, mut process: Box<dyn ProcessHandle>) {
        let end = reader.run(|line| self.deliver(line)).await;
        match end {
            ReadEnd::EndOfStream => self.control.stream_finished(DrainCause::EndOfStream),
            ReadEnd::Failed(e) => {
                let e = Error::Read(e);
                warn!(command = %self.control.command_line, error = %e, "pipe read failed");
                self.read_error = Some(Arc::new(e));
                self.control.stream_finished(DrainCause::ReadError);
            }
            ReadEnd::Cancelled => {
                let timeout = self.read_timeout;
                let drained = reader.drain(timeout, |line| self.deliver(line)).await;
                if let ReadEnd::Failed(e) = drained {
                    debug!(
                        command = %self.control.command_line,
                        error = %e,
                        "ignoring read error after cancellation"
                    );
                }
            }
            // The aggregator failed and already cancelled the run
            ReadEnd::Stopped | ReadEnd::TimedOut => {}
        }
        // Close our end of stdout before waiting
        drop(reader);

        let status = process.wait().await;
        let termination_requested = self.control.finish();

        let (exit_status, wait_error) = match status {
            Ok(status) => (Some(status), None),
            Err(e) => (None, Some(Arc::new(e))),
        };

        let command_line = self.control.command_line.clone();
        let outcome = RunOutcome {
            command_line,
            termination_requested,
            exit_status,
            read_error: self.read_error.take(),
            wait_error,
            aggregation_error: self.aggregation_error.take(),
            started_at: self.started_at,
            finished_at: Utc::now(),
        };

        let success = outcome.success();
        if !termination_requested {
            // An unclean exit is expected when we killed the process
            for failure in outcome.failures() {
                if matches!(*failure, Error::Exited { .. } | Error::Wait { .. }) {
                    warn!(command = %outcome.command_line, error = %failure, "pipe process failed");
                }
            }
        } else if let Some(e) = &outcome.wait_error {
            warn!(command = %outcome.command_line, error = %e, "pipe process failed");
        }

        let verbose = self.control.verbose;
        if success {
            lifecycle(verbose, &outcome.command_line, "pipe finished");
        } else {
            lifecycle(verbose, &outcome.command_line, "pipe failed");
        }

        {
            let mut shared = lock(&self.shared);
            if shared.generation == self.generation {
                shared.last_error = outcome.failures().into_iter().next();
                shared.last_outcome = Some(outcome);
            }
        }

        (self.on_exit)(success);
    }

    fn deliver(&mut self, line: String) -> ControlFlow<()> {
        {
            let mut shared = lock(&self.shared);
            if shared.generation == self.generation {
                shared.line.clone_from(&line);
            }
        }

        match self.aggregator.push(line) {
            Ok(Some(record)) => {
                (self.on_result)(record);
                ControlFlow::Continue(())
            }
            Ok(None) => ControlFlow::Continue(()),
            Err(e) => {
                warn!(command = %self.control.command_line, error = %e, "pipe aggregation failed");
                self.aggregation_error = Some(Arc::new(e));
                CancelHandle {
                    run: self.control.clone(),
                }
                .cancel();
                ControlFlow::Break(())
            }
        }
    }
}
