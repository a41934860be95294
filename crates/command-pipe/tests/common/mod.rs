//! Common test utilities

#![allow(dead_code)]

use async_trait::async_trait;
use command_pipe::{
    Command, Error, ExitStatus, ForceExit, Launcher, ProcessHandle, Record, Result, Spawned,
};
use futures_lite::future;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Route crate logs to the test output
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("command_pipe=debug")
        .with_test_writer()
        .try_init();
}

/// Launcher whose processes are driven by the test
///
/// Each [`FakeLauncher::add_process`] queues one process for the next spawn.
/// Spawning with an empty queue fails.
#[derive(Clone, Default)]
pub struct FakeLauncher {
    queue: Arc<Mutex<VecDeque<FakeParts>>>,
    next_pid: Arc<AtomicU32>,
}

struct FakeParts {
    lines: async_channel::Receiver<std::io::Result<String>>,
    exit: async_channel::Receiver<Result<ExitStatus>>,
    kill: Arc<FakeKill>,
}

/// The test's side of a fake process
pub struct FakeChild {
    lines: async_channel::Sender<std::io::Result<String>>,
    exit: async_channel::Sender<Result<ExitStatus>>,
    kill: Arc<FakeKill>,
}

struct FakeKill {
    killed: AtomicBool,
    lines: async_channel::Sender<std::io::Result<String>>,
    exit: async_channel::Sender<Result<ExitStatus>>,
}

struct FakeHandle {
    pid: u32,
    exit: async_channel::Receiver<Result<ExitStatus>>,
    kill: Arc<FakeKill>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a process for the next spawn
    pub fn add_process(&self) -> FakeChild {
        let (lines_tx, lines_rx) = async_channel::unbounded();
        let (exit_tx, exit_rx) = async_channel::unbounded();
        let kill = Arc::new(FakeKill {
            killed: AtomicBool::new(false),
            lines: lines_tx.clone(),
            exit: exit_tx.clone(),
        });

        self.queue.lock().unwrap().push_back(FakeParts {
            lines: lines_rx,
            exit: exit_rx,
            kill: kill.clone(),
        });

        FakeChild {
            lines: lines_tx,
            exit: exit_tx,
            kill,
        }
    }
}

impl Launcher for FakeLauncher {
    fn spawn(&self, command: &Command) -> Result<Spawned> {
        let parts = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::spawn_failed(command.command_line(), "no process queued"))?;

        let pid = 1000 + self.next_pid.fetch_add(1, Ordering::SeqCst);
        Ok(Spawned {
            lines: Box::pin(parts.lines),
            handle: Box::new(FakeHandle {
                pid,
                exit: parts.exit,
                kill: parts.kill,
            }),
        })
    }
}

#[async_trait]
impl ProcessHandle for FakeHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn wait(&mut self) -> Result<ExitStatus> {
        match self.exit.recv().await {
            Ok(status) => status,
            Err(_) => Err(Error::wait_failed("process vanished")),
        }
    }

    fn force_exit(&self) -> Arc<dyn ForceExit> {
        self.kill.clone()
    }
}

impl ForceExit for FakeKill {
    fn force_exit(&self) -> Result<()> {
        if !self.killed.swap(true, Ordering::SeqCst) {
            let _ = self.exit.try_send(Ok(ExitStatus::from_signal(9)));
            self.lines.close();
        }
        Ok(())
    }
}

impl FakeChild {
    /// Write one line to stdout
    pub fn line(&self, line: &str) {
        let _ = self.lines.try_send(Ok(line.to_string()));
    }

    /// Make the next stdout read fail
    pub fn read_error(&self) {
        let _ = self.lines.try_send(Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "stream did not contain valid UTF-8",
        )));
    }

    /// Close stdout without exiting
    pub fn close_stdout(&self) {
        self.lines.close();
    }

    /// Exit with `code`, closing stdout
    pub fn exit(&self, code: i32) {
        self.lines.close();
        let _ = self.exit.try_send(Ok(ExitStatus::from_code(code)));
    }

    /// Make waiting for the exit fail
    pub fn wait_error(&self) {
        self.lines.close();
        self.exit.close();
    }

    pub fn was_killed(&self) -> bool {
        self.kill.killed.load(Ordering::SeqCst)
    }
}

/// Something a pipe reported
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Result(Record),
    Exit(bool),
}

/// Records callback invocations in order
#[derive(Clone)]
pub struct Observer {
    events: Arc<Mutex<Vec<Event>>>,
    exit_tx: async_channel::Sender<bool>,
    exit_rx: async_channel::Receiver<bool>,
}

impl Observer {
    pub fn new() -> Self {
        let (exit_tx, exit_rx) = async_channel::unbounded();
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            exit_tx,
            exit_rx,
        }
    }

    /// The `on_result` callback
    pub fn on_result(&self) -> impl FnMut(Record) + Send + 'static {
        let events = self.events.clone();
        move |record| events.lock().unwrap().push(Event::Result(record))
    }

    /// The `on_exit` callback
    pub fn on_exit(&self) -> impl FnOnce(bool) + Send + 'static {
        let events = self.events.clone();
        let exit_tx = self.exit_tx.clone();
        move |success| {
            events.lock().unwrap().push(Event::Exit(success));
            let _ = exit_tx.try_send(success);
        }
    }

    /// Wait for the next exit report, giving up after `timeout`
    pub async fn next_exit(&self, timeout: Duration) -> Option<bool> {
        future::or(async { self.exit_rx.recv().await.ok() }, async {
            smol::Timer::after(timeout).await;
            None
        })
        .await
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn results(&self) -> Vec<Record> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Result(record) => Some(record),
                Event::Exit(_) => None,
            })
            .collect()
    }

    /// Results that are plain lines
    pub fn lines(&self) -> Vec<String> {
        self.results()
            .iter()
            .filter_map(|record| record.as_line().map(str::to_string))
            .collect()
    }

    pub fn exits(&self) -> Vec<bool> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Exit(success) => Some(success),
                Event::Result(_) => None,
            })
            .collect()
    }

    /// Returns true if every result came before the exit report
    pub fn results_precede_exit(&self) -> bool {
        let events = self.events();
        match events.iter().position(|e| matches!(e, Event::Exit(_))) {
            Some(exit) => events[exit..]
                .iter()
                .skip(1)
                .all(|e| !matches!(e, Event::Result(_))),
            None => true,
        }
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn eventually<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        smol::Timer::after(Duration::from_millis(5)).await;
    }
    condition()
}
