//! Line reader loop
//!
//! Pulls lines from a child's stdout until the stream ends, fails or the
//! run is cancelled, forwarding each line to a callback. Cancellation always
//! wins when it is ready at the same time as a line.

use crate::process::LineStream;
use async_channel::Receiver;
use async_runtime_compat::runtime_utils::sleep;
use futures::StreamExt;
use futures_lite::future;
use std::ops::ControlFlow;
use std::time::Duration;

/// How a reading loop ended
#[derive(Debug)]
pub enum ReadEnd {
    /// The child closed its stdout
    EndOfStream,
    /// Reading failed
    Failed(std::io::Error),
    /// The cancel signal fired
    Cancelled,
    /// The line callback asked to stop
    Stopped,
    /// The drain deadline passed with the stream still open
    TimedOut,
}

enum ReadEvent {
    Line(String),
    End,
    Failed(std::io::Error),
    Cancelled,
    TimedOut,
}

/// Reads the stdout of one run
pub struct LineReader {
    lines: LineStream,
    cancel: Receiver<()>,
}

impl LineReader {
    /// Create a reader that stops once `cancel` is closed
    pub fn new(lines: LineStream, cancel: Receiver<()>) -> Self {
        Self { lines, cancel }
    }

    async fn next_line(lines: &mut LineStream) -> ReadEvent {
        match lines.next().await {
            Some(Ok(line)) => ReadEvent::Line(line),
            Some(Err(e)) => ReadEvent::Failed(e),
            None => ReadEvent::End,
        }
    }

    /// Forward lines to `on_line` until the stream ends, fails or is cancelled
    pub async fn run<F>(&mut self, mut on_line: F) -> ReadEnd
    where
        F: FnMut(String) -> ControlFlow<()>,
    {
        loop {
            let cancel = &self.cancel;
            let event = future::or(
                async {
                    // Only ever closed, never sent to
                    let _ = cancel.recv().await;
                    ReadEvent::Cancelled
                },
                Self::next_line(&mut self.lines),
            )
            .await;

            match event {
                ReadEvent::Line(line) => {
                    if on_line(line).is_break() {
                        return ReadEnd::Stopped;
                    }
                }
                ReadEvent::End => return ReadEnd::EndOfStream,
                ReadEvent::Failed(e) => return ReadEnd::Failed(e),
                ReadEvent::Cancelled => return ReadEnd::Cancelled,
                ReadEvent::TimedOut => return ReadEnd::TimedOut,
            }
        }
    }

    /// Forward output that is still buffered after a cancellation
    ///
    /// Ignores the cancel signal and gives up after `timeout`. A zero
    /// timeout returns immediately.
    pub async fn drain<F>(&mut self, timeout: Duration, mut on_line: F) -> ReadEnd
    where
        F: FnMut(String) -> ControlFlow<()>,
    {
        if timeout.is_zero() {
            return ReadEnd::TimedOut;
        }

        let mut deadline = Box::pin(sleep(timeout));
        loop {
            let deadline = &mut deadline;
            let event = future::or(
                async {
                    deadline.await;
                    ReadEvent::TimedOut
                },
                Self::next_line(&mut self.lines),
            )
            .await;

            match event {
                ReadEvent::Line(line) => {
                    if on_line(line).is_break() {
                        return ReadEnd::Stopped;
                    }
                }
                ReadEvent::End => return ReadEnd::EndOfStream,
                ReadEvent::Failed(e) => return ReadEnd::Failed(e),
                ReadEvent::TimedOut => return ReadEnd::TimedOut,
                ReadEvent::Cancelled => return ReadEnd::Cancelled,
            }
        }
    }
}
