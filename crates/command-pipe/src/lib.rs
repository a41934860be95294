//! Managed subprocess runner
//!
//! A [`Pipe`] launches a command, reads its stdout line by line, optionally
//! aggregates lines into batches or multi-line JSON objects, and reports
//! whether the run succeeded. Cancelling a run kills the child, and a run
//! stopped on request is not reported as a failure just because the process
//! died from the kill.
//!
//! ```no_run
//! use command_pipe::Pipe;
//!
//! let mut pipe = Pipe::new("bash", ["-c", "echo 1"]);
//! let cancel = pipe
//!     .start(|line| println!("{:?}", line), |ok| println!("{}", if ok { "OK" } else { "ERR" }))
//!     .unwrap();
//! // Always cancel eventually, even after the exit was reported
//! cancel.cancel();
//! ```

pub mod aggregate;
pub mod backends;
pub mod command;
pub mod config;
pub mod error;
pub mod pipe;
pub mod process;
pub mod reader;
pub mod state;

pub use aggregate::{AggType, AggregationFn, Aggregator, Record, aggregation_fn};
pub use async_runtime_compat::Spawner;
pub use backends::LocalLauncher;
pub use command::Command;
pub use config::PipeConfig;
pub use error::{BoxError, Error, Result};
pub use pipe::{CancelHandle, Pipe};
pub use process::{ExitStatus, ForceExit, Launcher, LineStream, ProcessHandle, Spawned};
pub use state::{DrainCause, RunOutcome, RunState};
