//! Process facility implementations
//!
//! [`LocalLauncher`] spawns real OS processes. Other facilities (a fake for
//! tests, a remote shell) only need to implement
//! [`Launcher`](crate::process::Launcher).
//!
//! # Example: Custom Launcher
//!
//! ```ignore
//! use command_pipe::{Command, Launcher, Result, Spawned};
//!
//! struct ReplayLauncher {
//!     // recorded output to play back
//! }
//!
//! impl Launcher for ReplayLauncher {
//!     fn spawn(&self, command: &Command) -> Result<Spawned> {
//!         // Build a line stream and a handle for the recorded run
//!     }
//! }
//! ```

pub mod local;
pub use local::LocalLauncher;
