//! Runtime-agnostic async utilities
//!
//! The pipe runner never names an executor directly. It hands its
//! orchestrating futures to a [`Spawner`], sleeps through
//! [`runtime_utils::sleep`] and schedules delayed callbacks with
//! [`timer::set_timeout`].
//!
//! # Examples
//!
//! ```no_run
//! use async_runtime_compat::prelude::*;
//! use std::time::Duration;
//!
//! # #[cfg(feature = "smol")]
//! smol::block_on(async {
//!     let spawner = SmolSpawner;
//!     let handle = set_timeout(&spawner, Duration::from_millis(50), || {
//!         println!("fired");
//!     });
//!     handle.clear();
//! });
//! ```

use std::future::Future;
use std::pin::Pin;

/// A boxed future that can be moved onto a runtime
pub type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A spawner that can spawn futures on an async runtime
pub trait Spawner: Send + Sync {
    /// Spawn a future on the runtime
    ///
    /// The future runs to completion in the background; nothing is returned
    /// to join on.
    fn spawn(&self, future: BoxedTask);
}

impl<S: Spawner + ?Sized> Spawner for std::sync::Arc<S> {
    fn spawn(&self, future: BoxedTask) {
        (**self).spawn(future)
    }
}

#[cfg(feature = "tokio")]
pub mod tokio;

#[cfg(feature = "smol")]
pub mod smol;

pub mod runtime_utils;
pub mod timer;

/// Prelude for common imports
pub mod prelude {
    pub use crate::runtime_utils::sleep;
    pub use crate::timer::{run_after, set_timeout, TimeoutHandle};
    pub use crate::{BoxedTask, Spawner};

    #[cfg(feature = "tokio")]
    pub use crate::tokio::TokioSpawner;

    #[cfg(feature = "smol")]
    pub use crate::smol::SmolSpawner;
}

/// Create a spawner for the runtime the caller is running on
///
/// Tokio is detected through its thread-local handle. Without tokio the smol
/// global executor is used, which needs no surrounding runtime at all.
pub fn current_runtime_spawner() -> Option<Box<dyn Spawner>> {
    #[cfg(feature = "tokio")]
    {
        if ::tokio::runtime::Handle::try_current().is_ok() {
            return Some(Box::new(tokio::TokioSpawner));
        }
    }

    fallback_spawner()
}

#[cfg(feature = "smol")]
fn fallback_spawner() -> Option<Box<dyn Spawner>> {
    Some(Box::new(smol::SmolSpawner))
}

#[cfg(not(feature = "smol"))]
fn fallback_spawner() -> Option<Box<dyn Spawner>> {
    // Other runtimes don't have reliable detection
    None
}
