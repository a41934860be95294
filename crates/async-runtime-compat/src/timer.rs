//! Cancellable delayed callbacks
//!
//! [`set_timeout`] schedules a callback on a [`Spawner`] and hands back a
//! [`TimeoutHandle`] that can clear it before it fires. Dropping the handle
//! does not clear the timeout.

use crate::runtime_utils::sleep;
use crate::Spawner;
use async_channel::Sender;
use futures_lite::future;
use std::time::Duration;
use tracing::trace;

/// Handle to a scheduled callback
#[derive(Debug, Clone)]
pub struct TimeoutHandle {
    cancel: Sender<()>,
}

impl TimeoutHandle {
    /// Prevent the callback from running
    ///
    /// No-op if the callback already ran or was cleared before.
    pub fn clear(&self) {
        self.cancel.close();
    }

    /// Returns true while the callback is still scheduled
    pub fn is_active(&self) -> bool {
        !self.cancel.is_closed()
    }
}

/// Run `callback` once after `delay`, unless the returned handle is cleared first
pub fn set_timeout<S, F>(spawner: &S, delay: Duration, callback: F) -> TimeoutHandle
where
    S: Spawner + ?Sized,
    F: FnOnce() + Send + 'static,
{
    let (tx, rx) = async_channel::bounded::<()>(1);
    // The task keeps its own sender so only an explicit clear closes the channel
    let keepalive = tx.clone();

    spawner.spawn(Box::pin(async move {
        let fired = future::or(
            async {
                let _ = rx.recv().await;
                false
            },
            async {
                sleep(delay).await;
                true
            },
        )
        .await;

        if fired {
            keepalive.close();
            callback();
        } else {
            trace!(?delay, "timeout cleared before firing");
        }
    }));

    TimeoutHandle { cancel: tx }
}

/// Await `delay`, then call `f` and hand its result to the awaiter
///
/// Errors are returned to the caller like any other value, so a fallible
/// `f` yields a `Result` that can be propagated with `?`.
pub async fn run_after<T, F>(delay: Duration, f: F) -> T
where
    F: FnOnce() -> T,
{
    sleep(delay).await;
    f()
}
