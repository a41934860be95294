//! Runtime-agnostic utility functions
//!
//! Keeps the cfg-flag selection of the sleep implementation in one place.

use std::time::Duration;

/// Sleep for the specified duration using the enabled runtime
///
/// smol's timer is driven by its own reactor thread and works under any
/// executor, so it wins when both features are enabled.
pub async fn sleep(duration: Duration) {
    #[cfg(feature = "smol")]
    {
        smol::Timer::after(duration).await;
    }

    #[cfg(all(feature = "tokio", not(feature = "smol")))]
    {
        ::tokio::time::sleep(duration).await;
    }

    #[cfg(not(any(feature = "smol", feature = "tokio")))]
    {
        compile_error!("One of the runtime features must be enabled: smol or tokio");
    }
}
