// Author: Jacques Murray

//! Runtime-agnostic sleep and spawn.
//!
//! This module uses feature flags (`tokio-timer`, `async-std-timer`)
//! to determine which runtime's timer and task spawner to use.

use std::future::Future;
use std::time::Duration;

/// Sleeps for the specified duration, using the async runtime
/// selected by the crate's feature flags.
///
/// Will produce a compile error if no timer feature is enabled.
pub async fn sleep(duration: Duration) {
    cfg_if::cfg_if! {
        if #[cfg(feature = "tokio-timer")] {
            tokio::time::sleep(duration).await;
        } else if #[cfg(feature = "async-std-timer")] {
            async_std::task::sleep(duration).await;
        } else {
            compile_error!("No async timer feature enabled. Please enable 'tokio-timer' or 'async-std-timer'.");
        }
    }
}

/// Spawns a detached background task on the selected runtime.
///
/// Used for self-scheduled housekeeping (record eviction) that must
/// run without anyone awaiting it.
pub fn spawn<F>(task: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    cfg_if::cfg_if! {
        if #[cfg(feature = "tokio-timer")] {
            tokio::spawn(task);
        } else if #[cfg(feature = "async-std-timer")] {
            async_std::task::spawn(task);
        } else {
            compile_error!("No async timer feature enabled. Please enable 'tokio-timer' or 'async-std-timer'.");
        }
    }
}
