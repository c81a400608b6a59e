// Author: Jacques Murray

//! The timer abstraction every delay in the crate goes through.
//!
//! Production code uses [`SystemClock`], which defers to the runtime timer
//! in [`crate::sleep`]. Tests inject a [`ManualClock`] to observe requested
//! delays without waiting for them.

use crate::error::Cancelled;
use futures::future::{select, BoxFuture, Either};
use futures::FutureExt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// A source of time and delays.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> Instant;

    /// A future that completes after `duration`.
    ///
    /// Dropping the future cancels the wait.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// The real clock, backed by the runtime selected through feature flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        crate::sleep::sleep(duration).boxed()
    }
}

/// A fake clock that never blocks.
///
/// Every `sleep` completes immediately, advances the clock by the requested
/// amount and is recorded so tests can assert on the delays that were chosen.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualState>>,
}

#[derive(Debug)]
struct ManualState {
    origin: Instant,
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualState {
                origin: Instant::now(),
                elapsed: Duration::ZERO,
                sleeps: Vec::new(),
            })),
        }
    }

    /// Moves the clock forward without recording a sleep.
    pub fn advance(&self, by: Duration) {
        let mut state = self.lock();
        state.elapsed = state.elapsed.saturating_add(by);
    }

    /// All delays requested through `sleep`, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let state = self.lock();
        state.origin + state.elapsed
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        {
            let mut state = self.lock();
            state.elapsed = state.elapsed.saturating_add(duration);
            state.sleeps.push(duration);
        }
        futures::future::ready(()).boxed()
    }
}

/// Races a future against an optional cancellation token.
///
/// Resolves to `Err(Cancelled)` if `token` fires first. With no token the
/// future simply runs to completion.
pub async fn or_cancel<F>(future: F, token: Option<&CancellationToken>) -> Result<F::Output, Cancelled>
where
    F: Future,
{
    let Some(token) = token else {
        return Ok(future.await);
    };
    if token.is_cancelled() {
        return Err(Cancelled);
    }
    let work = std::pin::pin!(future);
    let cancelled = std::pin::pin!(token.cancelled());
    match select(work, cancelled).await {
        Either::Left((output, _)) => Ok(output),
        Either::Right(_) => Err(Cancelled),
    }
}
