// Author: Jacques Murray

//! The retry orchestrator.
//!
//! [`Retry`] re-invokes a unit of work while its failures are classified as
//! retryable, waiting `max(category delay, base * 2^(n-1))` plus a bounded
//! random jitter between attempts. Attempts of one `Retry` are strictly
//! sequential, and separate `Retry` values share no state, so any number of
//! them can run concurrently.

use crate::backoff::{with_jitter, ExponentialBackoff};
use crate::classify::ClassifiedError;
use crate::clock::{or_cancel, Clock, SystemClock};
use crate::config::RetryPolicy;
use crate::error::{Cancelled, DispatchError};
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Errors the orchestrator can inspect and annotate.
pub trait Retryable: From<Cancelled> {
    /// The classification driving retry decisions. Errors without one are
    /// never retried.
    fn classification(&self) -> Option<&ClassifiedError>;

    fn classification_mut(&mut self) -> Option<&mut ClassifiedError>;
}

impl Retryable for DispatchError {
    fn classification(&self) -> Option<&ClassifiedError> {
        self.classified()
    }

    fn classification_mut(&mut self) -> Option<&mut ClassifiedError> {
        self.classified_mut()
    }
}

/// Retries a failure when its classification says it is retryable.
fn default_condition(error: &ClassifiedError) -> bool {
    error.is_retryable
}

type RetryObserver = Box<dyn FnMut(&ClassifiedError, Duration) + Send>;

/// The builder for a retryable operation.
///
/// Created by [`Retry::new()`] and configured with its builder methods. It
/// implements `IntoFuture`, so you can simply `.await` it.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Retry<O, C> {
    policy: RetryPolicy,
    operation: O,
    condition: C,
    clock: Arc<dyn Clock>,
    cancel: Option<CancellationToken>,
    observer: Option<RetryObserver>,
}

impl<O> Retry<O, fn(&ClassifiedError) -> bool> {
    /// Creates a new `Retry`.
    ///
    /// - `policy`: attempt budget, base delay and jitter ceiling.
    /// - `operation`: a closure returning a `Future` (e.g. `|| async { ... }`).
    ///
    /// By default a failure is retried when its classification is retryable.
    pub fn new(policy: RetryPolicy, operation: O) -> Self {
        Self {
            policy,
            operation,
            condition: default_condition,
            clock: Arc::new(SystemClock),
            cancel: None,
            observer: None,
        }
    }
}

impl<O, C> Retry<O, C> {
    /// Replaces the retry predicate.
    ///
    /// Returning `false` makes the loop give up and return the error.
    pub fn with_condition<NewC>(self, condition: NewC) -> Retry<O, NewC>
    where
        NewC: FnMut(&ClassifiedError) -> bool,
    {
        Retry {
            policy: self.policy,
            operation: self.operation,
            condition,
            clock: self.clock,
            cancel: self.cancel,
            observer: self.observer,
        }
    }

    /// Uses `clock` for backoff waits.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Aborts the loop, including an in-flight attempt or backoff wait,
    /// when `token` is cancelled. No further attempts are made.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Called before each backoff wait with the failed attempt's
    /// classification (its `retry_count` already updated) and the delay.
    pub fn on_retry<F>(mut self, observer: F) -> Self
    where
        F: FnMut(&ClassifiedError, Duration) + Send + 'static,
    {
        self.observer = Some(Box::new(observer));
        self
    }
}

/// Delay before retry number `retry` (1-based): the exponential term,
/// floored at the category delay, plus jitter.
pub fn retry_delay(policy: &RetryPolicy, error: &ClassifiedError, retry: u32) -> Duration {
    let exponential = ExponentialBackoff::new(policy.base_delay()).delay_for(retry.saturating_sub(1) as usize);
    with_jitter(exponential.max(error.retry_delay), policy.max_jitter())
}

impl<O, C, F, T, E> IntoFuture for Retry<O, C>
where
    O: FnMut() -> F + Send + 'static,
    C: FnMut(&ClassifiedError) -> bool + Send + 'static,
    F: Future<Output = Result<T, E>> + Send + 'static,
    E: Retryable + Send + 'static,
    T: Send + 'static,
{
    type Output = Result<T, E>;

    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send + 'static>>;

    fn into_future(mut self) -> Self::IntoFuture {
        Box::pin(async move {
            let mut attempt: u32 = 0;

            loop {
                attempt += 1;

                let result = match or_cancel((self.operation)(), self.cancel.as_ref()).await {
                    Ok(result) => result,
                    Err(cancelled) => return Err(E::from(cancelled)),
                };

                let mut error = match result {
                    Ok(value) => {
                        #[cfg(feature = "logging")]
                        log::trace!("Operation succeeded on attempt {}", attempt);
                        return Ok(value);
                    }
                    Err(error) => error,
                };

                let Some(classified) = error.classification() else {
                    return Err(error);
                };

                #[cfg(feature = "logging")]
                log::warn!(
                    "Attempt {} failed with {} error: {}",
                    attempt,
                    classified.category,
                    classified.technical_message
                );

                if !(self.condition)(classified) {
                    #[cfg(feature = "logging")]
                    log::debug!("Not retrying: {} error is not retryable", classified.category);
                    return Err(error);
                }

                let max_retries = self.policy.max_retries.unwrap_or(classified.max_retries);
                if attempt > max_retries {
                    #[cfg(feature = "logging")]
                    log::error!("Retry budget exhausted after {} attempts", attempt);
                    return Err(error);
                }

                let delay = retry_delay(&self.policy, classified, attempt);

                if let Some(classified) = error.classification_mut() {
                    classified.metadata.retry_count = attempt;
                    if let Some(observer) = self.observer.as_mut() {
                        observer(classified, delay);
                    }
                }

                #[cfg(feature = "logging")]
                log::trace!("Retrying after delay of {:?}", delay);
                if let Err(cancelled) = or_cancel(self.clock.sleep(delay), self.cancel.as_ref()).await {
                    return Err(E::from(cancelled));
                }
            }
        })
    }
}
