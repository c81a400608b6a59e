// Author: Jacques Murray

//! The recovery service.
//!
//! A [`RecoveryService`] owns a registry mapping each [`ErrorCategory`] to a
//! [`RecoveryStrategy`]. [`RecoveryService::attempt_recovery`] creates a
//! pending [`RecoveryRecord`], runs the category's strategy against the
//! original operation, settles the record as successful or failed, notifies
//! the user and keeps the record around for a bounded time before evicting
//! it on its own.

use crate::backoff::ExponentialBackoff;
use crate::classify::{ClassifiedError, ErrorCategory};
use crate::clock::{Clock, SystemClock};
use crate::config::{ResilienceConfig, RetryPolicy};
use crate::connectivity::ConnectivityMonitor;
use crate::error::DispatchError;
use crate::notify::{LogNotifier, Notification, NotificationSink};
use crate::retry::Retry;
use crate::transport::Response;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::fmt;
use std::future::IntoFuture;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};

/// A replayable operation.
pub type ReplayFn = Arc<dyn Fn() -> BoxFuture<'static, Result<Response, DispatchError>> + Send + Sync>;

pub const RECOVERED_MESSAGE: &str = "The operation completed successfully after recovery.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStatus {
    Pending,
    Successful,
    Failed,
}

/// One recovery attempt, as tracked by the service.
#[derive(Clone)]
pub struct RecoveryRecord {
    pub id: String,
    pub error: ClassifiedError,
    pub original_operation: ReplayFn,
    pub attempts: u32,
    pub max_attempts: u32,
    pub started_at: Instant,
    pub status: RecoveryStatus,
}

impl fmt::Debug for RecoveryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryRecord")
            .field("id", &self.id)
            .field("category", &self.error.category)
            .field("attempts", &self.attempts)
            .field("max_attempts", &self.max_attempts)
            .field("status", &self.status)
            .finish()
    }
}

/// The settled record together with what the replay produced.
#[derive(Debug)]
pub struct RecoveryOutcome {
    pub record: RecoveryRecord,
    pub result: Result<Response, DispatchError>,
}

impl RecoveryOutcome {
    pub fn is_successful(&self) -> bool {
        self.record.status == RecoveryStatus::Successful
    }
}

type Records = Arc<Mutex<HashMap<String, RecoveryRecord>>>;

fn lock(records: &Records) -> MutexGuard<'_, HashMap<String, RecoveryRecord>> {
    records.lock().unwrap_or_else(|p| p.into_inner())
}

/// The handle a strategy uses to drive one recovery.
#[derive(Clone)]
pub struct RecoveryAttempt {
    id: String,
    error: Arc<ClassifiedError>,
    operation: ReplayFn,
    attempts: Arc<AtomicU32>,
    max_attempts: u32,
    records: Records,
    clock: Arc<dyn Clock>,
    connectivity: Option<Arc<ConnectivityMonitor>>,
}

impl RecoveryAttempt {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The failure being recovered from.
    pub fn error(&self) -> &ClassifiedError {
        &self.error
    }

    /// Replays made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Runs the original operation once more and counts the attempt.
    pub async fn replay(&self) -> Result<Response, DispatchError> {
        let attempts = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(record) = lock(&self.records).get_mut(&self.id) {
            record.attempts = attempts;
        }
        #[cfg(feature = "logging")]
        log::debug!("Recovery {} replay attempt {}/{}", self.id, attempts, self.max_attempts);
        (self.operation)().await
    }

    pub async fn sleep(&self, duration: Duration) {
        self.clock.sleep(duration).await
    }

    /// Waits until connectivity is back. Without a monitor the client is
    /// assumed online.
    pub async fn wait_online(&self) {
        if let Some(monitor) = &self.connectivity {
            if !monitor.is_online() {
                #[cfg(feature = "logging")]
                log::info!("Recovery {} waiting for connectivity", self.id);
                monitor.wait_online().await;
            }
        }
    }
}

/// A category-specific way of getting a failed operation through.
pub trait RecoveryStrategy: Send + Sync {
    /// Replays this strategy may perform for `error`.
    fn max_attempts(&self, error: &ClassifiedError) -> u32;

    fn recover(&self, attempt: RecoveryAttempt) -> BoxFuture<'_, Result<Response, DispatchError>>;
}

/// NETWORK: block until back online, then replay once.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitForReconnect;

impl RecoveryStrategy for WaitForReconnect {
    fn max_attempts(&self, _error: &ClassifiedError) -> u32 {
        1
    }

    fn recover(&self, attempt: RecoveryAttempt) -> BoxFuture<'_, Result<Response, DispatchError>> {
        async move {
            attempt.wait_online().await;
            attempt.replay().await
        }
        .boxed()
    }
}

/// RATE_LIMIT: sleep out the classified delay, then replay once.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitOutRateLimit;

impl RecoveryStrategy for WaitOutRateLimit {
    fn max_attempts(&self, _error: &ClassifiedError) -> u32 {
        1
    }

    fn recover(&self, attempt: RecoveryAttempt) -> BoxFuture<'_, Result<Response, DispatchError>> {
        async move {
            attempt.sleep(attempt.error().retry_delay).await;
            attempt.replay().await
        }
        .boxed()
    }
}

/// SERVER: capped exponential backoff keyed off the attempt count.
#[derive(Debug, Clone, Copy)]
pub struct ServerBackoff {
    backoff: ExponentialBackoff,
    max_attempts: u32,
}

impl ServerBackoff {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            backoff: ExponentialBackoff::new(base_delay).with_max_delay(max_delay),
            max_attempts: max_attempts.max(1),
        }
    }
}

impl RecoveryStrategy for ServerBackoff {
    fn max_attempts(&self, _error: &ClassifiedError) -> u32 {
        self.max_attempts
    }

    fn recover(&self, attempt: RecoveryAttempt) -> BoxFuture<'_, Result<Response, DispatchError>> {
        async move {
            loop {
                let delay = self.backoff.delay_for(attempt.attempts() as usize);
                attempt.sleep(delay).await;
                match attempt.replay().await {
                    Ok(response) => return Ok(response),
                    Err(e) if e.is_retryable() && attempt.attempts() < self.max_attempts => continue,
                    Err(e) => return Err(e),
                }
            }
        }
        .boxed()
    }
}

/// Fallback for categories with no registered strategy: one bounded pass
/// through the retry orchestrator.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPass {
    policy: RetryPolicy,
}

impl RetryPass {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl RecoveryStrategy for RetryPass {
    fn max_attempts(&self, error: &ClassifiedError) -> u32 {
        self.policy.max_retries.unwrap_or(error.max_retries) + 1
    }

    fn recover(&self, attempt: RecoveryAttempt) -> BoxFuture<'_, Result<Response, DispatchError>> {
        let clock = attempt.clock();
        Retry::new(self.policy, move || {
            let attempt = attempt.clone();
            async move { attempt.replay().await }
        })
        .with_clock(clock)
        .into_future()
    }
}

pub struct RecoveryService {
    strategies: HashMap<ErrorCategory, Arc<dyn RecoveryStrategy>>,
    fallback: Arc<dyn RecoveryStrategy>,
    records: Records,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    connectivity: OnceLock<Arc<ConnectivityMonitor>>,
    record_ttl: Duration,
}

impl RecoveryService {
    /// A service with the built-in strategies and default settings.
    pub fn new() -> Self {
        Self::from_config(&ResilienceConfig::default())
    }

    pub fn from_config(config: &ResilienceConfig) -> Self {
        let mut strategies: HashMap<ErrorCategory, Arc<dyn RecoveryStrategy>> = HashMap::new();
        strategies.insert(ErrorCategory::Network, Arc::new(WaitForReconnect));
        strategies.insert(ErrorCategory::RateLimit, Arc::new(WaitOutRateLimit));
        strategies.insert(
            ErrorCategory::Server,
            Arc::new(ServerBackoff::new(
                config.server_base_delay(),
                config.server_max_delay(),
                config.server_max_attempts,
            )),
        );

        Self {
            strategies,
            fallback: Arc::new(RetryPass::new(
                RetryPolicy::default().with_max_jitter(config.max_jitter()),
            )),
            records: Arc::new(Mutex::new(HashMap::new())),
            notifier: Arc::new(LogNotifier),
            clock: Arc::new(SystemClock),
            connectivity: OnceLock::new(),
            record_ttl: config.record_ttl(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_connectivity(mut self, monitor: Arc<ConnectivityMonitor>) -> Self {
        self.connectivity = OnceLock::from(monitor);
        self
    }

    /// Follows `monitor` if no monitor was set yet.
    ///
    /// Returns whether the service now follows `monitor`.
    pub fn attach_connectivity(&self, monitor: Arc<ConnectivityMonitor>) -> bool {
        match self.connectivity.set(monitor) {
            Ok(()) => true,
            Err(monitor) => self
                .connectivity
                .get()
                .is_some_and(|current| Arc::ptr_eq(current, &monitor)),
        }
    }

    pub fn connectivity(&self) -> Option<&Arc<ConnectivityMonitor>> {
        self.connectivity.get()
    }

    pub fn with_record_ttl(mut self, ttl: Duration) -> Self {
        self.record_ttl = ttl;
        self
    }

    /// Registers (or replaces) the strategy for `category`.
    pub fn with_strategy(mut self, category: ErrorCategory, strategy: Arc<dyn RecoveryStrategy>) -> Self {
        self.register(category, strategy);
        self
    }

    pub fn register(&mut self, category: ErrorCategory, strategy: Arc<dyn RecoveryStrategy>) {
        self.strategies.insert(category, strategy);
    }

    /// Tries to get `operation` through after it failed with `error`.
    ///
    /// The returned record has a terminal status. It also stays queryable
    /// through [`records`](Self::records) until the retention window ends.
    pub async fn attempt_recovery(&self, error: ClassifiedError, operation: ReplayFn) -> RecoveryOutcome {
        let strategy = self
            .strategies
            .get(&error.category)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());

        let id = format!("recovery_{}", uuid::Uuid::new_v4().simple());
        let record = RecoveryRecord {
            id: id.clone(),
            error: error.clone(),
            original_operation: operation.clone(),
            attempts: 0,
            max_attempts: strategy.max_attempts(&error),
            started_at: self.clock.now(),
            status: RecoveryStatus::Pending,
        };
        let max_attempts = record.max_attempts;
        lock(&self.records).insert(id.clone(), record);

        #[cfg(feature = "logging")]
        log::info!("Starting recovery {} for {} error", id, error.category);

        // Drops the record if this future is abandoned before settling.
        let mut abandon = AbandonGuard {
            records: self.records.clone(),
            id: Some(id.clone()),
        };

        let attempt = RecoveryAttempt {
            id: id.clone(),
            error: Arc::new(error),
            operation,
            attempts: Arc::new(AtomicU32::new(0)),
            max_attempts,
            records: self.records.clone(),
            clock: self.clock.clone(),
            connectivity: self.connectivity.get().cloned(),
        };
        let result = strategy.recover(attempt.clone()).await;

        let status = if result.is_ok() {
            RecoveryStatus::Successful
        } else {
            RecoveryStatus::Failed
        };
        let record = {
            let mut records = lock(&self.records);
            let entry = records.get_mut(&id);
            match entry {
                Some(record) => {
                    record.status = status;
                    record.attempts = attempt.attempts();
                    record.clone()
                }
                None => {
                    // Evicted out from under us; rebuild from the attempt.
                    RecoveryRecord {
                        id: id.clone(),
                        error: attempt.error().clone(),
                        original_operation: attempt.operation.clone(),
                        attempts: attempt.attempts(),
                        max_attempts,
                        started_at: self.clock.now(),
                        status,
                    }
                }
            }
        };
        abandon.id = None;

        match &result {
            Ok(_) => {
                #[cfg(feature = "logging")]
                log::info!("Recovery {} succeeded after {} attempt(s)", id, record.attempts);
                self.notifier.notify(Notification::success(RECOVERED_MESSAGE));
            }
            Err(e) => {
                #[cfg(feature = "logging")]
                log::error!("Recovery {} failed after {} attempt(s): {}", id, record.attempts, e);
                self.notifier
                    .notify(Notification::error(format!("Recovery failed: {e}")));
            }
        }

        self.schedule_eviction(id);
        RecoveryOutcome { record, result }
    }

    /// A snapshot of every retained record.
    pub fn records(&self) -> Vec<RecoveryRecord> {
        lock(&self.records).values().cloned().collect()
    }

    pub fn record(&self, id: &str) -> Option<RecoveryRecord> {
        lock(&self.records).get(id).cloned()
    }

    /// Records of `category` still in progress.
    pub fn pending(&self, category: ErrorCategory) -> Vec<RecoveryRecord> {
        lock(&self.records)
            .values()
            .filter(|r| r.status == RecoveryStatus::Pending && r.error.category == category)
            .cloned()
            .collect()
    }

    fn schedule_eviction(&self, id: String) {
        let records = self.records.clone();
        let wait = self.clock.sleep(self.record_ttl);
        crate::sleep::spawn(async move {
            wait.await;
            lock(&records).remove(&id);
        });
    }
}

impl Default for RecoveryService {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RecoveryService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryService")
            .field("categories", &self.strategies.keys().collect::<Vec<_>>())
            .field("records", &lock(&self.records).len())
            .field("record_ttl", &self.record_ttl)
            .finish()
    }
}

struct AbandonGuard {
    records: Records,
    id: Option<String>,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            lock(&self.records).remove(&id);
        }
    }
}
