// Author: Jacques Murray

//! The request dispatcher and the client built around it.
//!
//! [`ResilientClient::send_once`] wraps a single outbound call: it assigns a
//! request id, raises the loading flag, awaits the transport and classifies
//! any failure. [`ResilientClient::dispatch_with`] layers retry, offline
//! queueing, recovery and error notifications on top of it.

use crate::classify::{classify, ClassifiedError, ErrorCategory, RawFailure};
use crate::clock::{or_cancel, Clock, SystemClock};
use crate::config::{DispatchOptions, ResilienceConfig};
use crate::connectivity::{ConnectivityMonitor, ConnectivityProbe, Transition};
use crate::context::RequestContext;
use crate::error::{DispatchError, QueueError};
use crate::notify::{LoadingSink, LogNotifier, Notification, NotificationSink};
use crate::offline::{OfflineQueue, OperationExecutor, ReplayResult};
use crate::recovery::{RecoveryOutcome, RecoveryService, ReplayFn};
use crate::retry::Retry;
use crate::transport::{Operation, Response, Transport, REQUEST_ID_HEADER};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Observes each retry: the failed attempt's classification and the delay
/// before the next one.
pub type RetryListener = Arc<dyn Fn(&ClassifiedError, Duration) + Send + Sync>;

/// Raises the loading flag on creation and lowers it exactly once on drop,
/// whether the call succeeded, failed or was cancelled.
struct LoadingGuard {
    sink: Option<Arc<dyn LoadingSink>>,
}

impl LoadingGuard {
    fn engage(sink: Option<Arc<dyn LoadingSink>>) -> Self {
        signal_loading(sink.as_deref(), true);
        Self { sink }
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        signal_loading(self.sink.as_deref(), false);
    }
}

#[allow(unused_variables)]
fn signal_loading(sink: Option<&dyn LoadingSink>, loading: bool) {
    let Some(sink) = sink else {
        return;
    };
    if let Err(e) = sink.set_loading(loading) {
        #[cfg(feature = "logging")]
        log::warn!("Could not set loading={}: {}", loading, e);
    }
}

/// The single entry point for API actions.
///
/// Cheap to clone; every collaborator is shared.
#[derive(Clone)]
pub struct ResilientClient {
    transport: Arc<dyn Transport>,
    loading: Option<Arc<dyn LoadingSink>>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    config: ResilienceConfig,
    recovery: Option<Arc<RecoveryService>>,
    connectivity: Option<Arc<ConnectivityMonitor>>,
    queue: Option<Arc<OfflineQueue>>,
    retry_listener: Option<RetryListener>,
}

impl ResilientClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            loading: None,
            notifier: Arc::new(LogNotifier),
            clock: Arc::new(SystemClock),
            config: ResilienceConfig::default(),
            recovery: None,
            connectivity: None,
            queue: None,
            retry_listener: None,
        }
    }

    pub fn with_loading_sink(mut self, sink: Arc<dyn LoadingSink>) -> Self {
        self.loading = Some(sink);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: ResilienceConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses `recovery` for failed operations. A recovery service without a
    /// monitor of its own follows the client's monitor.
    pub fn with_recovery(mut self, recovery: Arc<RecoveryService>) -> Self {
        self.recovery = Some(recovery);
        self.link_connectivity();
        self
    }

    pub fn with_connectivity(mut self, monitor: Arc<ConnectivityMonitor>) -> Self {
        self.connectivity = Some(monitor);
        self.link_connectivity();
        self
    }

    pub fn with_offline_queue(mut self, queue: Arc<OfflineQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_retry_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&ClassifiedError, Duration) + Send + Sync + 'static,
    {
        self.retry_listener = Some(Arc::new(listener));
        self
    }

    pub fn recovery(&self) -> Option<&Arc<RecoveryService>> {
        self.recovery.as_ref()
    }

    pub fn connectivity(&self) -> Option<&Arc<ConnectivityMonitor>> {
        self.connectivity.as_ref()
    }

    pub fn offline_queue(&self) -> Option<&Arc<OfflineQueue>> {
        self.queue.as_ref()
    }

    fn link_connectivity(&self) {
        let (Some(recovery), Some(monitor)) = (&self.recovery, &self.connectivity) else {
            return;
        };
        if !recovery.attach_connectivity(monitor.clone()) {
            #[cfg(feature = "logging")]
            log::warn!("Recovery service follows a different connectivity monitor than the client");
        }
    }

    fn is_offline(&self) -> bool {
        self.connectivity.as_ref().is_some_and(|m| !m.is_online())
    }

    /// Performs exactly one outbound call.
    ///
    /// Non-2xx responses and transport failures come back as
    /// `DispatchError::Failed` carrying their classification.
    pub async fn send_once(
        &self,
        operation: &Operation,
        cancel: Option<&CancellationToken>,
    ) -> Result<Response, DispatchError> {
        let context = RequestContext::start(operation, self.clock.now());
        let loading = LoadingGuard::engage(self.loading.clone());

        let request = operation
            .clone()
            .with_header(REQUEST_ID_HEADER, context.request_id.clone());

        #[cfg(feature = "logging")]
        log::debug!(
            "{} {} ({}) [{}]",
            context.method,
            context.url,
            context.operation,
            context.request_id
        );

        let outcome = or_cancel(self.transport.send(request), cancel).await;
        let elapsed = self.clock.now().saturating_duration_since(context.started_at);
        drop(loading);

        let raw = match outcome {
            Err(_) => {
                #[cfg(feature = "logging")]
                log::debug!("[{}] cancelled after {:?}", context.request_id, elapsed);
                return Err(DispatchError::Cancelled);
            }
            Ok(Ok(response)) if response.is_success() => {
                #[cfg(feature = "logging")]
                log::debug!("[{}] {} in {:?}", context.request_id, response.status, elapsed);
                return Ok(response);
            }
            Ok(Ok(response)) => RawFailure::from_response(&response),
            Ok(Err(raw)) => raw,
        };

        let classified = classify(&raw, &context.failure_context(elapsed));

        #[cfg(feature = "logging")]
        log::warn!(
            "[{}] {} {} failed after {:?}: {} ({})",
            context.request_id,
            context.method,
            context.url,
            elapsed,
            classified.category,
            classified.technical_message
        );

        Err(classified.into())
    }

    /// Dispatches with default options.
    pub async fn dispatch(&self, operation: Operation) -> Result<Response, DispatchError> {
        self.dispatch_with(operation, DispatchOptions::default(), None).await
    }

    /// Dispatches `operation`, retrying retryable failures.
    ///
    /// When the final failure is a network error while offline, write
    /// operations are stored in the offline queue (if configured) and
    /// `DispatchError::Queued` is returned. Otherwise, with
    /// `attempt_recovery`, a retryable failure is handed to the recovery
    /// service and its result returned.
    ///
    /// `cancel` aborts the retries and any recovery that follows them.
    pub async fn dispatch_with(
        &self,
        operation: Operation,
        options: DispatchOptions,
        cancel: Option<CancellationToken>,
    ) -> Result<Response, DispatchError> {
        let policy = options.retry_policy(self.config.max_jitter());

        let condition = {
            let options = options.clone();
            let monitor = self.connectivity.clone();
            // Retrying a network failure while offline cannot succeed; leave
            // it to the queue or the recovery service.
            move |error: &ClassifiedError| {
                let offline = monitor.as_ref().is_some_and(|m| !m.is_online());
                options.should_retry(error) && !(error.category == ErrorCategory::Network && offline)
            }
        };

        let work = {
            let client = self.clone();
            let operation = operation.clone();
            move || {
                let client = client.clone();
                let operation = operation.clone();
                async move { client.send_once(&operation, None).await }
            }
        };

        let mut retry = Retry::new(policy, work)
            .with_condition(condition)
            .with_clock(self.clock.clone());
        if let Some(token) = cancel.clone() {
            retry = retry.with_cancellation(token);
        }
        if let Some(listener) = self.retry_listener.clone() {
            retry = retry.on_retry(move |error, delay| listener(error, delay));
        }

        let error = match retry.await {
            Ok(response) => return Ok(response),
            Err(DispatchError::Cancelled) => return Err(DispatchError::Cancelled),
            Err(error) => error,
        };
        let Some(classified) = error.classified().cloned() else {
            return Err(error);
        };

        if classified.category == ErrorCategory::Network
            && options.queue_when_offline
            && operation.method.is_write()
            && self.is_offline()
        {
            if let Some(queue) = &self.queue {
                match queue.enqueue(operation.clone(), options.clone()) {
                    Ok(id) => {
                        return Err(DispatchError::Queued {
                            id,
                            error: Box::new(classified),
                        })
                    }
                    Err(_e) => {
                        #[cfg(feature = "logging")]
                        log::error!("Could not queue {} for offline replay: {}", operation.name, _e);
                    }
                }
            }
        }

        if options.attempt_recovery && classified.is_retryable {
            match or_cancel(self.recover(classified.clone(), operation), cancel.as_ref()).await {
                Ok(Some(outcome)) => return outcome.result,
                Ok(None) => {}
                Err(_) => {
                    #[cfg(feature = "logging")]
                    log::debug!("Recovery of {} cancelled", classified.operation().unwrap_or("request"));
                    return Err(DispatchError::Cancelled);
                }
            }
        }

        if options.show_error_notification {
            self.notifier.notify(Notification::error(classified.user_message.clone()));
        }

        #[cfg(feature = "logging")]
        log::error!(
            "{} failed after {} retries: {}",
            classified.operation().unwrap_or("request"),
            classified.retry_count(),
            classified.technical_message
        );

        Err(error)
    }

    /// Hands a failed operation to the recovery service, e.g. from a
    /// "Retry" button. `None` when no recovery service is configured.
    pub async fn recover(&self, error: ClassifiedError, operation: Operation) -> Option<RecoveryOutcome> {
        let recovery = self.recovery.clone()?;
        Some(recovery.attempt_recovery(error, self.replay_fn(operation)).await)
    }

    fn replay_fn(&self, operation: Operation) -> ReplayFn {
        let client = self.clone();
        Arc::new(move || {
            let client = client.clone();
            let operation = operation.clone();
            async move { client.send_once(&operation, None).await }.boxed()
        })
    }

    /// Feeds an online/offline event into the client.
    ///
    /// Going online wakes recoveries waiting for the network and replays
    /// the offline queue; the replay results are returned.
    pub async fn connectivity_changed(&self, online: bool) -> Result<Vec<ReplayResult>, QueueError> {
        let Some(monitor) = &self.connectivity else {
            return Ok(Vec::new());
        };
        if monitor.set_online(online) != Some(Transition::WentOnline) {
            return Ok(Vec::new());
        }

        #[cfg(feature = "logging")]
        if let Some(recovery) = &self.recovery {
            log::info!(
                "Back online; resuming {} pending network recoveries",
                recovery.pending(ErrorCategory::Network).len()
            );
        }

        match &self.queue {
            Some(queue) => queue.process_queued(self).await,
            None => Ok(Vec::new()),
        }
    }

    /// Polls `probe` every `interval` until `cancel` fires.
    ///
    /// Results go through [`connectivity_changed`](Self::connectivity_changed),
    /// so a reconnect found by the probe also replays the offline queue.
    pub async fn run_poller(&self, probe: &dyn ConnectivityProbe, interval: Duration, cancel: &CancellationToken) {
        loop {
            let Ok(online) = or_cancel(probe.check(), Some(cancel)).await else {
                break;
            };
            if let Err(_e) = self.connectivity_changed(online).await {
                #[cfg(feature = "logging")]
                log::error!("Offline queue replay failed: {}", _e);
            }
            if or_cancel(self.clock.sleep(interval), Some(cancel)).await.is_err() {
                break;
            }
        }
        #[cfg(feature = "logging")]
        log::debug!("Client connectivity poller stopped");
    }
}

impl OperationExecutor for ResilientClient {
    fn execute(
        &self,
        operation: Operation,
        options: DispatchOptions,
    ) -> BoxFuture<'_, Result<Response, DispatchError>> {
        let options = options.queue_when_offline(false);
        self.dispatch_with(operation, options, None).boxed()
    }
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("config", &self.config)
            .field("recovery", &self.recovery.is_some())
            .field("connectivity", &self.connectivity)
            .field("queue", &self.queue)
            .finish()
    }
}
