// Author: Jacques Murray

//! # resilient-request
//!
//! A resilience layer for outbound API calls: every failure is classified
//! into a category with a user-facing message, retryable failures are
//! retried with exponential backoff and jitter, failed operations can be
//! handed to category-specific recovery strategies, and write operations
//! issued while offline are queued durably and replayed once the connection
//! returns.
//!
//! ## Goals
//!
//! * One entry point, [`ResilientClient::dispatch`], for every API action.
//! * A uniform [`ClassifiedError`] for anything that goes wrong.
//! * Bounded, observable retries driven by the error category.
//! * Runtime-agnostic timers (Tokio or async-std via feature flags).
//!
//! ## Quick Start
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! resilient-request = { path = "path/to/resilient-request" }
//! # Enable your runtime (e.g., Tokio)
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! **Note:** You *must* enable a timer feature for this crate:
//! `features = ["tokio-timer"]` (the default) or `features = ["async-std-timer"]`.
//!
//! ### Example: Dispatching a request
//!
//! ```rust,no_run
//! use futures::future::BoxFuture;
//! use futures::FutureExt;
//! use resilient_request::{
//!     DispatchOptions, Operation, RawFailure, ResilientClient, Response, Transport,
//! };
//! use std::sync::Arc;
//!
//! struct Backend;
//!
//! impl Transport for Backend {
//!     fn send(&self, _operation: Operation) -> BoxFuture<'_, Result<Response, RawFailure>> {
//!         async { Ok(Response::ok(serde_json::json!({"id": 7}))) }.boxed()
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = ResilientClient::new(Arc::new(Backend));
//!
//!     let options = DispatchOptions::default().with_max_retries(3);
//!     let save = Operation::post("create_campaign", "/campaigns", serde_json::json!({"name": "Spring"}));
//!
//!     match client.dispatch_with(save, options, None).await {
//!         Ok(response) => println!("Saved: {:?}", response.body),
//!         Err(e) => println!("Failed: {}", e),
//!     }
//! }
//! ```
//!
//! ### Example: Retrying any classified work
//!
//! ```rust,no_run
//! use resilient_request::{ClassifiedError, DispatchError, ErrorCategory, Retry, RetryPolicy};
//! use std::time::Duration;
//!
//! async fn refresh_token() -> Result<String, DispatchError> {
//!     Err(ClassifiedError::from_category(ErrorCategory::Server, "503 from auth service").into())
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let policy = RetryPolicy::new(3, Duration::from_millis(200));
//!
//!     // Only retry server errors
//!     let result = Retry::new(policy, || async { refresh_token().await })
//!         .with_condition(|e: &ClassifiedError| e.category == ErrorCategory::Server)
//!         .await;
//!
//!     if let Err(e) = result {
//!         println!("Gave up after {} retries: {}", e.classified().map_or(0, |c| c.retry_count()), e);
//!     }
//! }
//! ```

// Public modules
pub mod backoff;
pub mod classify;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod notify;
pub mod offline;
pub mod recovery;
pub mod retry;
pub mod storage;
pub mod transport;
mod sleep;

// Public re-exports for easier use
pub use backoff::ExponentialBackoff;
pub use classify::{classify, ClassifiedError, ErrorCategory, ErrorMetadata, RawFailure, Severity};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DispatchOptions, ResilienceConfig, RetryPolicy};
pub use connectivity::{Connectivity, ConnectivityMonitor, ConnectivityProbe, Transition};
pub use context::{FailureContext, RequestContext};
pub use dispatch::ResilientClient;
pub use error::{Cancelled, ConfigError, DispatchError, QueueError, SinkError, StorageError};
pub use notify::{LoadingSink, LogNotifier, Notification, NotificationLevel, NotificationSink};
pub use offline::{OfflineQueue, OperationExecutor, QueueStatus, QueuedOperation, ReplayResult};
pub use recovery::{
    RecoveryAttempt, RecoveryOutcome, RecoveryRecord, RecoveryService, RecoveryStatus, RecoveryStrategy,
};
pub use retry::Retry;
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use transport::{Method, Operation, Response, Transport};

#[cfg(feature = "reqwest")]
pub use transport::ReqwestTransport;

/// Re-exported so callers can build cancellation tokens without a direct
/// `tokio-util` dependency.
pub use tokio_util::sync::CancellationToken;
