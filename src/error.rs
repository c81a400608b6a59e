// Author: Jacques Murray

//! Error types returned by the crate.

use crate::classify::{ClassifiedError, ErrorCategory};
use thiserror::Error;

/// Returned by any wait that was aborted through its cancellation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation was cancelled")]
pub struct Cancelled;

/// The error propagated by a dispatched call.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The call failed; carries the classification and its user message.
    #[error("{0}")]
    Failed(Box<ClassifiedError>),

    /// The caller cancelled the call or one of its backoff waits.
    #[error("request was cancelled")]
    Cancelled,

    /// The client is offline and the operation was stored for replay.
    #[error("you are offline; the change was saved and will be sent when the connection returns")]
    Queued {
        id: String,
        error: Box<ClassifiedError>,
    },
}

impl DispatchError {
    /// The classification attached to this error, if any.
    pub fn classified(&self) -> Option<&ClassifiedError> {
        match self {
            DispatchError::Failed(error) | DispatchError::Queued { error, .. } => Some(&**error),
            DispatchError::Cancelled => None,
        }
    }

    pub fn classified_mut(&mut self) -> Option<&mut ClassifiedError> {
        match self {
            DispatchError::Failed(error) | DispatchError::Queued { error, .. } => Some(&mut **error),
            DispatchError::Cancelled => None,
        }
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        self.classified().map(|e| e.category)
    }

    pub fn is_retryable(&self) -> bool {
        self.classified().is_some_and(|e| e.is_retryable)
    }
}

impl From<ClassifiedError> for DispatchError {
    fn from(error: ClassifiedError) -> Self {
        DispatchError::Failed(Box::new(error))
    }
}

impl From<Cancelled> for DispatchError {
    fn from(_: Cancelled) -> Self {
        DispatchError::Cancelled
    }
}

/// Failure of the durable key-value store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage is unavailable: {0}")]
    Unavailable(String),
}

/// Failure of an offline-queue operation.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("queued operations could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A UI-state sink could not accept a signal.
#[derive(Debug, Clone, Error)]
#[error("sink unavailable: {0}")]
pub struct SinkError(pub String);

/// Invalid configuration input.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_displays_user_message() {
        let classified = ClassifiedError::from_category(ErrorCategory::Server, "stack trace here");
        let error = DispatchError::from(classified);
        assert_eq!(
            error.to_string(),
            ErrorCategory::Server.defaults().user_message
        );
        assert!(error.is_retryable());
        assert_eq!(error.category(), Some(ErrorCategory::Server));
    }

    #[test]
    fn cancelled_has_no_classification() {
        let error = DispatchError::from(Cancelled);
        assert!(error.classified().is_none());
        assert!(!error.is_retryable());
    }
}
