// Author: Jacques Murray

//! Per-call identity used for correlation and logging.

use crate::transport::{Method, Operation};
use std::time::{Duration, Instant};

/// Identity of one dispatched call.
///
/// Created at dispatch time and dropped once the call completes.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub operation: String,
    pub started_at: Instant,
    pub url: String,
    pub method: Method,
}

impl RequestContext {
    /// Starts a new context for `operation` with a fresh request id.
    pub fn start(operation: &Operation, started_at: Instant) -> Self {
        Self {
            request_id: new_request_id(),
            operation: operation.name.clone(),
            started_at,
            url: operation.url.clone(),
            method: operation.method,
        }
    }

    /// Freezes this context into the plain data the classifier consumes.
    pub fn failure_context(&self, elapsed: Duration) -> FailureContext {
        FailureContext {
            request_id: Some(self.request_id.clone()),
            operation: Some(self.operation.clone()),
            url: Some(self.url.clone()),
            method: Some(self.method),
            duration: Some(elapsed),
        }
    }
}

/// Context attached to a classification.
///
/// Holds only values, never clocks, so classifying the same failure with
/// the same context always gives the same result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureContext {
    pub request_id: Option<String>,
    pub operation: Option<String>,
    pub url: Option<String>,
    pub method: Option<Method>,
    pub duration: Option<Duration>,
}

impl FailureContext {
    /// Context naming only the operation, for standalone diagnostics.
    pub fn for_operation(operation: impl Into<String>) -> Self {
        Self {
            operation: Some(operation.into()),
            ..Self::default()
        }
    }
}

fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique() {
        let op = Operation::get("list_campaigns", "/api/campaigns");
        let a = RequestContext::start(&op, Instant::now());
        let b = RequestContext::start(&op, Instant::now());
        assert_ne!(a.request_id, b.request_id);
        assert!(a.request_id.starts_with("req_"));
    }

    #[test]
    fn failure_context_copies_identity() {
        let op = Operation::post("create_campaign", "/api/campaigns", serde_json::json!({}));
        let ctx = RequestContext::start(&op, Instant::now());
        let frozen = ctx.failure_context(Duration::from_millis(42));
        assert_eq!(frozen.request_id.as_deref(), Some(ctx.request_id.as_str()));
        assert_eq!(frozen.operation.as_deref(), Some("create_campaign"));
        assert_eq!(frozen.method, Some(Method::Post));
        assert_eq!(frozen.duration, Some(Duration::from_millis(42)));
    }
}
