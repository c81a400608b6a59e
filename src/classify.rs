// Author: Jacques Murray

//! Error classification.
//!
//! Every raw failure, whatever library produced it, is first normalized into
//! a [`RawFailure`] and then mapped by [`classify`] into a [`ClassifiedError`]
//! carrying a category, severity, user-safe message and retry guidance.
//!
//! Rules, in priority order:
//!
//! 1. An explicit application error code (`RawFailure::code`).
//! 2. The HTTP status range.
//! 3. No response at all: `Network`.
//! 4. Anything else: `Unknown`, not retryable.

use crate::context::FailureContext;
use crate::transport::Response;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// The category of a failure, which selects its recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorCategory {
    /// No response: DNS, refused connection, timeout.
    Network,
    /// HTTP 429.
    RateLimit,
    /// HTTP 5xx.
    Server,
    /// HTTP 400 and other client errors.
    Validation,
    /// HTTP 401 / 403.
    Auth,
    /// HTTP 404 / 410.
    NotFound,
    Unknown,
}

/// How serious a failure is, in increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Per-category defaults applied by [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryDefaults {
    pub severity: Severity,
    pub retryable: bool,
    pub retry_delay: Duration,
    pub max_retries: u32,
    pub user_message: &'static str,
}

impl ErrorCategory {
    pub fn defaults(self) -> CategoryDefaults {
        match self {
            ErrorCategory::Network => CategoryDefaults {
                severity: Severity::Medium,
                retryable: true,
                retry_delay: Duration::from_secs(1),
                max_retries: 3,
                user_message: "Unable to reach the server. Please check your connection.",
            },
            ErrorCategory::RateLimit => CategoryDefaults {
                severity: Severity::Medium,
                retryable: true,
                retry_delay: Duration::from_secs(5),
                max_retries: 3,
                user_message: "Too many requests. Please wait a moment and try again.",
            },
            ErrorCategory::Server => CategoryDefaults {
                severity: Severity::High,
                retryable: true,
                retry_delay: Duration::from_secs(2),
                max_retries: 3,
                user_message: "The server encountered a problem. Please try again shortly.",
            },
            ErrorCategory::Validation => CategoryDefaults {
                severity: Severity::Low,
                retryable: false,
                retry_delay: Duration::ZERO,
                max_retries: 0,
                user_message: "Some of the submitted data is invalid. Please review and try again.",
            },
            ErrorCategory::Auth => CategoryDefaults {
                severity: Severity::Critical,
                retryable: false,
                retry_delay: Duration::ZERO,
                max_retries: 0,
                user_message: "You are not authorized to perform this action. Please sign in again.",
            },
            ErrorCategory::NotFound => CategoryDefaults {
                severity: Severity::Low,
                retryable: false,
                retry_delay: Duration::ZERO,
                max_retries: 0,
                user_message: "The requested item could not be found.",
            },
            ErrorCategory::Unknown => CategoryDefaults {
                severity: Severity::Medium,
                retryable: false,
                retry_delay: Duration::ZERO,
                max_retries: 0,
                user_message: "An unexpected error occurred. Please try again.",
            },
        }
    }

    /// Maps an application error code; `None` for codes we do not know.
    pub fn from_code(code: &str) -> Option<Self> {
        let category = match code.trim().to_ascii_uppercase().as_str() {
            "NETWORK_ERROR" | "TIMEOUT" | "ECONNABORTED" | "ECONNREFUSED" => ErrorCategory::Network,
            "RATE_LIMITED" | "RATE_LIMIT" | "TOO_MANY_REQUESTS" => ErrorCategory::RateLimit,
            "SERVER_ERROR" | "INTERNAL_ERROR" | "SERVICE_UNAVAILABLE" => ErrorCategory::Server,
            "VALIDATION_ERROR" | "INVALID_REQUEST" => ErrorCategory::Validation,
            "UNAUTHORIZED" | "FORBIDDEN" | "AUTH_ERROR" => ErrorCategory::Auth,
            "NOT_FOUND" => ErrorCategory::NotFound,
            _ => return None,
        };
        Some(category)
    }

    /// Maps an HTTP status; `None` for statuses outside the 4xx/5xx ranges.
    pub fn from_status(status: u16) -> Option<Self> {
        let category = match status {
            429 => ErrorCategory::RateLimit,
            401 | 403 => ErrorCategory::Auth,
            404 | 410 => ErrorCategory::NotFound,
            400..=499 => ErrorCategory::Validation,
            500..=599 => ErrorCategory::Server,
            _ => return None,
        };
        Some(category)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Network => "NETWORK",
            ErrorCategory::RateLimit => "RATE_LIMIT",
            ErrorCategory::Server => "SERVER",
            ErrorCategory::Validation => "VALIDATION",
            ErrorCategory::Auth => "AUTH",
            ErrorCategory::NotFound => "NOT_FOUND",
            ErrorCategory::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// The canonical shape of a raw failure.
///
/// Transport adapters build one of these so the classifier's input never
/// depends on a particular HTTP library.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFailure {
    /// HTTP status, if a response was received.
    pub status: Option<u16>,
    /// Application error code reported by the server or the transport.
    pub code: Option<String>,
    /// Server-provided retry hint (`Retry-After`).
    pub retry_after: Option<Duration>,
    /// Response body, e.g. a validation payload.
    pub body: Option<serde_json::Value>,
    /// Technical description; logged, never shown to users.
    pub message: String,
}

impl RawFailure {
    /// A failure with no response at all.
    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// The call exceeded its timeout before a response arrived.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            code: Some("TIMEOUT".to_owned()),
            message: message.into(),
            ..Self::default()
        }
    }

    /// A response with the given status.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            ..Self::default()
        }
    }

    /// Normalizes a non-success response.
    ///
    /// Reads the `Retry-After` header (delta-seconds) and an application
    /// error code from a `code` or `error.code` field in a JSON body.
    pub fn from_response(response: &Response) -> Self {
        let retry_after = response
            .header("retry-after")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let code = response.body.as_ref().and_then(|body| {
            body.get("code")
                .or_else(|| body.get("error").and_then(|e| e.get("code")))
                .and_then(|c| c.as_str())
                .map(str::to_owned)
        });

        Self {
            status: Some(response.status),
            code,
            retry_after,
            body: response.body.clone(),
            message: format!("request failed with status {}", response.status),
        }
    }

    #[cfg(feature = "reqwest")]
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return Self::status(status.as_u16(), error.to_string());
        }
        if error.is_timeout() {
            return Self::timeout(error.to_string());
        }
        Self::connection(error.to_string())
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Diagnostic data attached to a classified error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorMetadata {
    /// Number of retries scheduled so far; the only field mutated after
    /// classification.
    pub retry_count: u32,
    pub status: Option<u16>,
    pub context: FailureContext,
    /// Free-form extras, e.g. a validation payload.
    pub extra: BTreeMap<String, String>,
}

/// A structured, typed failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub severity: Severity,
    /// Safe to surface in UI.
    pub user_message: String,
    /// Raw detail, for logs only.
    pub technical_message: String,
    pub is_retryable: bool,
    pub retry_delay: Duration,
    pub max_retries: u32,
    pub metadata: ErrorMetadata,
}

impl ClassifiedError {
    /// An error with the category's defaults and no context.
    pub fn from_category(category: ErrorCategory, technical_message: impl Into<String>) -> Self {
        let defaults = category.defaults();
        Self {
            category,
            severity: defaults.severity,
            user_message: defaults.user_message.to_owned(),
            technical_message: technical_message.into(),
            is_retryable: defaults.retryable,
            retry_delay: defaults.retry_delay,
            max_retries: defaults.max_retries,
            metadata: ErrorMetadata::default(),
        }
    }

    pub fn retry_count(&self) -> u32 {
        self.metadata.retry_count
    }

    pub fn operation(&self) -> Option<&str> {
        self.metadata.context.operation.as_deref()
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.user_message)
    }
}

impl std::error::Error for ClassifiedError {}

/// Classifies a raw failure.
///
/// Pure and total: every input yields a classification, with unrecognized
/// shapes falling back to `Unknown`.
pub fn classify(raw: &RawFailure, context: &FailureContext) -> ClassifiedError {
    let category = raw
        .code
        .as_deref()
        .and_then(ErrorCategory::from_code)
        .or_else(|| raw.status.and_then(ErrorCategory::from_status))
        .unwrap_or(if raw.status.is_none() {
            ErrorCategory::Network
        } else {
            ErrorCategory::Unknown
        });

    let mut error = ClassifiedError::from_category(category, raw.message.clone());

    if category == ErrorCategory::RateLimit {
        if let Some(hint) = raw.retry_after {
            error.retry_delay = hint;
        }
    }

    if category == ErrorCategory::Validation {
        if let Some(message) = raw
            .body
            .as_ref()
            .and_then(|b| b.get("message"))
            .and_then(|m| m.as_str())
        {
            error.user_message = message.to_owned();
        }
    }

    error.metadata.status = raw.status;
    error.metadata.context = context.clone();
    if let Some(code) = &raw.code {
        error.metadata.extra.insert("code".to_owned(), code.clone());
    }
    if let Some(body) = &raw.body {
        error.metadata.extra.insert("body".to_owned(), body.to_string());
    }

    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> FailureContext {
        FailureContext::for_operation("load_campaigns")
    }

    #[test]
    fn no_response_is_network_and_retryable() {
        for raw in [
            RawFailure::connection("connection refused"),
            RawFailure::connection("dns lookup failed"),
            RawFailure::timeout("timed out after 10s"),
        ] {
            let error = classify(&raw, &ctx());
            assert_eq!(error.category, ErrorCategory::Network);
            assert!(error.is_retryable);
        }
    }

    #[test]
    fn status_ranges() {
        let cases = [
            (500, ErrorCategory::Server, true),
            (503, ErrorCategory::Server, true),
            (429, ErrorCategory::RateLimit, true),
            (400, ErrorCategory::Validation, false),
            (422, ErrorCategory::Validation, false),
            (401, ErrorCategory::Auth, false),
            (403, ErrorCategory::Auth, false),
            (404, ErrorCategory::NotFound, false),
            (302, ErrorCategory::Unknown, false),
        ];
        for (status, category, retryable) in cases {
            let error = classify(&RawFailure::status(status, "boom"), &ctx());
            assert_eq!(error.category, category, "status {status}");
            assert_eq!(error.is_retryable, retryable, "status {status}");
            assert_eq!(error.metadata.status, Some(status));
        }
    }

    #[test]
    fn rate_limit_uses_server_hint() {
        let hinted = RawFailure::status(429, "slow down").with_retry_after(Duration::from_secs(12));
        assert_eq!(classify(&hinted, &ctx()).retry_delay, Duration::from_secs(12));

        let bare = RawFailure::status(429, "slow down");
        assert_eq!(
            classify(&bare, &ctx()).retry_delay,
            ErrorCategory::RateLimit.defaults().retry_delay
        );
    }

    #[test]
    fn retry_after_header_is_parsed() {
        let response = Response::new(429).with_header("Retry-After", "7");
        let raw = RawFailure::from_response(&response);
        assert_eq!(raw.retry_after, Some(Duration::from_secs(7)));
        assert_eq!(classify(&raw, &ctx()).retry_delay, Duration::from_secs(7));
    }

    #[test]
    fn code_outranks_status() {
        let response = Response::new(500).with_body(json!({"error": {"code": "VALIDATION_ERROR"}}));
        let error = classify(&RawFailure::from_response(&response), &ctx());
        assert_eq!(error.category, ErrorCategory::Validation);
        assert_eq!(error.metadata.extra.get("code").map(String::as_str), Some("VALIDATION_ERROR"));
    }

    #[test]
    fn unknown_code_falls_through_to_status() {
        let raw = RawFailure::status(503, "down").with_code("SOMETHING_ELSE");
        assert_eq!(classify(&raw, &ctx()).category, ErrorCategory::Server);
    }

    #[test]
    fn validation_message_comes_from_payload() {
        let response = Response::new(400).with_body(json!({"message": "Budget must be positive"}));
        let error = classify(&RawFailure::from_response(&response), &ctx());
        assert_eq!(error.user_message, "Budget must be positive");
        assert!(error.metadata.extra.contains_key("body"));
    }

    #[test]
    fn user_message_hides_technical_detail() {
        let error = classify(&RawFailure::status(500, "NullPointerException at line 42"), &ctx());
        assert!(!error.to_string().contains("NullPointerException"));
        assert!(error.technical_message.contains("NullPointerException"));
    }

    #[test]
    fn classification_is_pure() {
        let raw = RawFailure::status(503, "unavailable").with_retry_after(Duration::from_secs(3));
        assert_eq!(classify(&raw, &ctx()), classify(&raw, &ctx()));
    }

    #[test]
    fn severity_is_ordered() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
        assert_eq!(ErrorCategory::Auth.defaults().severity, Severity::Critical);
    }
}
