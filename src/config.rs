// Author: Jacques Murray

//! Configuration: per-call options, retry policy and service-wide settings.

use crate::classify::ClassifiedError;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Decides whether a classified failure should be retried.
pub type RetryCondition = Arc<dyn Fn(&ClassifiedError) -> bool + Send + Sync>;

/// Upper bound of the random term added to every backoff delay.
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(1000);

/// Retry budget when a caller-supplied condition overrides the
/// classification and no explicit `max_retries` is given; the category
/// ceiling is ignored in that case.
pub const OVERRIDE_MAX_RETRIES: u32 = 3;

/// Retry parameters for one logical operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `None` defers to the failure
    /// category's own ceiling.
    pub max_retries: Option<u32>,
    pub base_delay_ms: u64,
    pub max_jitter_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries: Some(max_retries),
            base_delay_ms: base_delay.as_millis() as u64,
            ..Self::default()
        }
    }

    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter_ms = max_jitter.as_millis() as u64;
        self
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_jitter(&self) -> Duration {
        Duration::from_millis(self.max_jitter_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: None,
            base_delay_ms: 1000,
            max_jitter_ms: DEFAULT_MAX_JITTER.as_millis() as u64,
        }
    }
}

/// Options recognized by [`crate::ResilientClient::dispatch`].
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchOptions {
    pub max_retries: Option<u32>,
    pub base_delay_ms: u64,
    /// Show the user message of a final failure as an error notification.
    pub show_error_notification: bool,
    /// Hand a final retryable failure to the recovery service.
    pub attempt_recovery: bool,
    /// Store write operations that fail while offline in the offline queue.
    pub queue_when_offline: bool,
    /// Overrides the default "is the classification retryable" check.
    #[serde(skip)]
    pub retry_condition: Option<RetryCondition>,
}

impl DispatchOptions {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay_ms = base_delay.as_millis() as u64;
        self
    }

    pub fn with_retry_condition<C>(mut self, condition: C) -> Self
    where
        C: Fn(&ClassifiedError) -> bool + Send + Sync + 'static,
    {
        self.retry_condition = Some(Arc::new(condition));
        self
    }

    pub fn show_error_notification(mut self, show: bool) -> Self {
        self.show_error_notification = show;
        self
    }

    pub fn attempt_recovery(mut self, attempt: bool) -> Self {
        self.attempt_recovery = attempt;
        self
    }

    pub fn queue_when_offline(mut self, queue: bool) -> Self {
        self.queue_when_offline = queue;
        self
    }

    /// The retry policy these options describe.
    pub fn retry_policy(&self, max_jitter: Duration) -> RetryPolicy {
        let max_retries = match (self.max_retries, &self.retry_condition) {
            (None, Some(_)) => Some(OVERRIDE_MAX_RETRIES),
            (max_retries, _) => max_retries,
        };
        RetryPolicy {
            max_retries,
            base_delay_ms: self.base_delay_ms,
            max_jitter_ms: max_jitter.as_millis() as u64,
        }
    }

    /// Whether `error` should be retried under these options.
    pub fn should_retry(&self, error: &ClassifiedError) -> bool {
        match &self.retry_condition {
            Some(condition) => condition(error),
            None => error.is_retryable,
        }
    }
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            max_retries: None,
            base_delay_ms: 1000,
            show_error_notification: true,
            attempt_recovery: false,
            queue_when_offline: true,
            retry_condition: None,
        }
    }
}

impl fmt::Debug for DispatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchOptions")
            .field("max_retries", &self.max_retries)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("show_error_notification", &self.show_error_notification)
            .field("attempt_recovery", &self.attempt_recovery)
            .field("queue_when_offline", &self.queue_when_offline)
            .field("retry_condition", &self.retry_condition.is_some())
            .finish()
    }
}

/// Service-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResilienceConfig {
    /// How long finished recovery records are kept for diagnostics.
    pub record_ttl_ms: u64,
    pub max_jitter_ms: u64,
    /// Cap on the server-error recovery backoff.
    pub server_max_delay_ms: u64,
    pub server_base_delay_ms: u64,
    /// Replays attempted by the server-error recovery strategy.
    pub server_max_attempts: u32,
    /// Connectivity transitions closer than this to the previous one are
    /// ignored. `None` disables debouncing.
    pub connectivity_debounce_ms: Option<u64>,
    /// Storage key of the offline queue.
    pub queue_key: String,
}

impl ResilienceConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_key.trim().is_empty() {
            return Err(ConfigError::Invalid("queue_key must not be empty".into()));
        }
        if self.server_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "server_max_attempts must be at least 1".into(),
            ));
        }
        if self.server_base_delay_ms > self.server_max_delay_ms {
            return Err(ConfigError::Invalid(
                "server_base_delay_ms exceeds server_max_delay_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn record_ttl(&self) -> Duration {
        Duration::from_millis(self.record_ttl_ms)
    }

    pub fn max_jitter(&self) -> Duration {
        Duration::from_millis(self.max_jitter_ms)
    }

    pub fn server_max_delay(&self) -> Duration {
        Duration::from_millis(self.server_max_delay_ms)
    }

    pub fn server_base_delay(&self) -> Duration {
        Duration::from_millis(self.server_base_delay_ms)
    }

    pub fn connectivity_debounce(&self) -> Option<Duration> {
        self.connectivity_debounce_ms.map(Duration::from_millis)
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            record_ttl_ms: 60_000,
            max_jitter_ms: DEFAULT_MAX_JITTER.as_millis() as u64,
            server_max_delay_ms: 30_000,
            server_base_delay_ms: 1000,
            server_max_attempts: 3,
            connectivity_debounce_ms: None,
            queue_key: "offline_operations".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ErrorCategory;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = ResilienceConfig::from_json_str(r#"{"record_ttl_ms": 5000}"#).unwrap();
        assert_eq!(config.record_ttl(), Duration::from_secs(5));
        assert_eq!(config.queue_key, "offline_operations");
        assert_eq!(config.max_jitter(), DEFAULT_MAX_JITTER);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(ResilienceConfig::from_json_str(r#"{"record_ttl": 5}"#).is_err());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = ResilienceConfig::from_json_str(r#"{"queue_key": "  "}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn dispatch_options_from_json() {
        let options: DispatchOptions =
            serde_json::from_str(r#"{"max_retries": 2, "attempt_recovery": true}"#).unwrap();
        assert_eq!(options.max_retries, Some(2));
        assert!(options.attempt_recovery);
        assert!(options.show_error_notification);
        assert!(options.retry_condition.is_none());
    }

    #[test]
    fn retry_condition_overrides_classification() {
        let unknown = ClassifiedError::from_category(ErrorCategory::Unknown, "?");
        assert!(!DispatchOptions::default().should_retry(&unknown));

        let options = DispatchOptions::default().with_retry_condition(|_| true);
        assert!(options.should_retry(&unknown));
    }

    #[test]
    fn retry_condition_gets_its_own_budget() {
        let jitter = Duration::ZERO;
        assert_eq!(DispatchOptions::default().retry_policy(jitter).max_retries, None);

        let overridden = DispatchOptions::default().with_retry_condition(|_| true);
        assert_eq!(overridden.retry_policy(jitter).max_retries, Some(OVERRIDE_MAX_RETRIES));

        let explicit = overridden.with_max_retries(1);
        assert_eq!(explicit.retry_policy(jitter).max_retries, Some(1));
    }
}
