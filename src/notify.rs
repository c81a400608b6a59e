// Author: Jacques Murray

//! UI-state sinks: the loading indicator and user notifications.

use crate::error::SinkError;
use std::time::Duration;

/// How long a notification stays on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Display {
    /// Dismissed automatically after the duration.
    Transient(Duration),
    /// Stays until the user (or a later state change) dismisses it.
    Persistent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub level: NotificationLevel,
    pub display: Display,
}

impl Notification {
    pub const DEFAULT_DURATION: Duration = Duration::from_secs(5);

    pub fn new(message: impl Into<String>, level: NotificationLevel, display: Display) -> Self {
        Self {
            message: message.into(),
            level,
            display,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(message, NotificationLevel::Info, Display::Transient(Self::DEFAULT_DURATION))
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(message, NotificationLevel::Success, Display::Transient(Self::DEFAULT_DURATION))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(message, NotificationLevel::Error, Display::Transient(Self::DEFAULT_DURATION))
    }

    /// A warning that stays until dismissed.
    pub fn persistent_warning(message: impl Into<String>) -> Self {
        Self::new(message, NotificationLevel::Warning, Display::Persistent)
    }

    pub fn is_persistent(&self) -> bool {
        self.display == Display::Persistent
    }
}

/// Receives the loading flag around each dispatched call.
///
/// May fail (e.g. the UI store is not initialized yet); the dispatcher
/// logs and ignores such failures.
pub trait LoadingSink: Send + Sync {
    fn set_loading(&self, loading: bool) -> Result<(), SinkError>;
}

/// Receives user notifications.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log instead of a UI.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify(&self, notification: Notification) {
        log_notification(&notification);
    }
}

#[cfg(feature = "logging")]
fn log_notification(notification: &Notification) {
    match notification.level {
        NotificationLevel::Error => log::error!("{}", notification.message),
        NotificationLevel::Warning => log::warn!("{}", notification.message),
        NotificationLevel::Info | NotificationLevel::Success => {
            log::info!("{}", notification.message)
        }
    }
}

#[cfg(not(feature = "logging"))]
fn log_notification(_notification: &Notification) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_pick_display() {
        assert!(Notification::persistent_warning("offline").is_persistent());
        assert_eq!(
            Notification::success("saved").display,
            Display::Transient(Notification::DEFAULT_DURATION)
        );
        assert_eq!(Notification::error("nope").level, NotificationLevel::Error);
    }
}
