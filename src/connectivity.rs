// Author: Jacques Murray

//! Online/offline tracking.
//!
//! The monitor holds the current state in a `watch` channel. Anything that
//! must wait for the network (the NETWORK recovery strategy) subscribes to
//! it, so flipping the state to online resumes every waiter at once.

use crate::clock::{or_cancel, Clock, SystemClock};
use crate::config::ResilienceConfig;
use crate::notify::{LogNotifier, Notification, NotificationSink};
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

/// A change of connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    WentOnline,
    WentOffline,
}

/// Answers "are we online right now?" for environments without
/// online/offline events.
pub trait ConnectivityProbe: Send + Sync {
    fn check(&self) -> BoxFuture<'_, bool>;
}

pub const OFFLINE_MESSAGE: &str =
    "You are offline. Changes will be saved and sent when your connection returns.";
pub const ONLINE_MESSAGE: &str = "Connection restored. Resuming pending operations.";

pub struct ConnectivityMonitor {
    state: watch::Sender<Connectivity>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    debounce: Option<Duration>,
    last_notified: Mutex<Option<Instant>>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let initial = if online {
            Connectivity::Online
        } else {
            Connectivity::Offline
        };
        let (state, _) = watch::channel(initial);
        Self {
            state,
            notifier: Arc::new(LogNotifier),
            clock: Arc::new(SystemClock),
            debounce: None,
            last_notified: Mutex::new(None),
        }
    }

    /// A monitor using the debounce window from `config`, if any.
    pub fn from_config(online: bool, config: &ResilienceConfig) -> Self {
        let mut monitor = Self::new(online);
        monitor.debounce = config.connectivity_debounce();
        monitor
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Suppresses notifications for transitions that arrive within `window`
    /// of the previously notified one. State changes are never suppressed.
    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce = Some(window);
        self
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow() == Connectivity::Online
    }

    pub fn state(&self) -> Connectivity {
        *self.state.borrow()
    }

    /// A stream of state changes.
    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.state.subscribe()
    }

    /// Feeds an online/offline event into the monitor.
    ///
    /// Returns the transition, or `None` when the state did not change.
    pub fn set_online(&self, online: bool) -> Option<Transition> {
        let next = if online {
            Connectivity::Online
        } else {
            Connectivity::Offline
        };
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if !changed {
            return None;
        }

        let transition = if online {
            Transition::WentOnline
        } else {
            Transition::WentOffline
        };

        #[cfg(feature = "logging")]
        log::info!("Connectivity changed: {:?}", next);

        if self.should_notify() {
            let notification = match transition {
                Transition::WentOnline => Notification::info(ONLINE_MESSAGE),
                Transition::WentOffline => Notification::persistent_warning(OFFLINE_MESSAGE),
            };
            self.notifier.notify(notification);
        }

        Some(transition)
    }

    /// Resolves once the monitor reports online.
    pub async fn wait_online(&self) {
        let mut rx = self.subscribe();
        // The sender lives as long as `self`, so this cannot fail while we
        // hold a reference.
        let _ = rx.wait_for(|state| *state == Connectivity::Online).await;
    }

    /// Polls `probe` every `interval`, feeding results into the monitor,
    /// until `cancel` fires.
    ///
    /// This only moves the state and wakes waiters. A client with an offline
    /// queue should use [`crate::ResilientClient::run_poller`], which also
    /// replays the queue on reconnect.
    pub async fn run_poller(
        &self,
        probe: &dyn ConnectivityProbe,
        interval: Duration,
        cancel: &CancellationToken,
    ) {
        loop {
            let Ok(online) = or_cancel(probe.check(), Some(cancel)).await else {
                break;
            };
            self.set_online(online);
            if or_cancel(self.clock.sleep(interval), Some(cancel)).await.is_err() {
                break;
            }
        }
        #[cfg(feature = "logging")]
        log::debug!("Connectivity poller stopped");
    }

    fn should_notify(&self) -> bool {
        let now = self.clock.now();
        let mut last = self.last_notified.lock().unwrap_or_else(|p| p.into_inner());
        if let (Some(window), Some(previous)) = (self.debounce, *last) {
            if now.saturating_duration_since(previous) < window {
                #[cfg(feature = "logging")]
                log::debug!("Suppressing connectivity notification inside debounce window");
                return false;
            }
        }
        *last = Some(now);
        true
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("state", &self.state())
            .field("debounce", &self.debounce)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::notify::NotificationLevel;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Collect(Mutex<Vec<Notification>>);

    impl NotificationSink for Collect {
        fn notify(&self, notification: Notification) {
            self.0.lock().unwrap().push(notification);
        }
    }

    #[test]
    fn transitions_emit_notifications() {
        let sink = Arc::new(Collect::default());
        let monitor = ConnectivityMonitor::new(true).with_notifier(sink.clone());

        assert_eq!(monitor.set_online(true), None);
        assert_eq!(monitor.set_online(false), Some(Transition::WentOffline));
        assert!(!monitor.is_online());
        assert_eq!(monitor.set_online(true), Some(Transition::WentOnline));

        let seen = sink.0.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].is_persistent());
        assert_eq!(seen[0].level, NotificationLevel::Warning);
        assert!(!seen[1].is_persistent());
    }

    #[test]
    fn debounce_suppresses_flapping_notifications() {
        let sink = Arc::new(Collect::default());
        let clock = ManualClock::new();
        let monitor = ConnectivityMonitor::new(true)
            .with_notifier(sink.clone())
            .with_clock(Arc::new(clock.clone()))
            .with_debounce(Duration::from_secs(2));

        monitor.set_online(false);
        clock.advance(Duration::from_millis(100));
        assert_eq!(monitor.set_online(true), Some(Transition::WentOnline));
        clock.advance(Duration::from_secs(3));
        monitor.set_online(false);

        assert!(!monitor.is_online());
        assert_eq!(sink.0.lock().unwrap().len(), 2);
    }

    #[test]
    fn debounce_comes_from_config() {
        let config = ResilienceConfig::from_json_str(r#"{"connectivity_debounce_ms": 250}"#).unwrap();
        let monitor = ConnectivityMonitor::from_config(false, &config);
        assert_eq!(monitor.debounce, Some(Duration::from_millis(250)));
        assert_eq!(monitor.state(), Connectivity::Offline);
    }

    #[tokio::test]
    async fn wait_online_resumes_on_transition() {
        let monitor = Arc::new(ConnectivityMonitor::new(false));
        let waiter = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.wait_online().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        monitor.set_online(true);
        waiter.await.unwrap();
    }

    struct Flaky(AtomicUsize);

    impl ConnectivityProbe for Flaky {
        fn check(&self) -> BoxFuture<'_, bool> {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            async move { n % 2 == 1 }.boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn poller_follows_probe_until_cancelled() {
        let monitor = ConnectivityMonitor::new(true);
        let probe = Flaky(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let stopper = cancel.clone();
        let mut rx = monitor.subscribe();
        let poll = monitor.run_poller(&probe, Duration::from_secs(1), &cancel);
        let watch = async move {
            rx.changed().await.unwrap();
            assert_eq!(*rx.borrow_and_update(), Connectivity::Offline);
            rx.changed().await.unwrap();
            assert_eq!(*rx.borrow_and_update(), Connectivity::Online);
            stopper.cancel();
        };
        futures::join!(poll, watch);

        assert_eq!(probe.0.load(Ordering::SeqCst), 2);
        assert!(monitor.is_online());
    }
}
