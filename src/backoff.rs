// Author: Jacques Murray

//! Exponential backoff and bounded jitter.

use rand::Rng;
use std::time::Duration;

// --- Exponential Backoff Strategy ---

/// A backoff strategy that doubles the wait duration.
///
/// Example: 100ms, 200ms, 400ms, 800ms...
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    base: Duration,
    max_delay: Option<Duration>,
}

impl ExponentialBackoff {
    /// Creates a new `ExponentialBackoff` strategy.
    ///
    /// - `base_delay`: The initial delay (e.g., 100ms).
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base: base_delay,
            max_delay: None,
        }
    }

    /// Sets an optional maximum delay.
    /// The backoff will not increase beyond this duration.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// The delay for a zero-based retry index: `base * 2^index`, capped.
    ///
    /// Saturates instead of overflowing for large indices.
    pub fn delay_for(&self, index: usize) -> Duration {
        let factor = 1u32.checked_shl(index.min(31) as u32).unwrap_or(u32::MAX);
        let delay = self.base.saturating_mul(factor);
        match self.max_delay {
            Some(max_delay) => delay.min(max_delay),
            None => delay,
        }
    }
}

// --- Jitter ---

/// Adds a uniform random term in `0..=max_jitter` to `delay`.
///
/// Desynchronizes clients that failed at the same moment so their
/// retries do not arrive together.
pub fn with_jitter(delay: Duration, max_jitter: Duration) -> Duration {
    if max_jitter.is_zero() {
        return delay;
    }
    let mut rng = rand::thread_rng();
    let jitter_millis = rng.gen_range(0..=max_jitter.as_millis() as u64);
    delay.saturating_add(Duration::from_millis(jitter_millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let strategy = ExponentialBackoff::new(Duration::from_millis(100));
        assert_eq!(strategy.delay_for(0), Duration::from_millis(100));
        assert_eq!(strategy.delay_for(1), Duration::from_millis(200));
        assert_eq!(strategy.delay_for(2), Duration::from_millis(400));
        assert_eq!(strategy.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn test_exponential_backoff_with_max_delay() {
        let strategy = ExponentialBackoff::new(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(300));
        assert_eq!(strategy.delay_for(0), Duration::from_millis(100));
        assert_eq!(strategy.delay_for(1), Duration::from_millis(200));
        assert_eq!(strategy.delay_for(2), Duration::from_millis(300)); // Capped
        assert_eq!(strategy.delay_for(3), Duration::from_millis(300)); // Capped
    }

    #[test]
    fn test_delay_for_saturates() {
        let strategy = ExponentialBackoff::new(Duration::from_secs(1));
        assert_eq!(strategy.delay_for(3), Duration::from_secs(8));
        // Huge indices must not panic.
        assert!(strategy.delay_for(500) >= Duration::from_secs(1 << 30));
    }

    #[test]
    fn test_jitter_is_bounded() {
        let base = Duration::from_millis(500);
        for _ in 0..200 {
            let delay = with_jitter(base, Duration::from_millis(1000));
            assert!(delay >= base);
            assert!(delay <= base + Duration::from_millis(1000));
        }
        assert_eq!(with_jitter(base, Duration::ZERO), base);
    }
}
