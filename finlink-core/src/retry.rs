//! Watcher-side backoff and reconnect policies
//!
//! Watchers are dedicated OS threads, so the throttle is a plain blocking
//! sleep applied on the watcher's own thread after a retryable transport
//! failure. Repeated low-level protocol failures escalate to a forced
//! reconnect of the transport client.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Default pause after a retryable watcher failure
pub const DEFAULT_THROTTLE: Duration = Duration::from_secs(5);

/// Default number of consecutive protocol failures before a reconnect
pub const DEFAULT_RECONNECT_THRESHOLD: u32 = 3;

/// Sleep-based throttle for a watcher's retry loop
#[derive(Debug, Clone)]
pub struct BackoffThrottle {
    delay: Duration,
}

impl Default for BackoffThrottle {
    fn default() -> Self {
        Self {
            delay: DEFAULT_THROTTLE,
        }
    }
}

impl BackoffThrottle {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Block the calling thread for the configured delay
    pub fn pause(&self) {
        debug!(delay_ms = self.delay.as_millis() as u64, "throttling watcher");
        std::thread::sleep(self.delay);
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// Escalation policy: after N consecutive failures the transport client is
/// forcibly reconnected
pub struct ReconnectPolicy {
    threshold: u32,
    consecutive_failures: AtomicU32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_THRESHOLD)
    }
}

impl ReconnectPolicy {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Record a failed exchange; returns true when the caller should force a
    /// reconnect (the counter resets)
    pub fn record_failure(&self) -> bool {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.threshold {
            warn!(
                consecutive_failures = failures,
                "protocol failure threshold reached, forcing reconnect"
            );
            self.consecutive_failures.store(0, Ordering::Relaxed);
            return true;
        }
        false
    }

    /// Record a successful exchange
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Current consecutive failure count
    pub fn failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_after_threshold() {
        let policy = ReconnectPolicy::new(3);
        assert!(!policy.record_failure());
        assert!(!policy.record_failure());
        assert!(policy.record_failure());
        // Counter reset after the forced reconnect.
        assert_eq!(policy.failures(), 0);
    }

    #[test]
    fn test_success_resets_counter() {
        let policy = ReconnectPolicy::new(3);
        policy.record_failure();
        policy.record_failure();
        policy.record_success();
        assert!(!policy.record_failure());
        assert_eq!(policy.failures(), 1);
    }

    #[test]
    fn test_throttle_sleeps_at_least_the_delay() {
        let throttle = BackoffThrottle::new(Duration::from_millis(20));
        let start = std::time::Instant::now();
        throttle.pause();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
