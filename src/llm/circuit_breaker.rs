// =============================================================================
// Circuit breaker — opens after K consecutive LLM transport failures
// =============================================================================
//
// While open, callers should synthesize HOLD verdicts locally rather than
// hitting the provider (spec.md §4.5.4). The breaker half-opens after
// `cooldown` has elapsed, allowing one probe call through; a single success
// closes it again, a single failure re-opens it and resets the cooldown.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    consecutive_failures: AtomicU32,
    opened_at: Mutex<Option<Instant>>,
    opens_total: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            consecutive_failures: AtomicU32::new(0),
            opened_at: Mutex::new(None),
            opens_total: AtomicU64::new(0),
        }
    }

    /// Whether a call should be attempted right now. Returns `false` while
    /// open and the cooldown hasn't elapsed; returns `true` (as a probe)
    /// once the cooldown has passed, without closing the breaker yet.
    pub fn allow_call(&self) -> bool {
        let opened_at = *self.opened_at.lock();
        match opened_at {
            None => true,
            Some(t) => t.elapsed() >= self.cooldown,
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        *self.opened_at.lock() = None;
    }

    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.failure_threshold {
            let mut opened_at = self.opened_at.lock();
            if opened_at.is_none() {
                self.opens_total.fetch_add(1, Ordering::Relaxed);
                warn!(failures, threshold = self.failure_threshold, "llm circuit breaker opened");
            }
            *opened_at = Some(Instant::now());
        }
    }

    pub fn is_open(&self) -> bool {
        !self.allow_call()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_by_default() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(!cb.is_open());
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        assert!(!cb.is_open());
        cb.record_failure();
        assert!(cb.is_open());
    }

    #[test]
    fn success_resets_failure_count() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert!(!cb.is_open(), "a single failure after a reset shouldn't re-open");
    }

    #[test]
    fn half_opens_after_cooldown() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(5));
        cb.record_failure();
        assert!(cb.is_open());
        std::thread::sleep(Duration::from_millis(10));
        assert!(cb.allow_call());
    }
}
