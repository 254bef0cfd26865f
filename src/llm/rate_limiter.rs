// =============================================================================
// Token bucket — per-minute LLM call ceiling shared by fast + deep roles
// =============================================================================
//
// spec.md §5: "the classifier and agents share a token-bucket that enforces
// a per-minute call ceiling." One bucket, refilled continuously, shared
// across every caller in the process.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
    denied_total: AtomicU64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// `calls_per_minute` tokens, refilled continuously so that a full
    /// minute of idle time yields a full bucket again.
    pub fn new(calls_per_minute: u32) -> Self {
        let capacity = calls_per_minute as f64;
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            denied_total: AtomicU64::new(0),
        }
    }

    /// Attempt to spend one token. Returns `false` (and increments the
    /// denied counter) if the bucket is empty.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        let elapsed = state.last_refill.elapsed().as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = Instant::now();

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            self.denied_total.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    pub fn denied_total(&self) -> u64 {
        self.denied_total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_capacity_then_denies() {
        let bucket = TokenBucket::new(3);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
        assert_eq!(bucket.denied_total(), 1);
    }

    #[test]
    fn refills_over_time() {
        let bucket = TokenBucket::new(60); // 1 token/sec
        for _ in 0..60 {
            assert!(bucket.try_acquire());
        }
        assert!(!bucket.try_acquire());
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(bucket.try_acquire(), "should have refilled at least one token in 50ms");
    }
}
