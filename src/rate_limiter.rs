// =============================================================================
// Rate Limiter — token bucket with timed refill
// =============================================================================
//
// Unlike the read-only atomic counters the host crate uses to track Binance's
// weight-based limits, this bucket gates outbound subscription traffic and
// must be able to block a caller until a token becomes available (or a
// timeout elapses). The refill/deduct arithmetic stays behind a single
// `parking_lot::Mutex`, matching the host's lock discipline; waiting is a
// short `tokio::time::sleep` loop rather than a busy spin.
// =============================================================================

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

struct Inner {
    tokens: f64,
    last_refill: Instant,
}

pub struct TokenBucket {
    max_tokens: f64,
    refill_rate_per_sec: f64,
    inner: Mutex<Inner>,
}

impl TokenBucket {
    pub fn new(max_tokens: u32, refill_rate_per_sec: u32) -> Self {
        Self {
            max_tokens: max_tokens as f64,
            refill_rate_per_sec: refill_rate_per_sec as f64,
            inner: Mutex::new(Inner {
                tokens: max_tokens as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill_locked(&self, inner: &mut Inner) {
        let now = Instant::now();
        let elapsed = now.duration_since(inner.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            inner.tokens = (inner.tokens + elapsed * self.refill_rate_per_sec).min(self.max_tokens);
            inner.last_refill = now;
        }
    }

    /// Try to take `n` tokens without waiting. Returns `true` on success.
    pub fn try_acquire(&self, n: u32) -> bool {
        let mut inner = self.inner.lock();
        self.refill_locked(&mut inner);
        let n = n as f64;
        if inner.tokens >= n {
            inner.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Block (in short sleeps) until `n` tokens are available or `timeout`
    /// elapses. Returns `true` on success, `false` on timeout.
    pub async fn acquire(&self, n: u32, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_acquire(n) {
                return true;
            }
            if Instant::now() >= deadline {
                debug!(n, "rate limiter timed out waiting for tokens");
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub fn available_tokens(&self) -> f64 {
        let mut inner = self.inner.lock();
        self.refill_locked(&mut inner);
        inner.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquires_up_to_capacity_immediately() {
        let bucket = TokenBucket::new(30, 5);
        for _ in 0..30 {
            assert!(bucket.try_acquire(1));
        }
        assert!(!bucket.try_acquire(1));
    }

    #[tokio::test]
    async fn waits_for_refill_within_timeout() {
        let bucket = TokenBucket::new(1, 20); // 20 tokens/sec refill
        assert!(bucket.try_acquire(1));
        // Bucket is empty; 20/s refill means ~50ms for one token.
        let acquired = bucket.acquire(1, Duration::from_millis(500)).await;
        assert!(acquired);
    }

    #[tokio::test]
    async fn times_out_when_refill_is_too_slow() {
        let bucket = TokenBucket::new(1, 1); // 1 token/sec
        assert!(bucket.try_acquire(1));
        let acquired = bucket.acquire(1, Duration::from_millis(50)).await;
        assert!(!acquired);
    }
}
