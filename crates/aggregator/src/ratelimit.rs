//! Per-engine token buckets.
//!
//! Acquisition is non-blocking: a request that finds no token is skipped
//! and recorded as rate-limited rather than queued, so one slow engine
//! cannot back up the fan-out.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token buckets keyed by engine name. Refill rate is the engine's
/// advertised requests/second; burst capacity is `max(1, rate)`.
pub struct RateLimiterMap {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiterMap {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Take one token for `engine` if available. A rate of zero (or less)
    /// means the engine is unlimited.
    pub fn try_acquire(&self, engine: &str, rate: f64) -> bool {
        if rate <= 0.0 {
            return true;
        }
        let burst = rate.max(1.0);
        let now = Instant::now();

        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(engine.to_string()).or_insert(Bucket {
            tokens: burst,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate).min(burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

impl Default for RateLimiterMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn zero_rate_is_unlimited() {
        let map = RateLimiterMap::new();
        for _ in 0..1000 {
            assert!(map.try_acquire("free", 0.0));
        }
    }

    #[test]
    fn burst_is_at_least_one() {
        let map = RateLimiterMap::new();
        // 0.5 req/s still allows one immediate call.
        assert!(map.try_acquire("slow", 0.5));
        assert!(!map.try_acquire("slow", 0.5), "bucket drained");
    }

    #[test]
    fn burst_scales_with_rate() {
        let map = RateLimiterMap::new();
        for i in 0..5 {
            assert!(map.try_acquire("fast", 5.0), "token {i} within burst");
        }
        assert!(!map.try_acquire("fast", 5.0));
    }

    #[test]
    fn tokens_refill_over_time() {
        let map = RateLimiterMap::new();
        assert!(map.try_acquire("e", 1.0));
        assert!(!map.try_acquire("e", 1.0));
        std::thread::sleep(Duration::from_millis(1100));
        assert!(map.try_acquire("e", 1.0), "one token refilled after ~1s");
    }

    #[test]
    fn buckets_are_independent_per_engine() {
        let map = RateLimiterMap::new();
        assert!(map.try_acquire("a", 1.0));
        assert!(map.try_acquire("b", 1.0), "engine b has its own bucket");
    }
}
