//! Token-bucket rate limiter for the bridge-facing request surface (§6.5).
//!
//! The HTTP layer that sits in front of the bridge is out of scope, but the
//! engine ships the limiting algorithm itself: one bucket per caller key
//! (e.g. an API key or session id), refilled continuously at `refill_rate`
//! tokens/second up to `capacity`, with idle buckets evicted after
//! `bucket_ttl_ms` so a long-lived process doesn't accumulate one entry per
//! caller forever.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    /// Maximum tokens a bucket can hold (burst allowance).
    pub capacity: u64,
    /// Tokens added per second.
    pub refill_rate: f64,
    /// A bucket untouched for this long is evicted on the next `try_acquire`.
    pub bucket_ttl_ms: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self { capacity: 100, refill_rate: 10.0, bucket_ttl_ms: 60_000 }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl Bucket {
    fn new(capacity: u64, now: Instant) -> Self {
        Self { tokens: capacity as f64, last_refill: now, last_seen: now }
    }

    fn refill(&mut self, config: &RateLimiterConfig, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * config.refill_rate).min(config.capacity as f64);
            self.last_refill = now;
        }
    }
}

/// Per-key token bucket. One `RateLimiter` serves every caller the bridge
/// sees; callers are distinguished by whatever key string the embedder
/// passes to `try_acquire` (API key, session id, ...).
pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self { config, buckets: Mutex::new(HashMap::new()) }
    }

    /// Refills `key`'s bucket for elapsed time, then consumes one token if
    /// available. Also sweeps buckets idle past `bucket_ttl_ms`.
    pub fn try_acquire(&self, key: &str) -> bool {
        self.try_acquire_n(key, 1)
    }

    pub fn try_acquire_n(&self, key: &str, n: u64) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();

        let ttl = Duration::from_millis(self.config.bucket_ttl_ms);
        buckets.retain(|_, b| now.duration_since(b.last_seen) < ttl);

        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket::new(self.config.capacity, now));
        bucket.refill(&self.config, now);
        bucket.last_seen = now;

        let needed = n as f64;
        if bucket.tokens >= needed {
            bucket.tokens -= needed;
            true
        } else {
            false
        }
    }

    /// Number of buckets currently tracked (for monitoring/tests).
    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().len()
    }
}
