use crate::error::AppError;
use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Clone)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

impl Bucket {
    fn full(capacity: u32) -> Self {
        Self {
            tokens: capacity as f64,
            last_update: Instant::now(),
        }
    }

    fn allow_request(&mut self, capacity: u32, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = f64::min(capacity as f64, self.tokens + elapsed * refill_rate);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn is_refilled(&self, capacity: u32, refill_rate: f64, now: Instant) -> bool {
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens + elapsed * refill_rate >= capacity as f64
    }
}

/// Token buckets keyed by submitting user.
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    capacity: u32,
    refill_rate: f64,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity,
            refill_rate,
        }
    }

    pub fn check(&self, key: &str) -> Result<(), AppError> {
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::full(self.capacity));

        if bucket.allow_request(self.capacity, self.refill_rate) {
            Ok(())
        } else {
            Err(AppError::RateLimitExceeded(format!(
                "Too many orders from {}",
                key
            )))
        }
    }

    /// Forget buckets that are full again or untouched for `max_idle`.
    /// A full bucket behaves exactly like a missing one.
    pub fn sweep(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            now.duration_since(bucket.last_update) < max_idle
                && !bucket.is_refilled(self.capacity, self.refill_rate, now)
        });
        before.saturating_sub(self.buckets.len())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.buckets.len()
    }
}
