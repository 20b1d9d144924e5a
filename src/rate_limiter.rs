//! Token-bucket admission control for the summarizer endpoint.

use log::debug;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Window over which a full bucket refills.
pub const REFILL_WINDOW: Duration = Duration::from_secs(60);

/// A token bucket refilled lazily from the wall clock on every check.
pub struct RateLimiter {
    capacity: f64,
    window: Duration,
    inner: Mutex<Bucket>,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Creates a full bucket holding `capacity` tokens per minute.
    pub fn new(capacity: u32) -> Self {
        Self::with_window(capacity, REFILL_WINDOW, Instant::now())
    }

    pub fn with_window(capacity: u32, window: Duration, now: Instant) -> Self {
        RateLimiter {
            capacity: capacity as f64,
            window,
            inner: Mutex::new(Bucket {
                tokens: capacity as f64,
                last_refill: now,
            }),
        }
    }

    /// Takes `n` tokens if available. Returns whether the request is admitted.
    pub fn try_consume(&self, n: u32) -> bool {
        self.try_consume_at(n, Instant::now())
    }

    /// Same as [`try_consume`](Self::try_consume) with an explicit clock reading.
    pub fn try_consume_at(&self, n: u32, now: Instant) -> bool {
        let mut bucket = self.inner.lock();
        self.refill(&mut bucket, now);

        let wanted = n as f64;
        if bucket.tokens >= wanted {
            bucket.tokens -= wanted;
            true
        } else {
            debug!(
                "Rate limited: wanted {} tokens, {:.2} available.",
                n, bucket.tokens
            );
            false
        }
    }

    /// Tokens available at `now`, after refill.
    pub fn available_at(&self, now: Instant) -> f64 {
        let mut bucket = self.inner.lock();
        self.refill(&mut bucket, now);
        bucket.tokens
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        // A clock reading older than the last refill adds nothing.
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let rate = self.capacity / self.window.as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * rate).min(self.capacity);
        if now > bucket.last_refill {
            bucket.last_refill = now;
        }
    }
}
