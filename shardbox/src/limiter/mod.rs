//! Rate limiting for request processing.
//!
//! Each principal gets a token bucket with sliding refill: a window `W`
//! milliseconds wide, a per-request cost `c = W / max_uses` and a cursor
//! `F`. Taking advances `F` to `max(F, now) + c`, clamped at `now + 2W`,
//! and the request fits iff `F <= now + W`. A cold bucket absorbs a burst
//! of up to `2 * max_uses`, but the sustained rate can't exceed `max_uses`
//! per window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};

/// Milliseconds since process start. Monotonic, shared by all buckets.
fn now_ms() -> u64 {
    static START: Lazy<Instant> = Lazy::new(Instant::now);
    START.elapsed().as_millis() as u64
}

/// Outcome of a bucket consumption, reported back in response headers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Taken {
    /// The request fits within the sustained rate.
    pub fit: bool,
    /// Bucket capacity per window.
    pub limit: u32,
    /// Requests left before the bucket is empty.
    pub remaining: u32,
    /// When the cursor falls back inside the window, in epoch-relative ms.
    pub reset: u64,
}

/// Token bucket with sliding refill.
#[derive(Debug)]
pub struct Bucket {
    window: u64,
    max_uses: u32,
    cursor: Mutex<f64>,
}

impl Bucket {
    pub fn new(window_ms: u64, max_uses: u32) -> Self {
        Self {
            window: window_ms.max(1),
            max_uses: max_uses.max(1),
            cursor: Mutex::new(0.0),
        }
    }

    fn cost(&self) -> f64 {
        self.window as f64 / self.max_uses as f64
    }

    /// Consume one use. Always advances the cursor, so hammering an empty
    /// bucket keeps it empty.
    pub fn take(&self) -> Taken {
        let now = now_ms() as f64;
        let window = self.window as f64;
        let cost = self.cost();

        let mut cursor = self.cursor.lock();
        let advanced = (cursor.max(now) + cost).min(now + 2.0 * window);
        *cursor = advanced;

        let fit = advanced <= now + window;
        let remaining = ((now + window - advanced).max(0.0) / cost) as u32;

        Taken {
            fit,
            limit: self.max_uses,
            remaining,
            reset: advanced as u64,
        }
    }

    /// Peek without consuming.
    pub fn remaining(&self) -> u32 {
        let now = now_ms() as f64;
        let cursor = *self.cursor.lock();
        (((now + self.window as f64 - cursor).max(0.0)) / self.cost()) as u32
    }
}

/// Per-user bucket registry.
pub struct RateLimits {
    window: u64,
    default_max_uses: u32,
    buckets: RwLock<HashMap<String, Arc<Bucket>>>,
}

impl RateLimits {
    pub fn new(window_ms: u64, default_max_uses: u32) -> Self {
        Self {
            window: window_ms,
            default_max_uses,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the bucket for a principal. `max_uses` overrides the
    /// default on first creation.
    pub fn bucket(&self, principal: &str, max_uses: Option<u32>) -> Arc<Bucket> {
        if let Some(bucket) = self.buckets.read().get(principal) {
            return bucket.clone();
        }

        let mut buckets = self.buckets.write();
        buckets
            .entry(principal.to_owned())
            .or_insert_with(|| {
                Arc::new(Bucket::new(
                    self.window,
                    max_uses.unwrap_or(self.default_max_uses),
                ))
            })
            .clone()
    }

    /// Drop all buckets, e.g. after a config reload changed the window.
    pub fn clear(&self) {
        self.buckets.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cold_bucket_fits_max_uses() {
        let bucket = Bucket::new(60_000, 5);

        for _ in 0..5 {
            assert!(bucket.take().fit);
        }
    }

    #[test]
    fn test_burst_cap_is_twice_max_uses() {
        let bucket = Bucket::new(60_000, 5);

        let mut fits = 0;
        for _ in 0..100 {
            if bucket.take().fit {
                fits += 1;
            }
        }

        // Cold bucket plus the clamped overdraft.
        assert!(fits >= 5 && fits <= 10, "fits = {}", fits);
    }

    #[test]
    fn test_empty_bucket_rejects() {
        let bucket = Bucket::new(60_000, 3);

        for _ in 0..6 {
            bucket.take();
        }
        let taken = bucket.take();
        assert!(!taken.fit);
        assert_eq!(taken.remaining, 0);
    }

    #[test]
    fn test_remaining_counts_down() {
        let bucket = Bucket::new(60_000, 10);

        let first = bucket.take();
        let second = bucket.take();
        assert!(first.remaining > second.remaining);
    }

    #[test]
    fn test_reset_advances() {
        let bucket = Bucket::new(60_000, 2);
        let first = bucket.take();
        let second = bucket.take();
        assert!(second.reset >= first.reset);
    }

    #[test]
    fn test_registry_reuses_buckets() {
        let limits = RateLimits::new(60_000, 10);
        let a = limits.bucket("alice", None);
        let b = limits.bucket("alice", None);
        assert!(Arc::ptr_eq(&a, &b));

        let c = limits.bucket("bob", Some(3));
        assert_eq!(c.take().limit, 3);
    }

    #[test]
    fn test_per_principal_isolation() {
        let limits = RateLimits::new(60_000, 2);

        let alice = limits.bucket("alice", None);
        for _ in 0..4 {
            alice.take();
        }
        assert!(!alice.take().fit);

        let bob = limits.bucket("bob", None);
        assert!(bob.take().fit);
    }
}
