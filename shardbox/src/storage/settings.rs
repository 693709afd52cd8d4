//! Process-wide storage tunables.
//!
//! Seeded from `shardbox.toml` at boot, adjustable by admin actions at
//! runtime. Changes take effect on next use.

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};

use once_cell::sync::Lazy;
use shardbox_config::Config;

pub struct Settings {
    /// Records per shard; -1 disables sharding.
    pub max_records_per_shard: AtomicI64,
    /// Active records served by one token timer worker.
    pub records_per_token_worker: AtomicUsize,
    /// Upper bound on token timer workers.
    pub max_token_workers: AtomicUsize,
    /// Byte budget for resident shard data.
    pub shard_load_budget: AtomicU64,
}

static SETTINGS: Lazy<Settings> = Lazy::new(|| Settings {
    max_records_per_shard: AtomicI64::new(10_000),
    records_per_token_worker: AtomicUsize::new(25_000),
    max_token_workers: AtomicUsize::new(4),
    shard_load_budget: AtomicU64::new(1024 * 1024 * 1024),
});

/// Records currently resident in memory, across all shards.
pub static ACTIVE_RECORDS: AtomicUsize = AtomicUsize::new(0);

/// Bytes of shard files currently loaded.
pub static LOADED_BYTES: AtomicU64 = AtomicU64::new(0);

pub fn settings() -> &'static Settings {
    &SETTINGS
}

/// Seed the tunables from configuration.
pub fn seed(config: &Config) {
    let settings = settings();
    settings
        .max_records_per_shard
        .store(config.storage.max_records_per_shard, Ordering::Relaxed);
    settings.records_per_token_worker.store(
        config.storage.records_per_token_worker.max(1),
        Ordering::Relaxed,
    );
    settings
        .max_token_workers
        .store(config.storage.max_token_workers.max(1), Ordering::Relaxed);
    settings
        .shard_load_budget
        .store(config.memory.shard_load_budget, Ordering::Relaxed);
}

impl Settings {
    pub fn max_records_per_shard(&self) -> i64 {
        self.max_records_per_shard.load(Ordering::Relaxed)
    }

    pub fn records_per_token_worker(&self) -> usize {
        self.records_per_token_worker.load(Ordering::Relaxed).max(1)
    }

    pub fn max_token_workers(&self) -> usize {
        self.max_token_workers.load(Ordering::Relaxed).max(1)
    }

    pub fn shard_load_budget(&self) -> u64 {
        self.shard_load_budget.load(Ordering::Relaxed)
    }

    /// Timer pool parallelism for the current record population.
    pub fn token_workers(&self) -> usize {
        worker_count(
            ACTIVE_RECORDS.load(Ordering::Relaxed),
            self.records_per_token_worker(),
            self.max_token_workers(),
        )
    }

    /// Memory headroom check before loading a shard file:
    /// `(shard_load_budget - loaded_bytes) * LOAD_HEADROOM >= file_size`.
    /// The budget is the raw configured byte count; the headroom factor
    /// is applied here and nowhere else.
    pub fn can_load(&self, file_size: u64) -> bool {
        headroom_ok(
            self.shard_load_budget(),
            LOADED_BYTES.load(Ordering::Relaxed),
            file_size,
        )
    }
}

/// Fraction of the remaining shard-load budget a new file may consume.
pub const LOAD_HEADROOM: f64 = 0.8;

/// `clamp(active / per_worker, 1, max_workers)`.
fn worker_count(active: usize, per_worker: usize, max_workers: usize) -> usize {
    (active / per_worker.max(1)).clamp(1, max_workers.max(1))
}

fn headroom_ok(budget: u64, loaded: u64, file_size: u64) -> bool {
    let available = budget.saturating_sub(loaded);
    (available as f64) * LOAD_HEADROOM >= file_size as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_count_clamped() {
        assert_eq!(worker_count(0, 1000, 4), 1);
        assert_eq!(worker_count(999, 1000, 4), 1);
        assert_eq!(worker_count(2_500, 1000, 4), 2);
        assert_eq!(worker_count(1_000_000, 1000, 4), 4);
        // Degenerate configuration still yields one worker.
        assert_eq!(worker_count(100, 0, 0), 1);
    }

    #[test]
    fn test_headroom_factor_applied_to_remaining_budget() {
        assert_eq!(LOAD_HEADROOM, 0.8);

        // The admission threshold is exactly (budget - loaded) * 0.8.
        assert!(headroom_ok(1000, 0, 800));
        assert!(!headroom_ok(1000, 0, 801));
        assert!(headroom_ok(1000, 500, 400));
        assert!(!headroom_ok(1000, 500, 401));
        // Over budget already.
        assert!(!headroom_ok(1000, 2000, 1));

        // The configured budget is raw bytes: a file the size of the
        // whole budget never fits, even with nothing loaded.
        assert!(!headroom_ok(1000, 0, 1000));
    }
}
