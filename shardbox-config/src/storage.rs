use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Storage engine settings. Most of these seed process-wide tunables that
/// admin actions can adjust at runtime.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Storage {
    /// Records per shard before a new shard is created. `-1` disables
    /// sharding (one unbounded shard per table).
    ///
    /// _Default:_ `10000`
    #[serde(default = "Storage::max_records_per_shard")]
    pub max_records_per_shard: i64,

    /// Active records served by one update-token timer worker.
    ///
    /// _Default:_ `25000`
    #[serde(default = "Storage::records_per_token_worker")]
    pub records_per_token_worker: usize,

    /// Upper bound on update-token timer workers.
    ///
    /// _Default:_ `4`
    #[serde(default = "Storage::max_token_workers")]
    pub max_token_workers: usize,

    /// How often the shard sweeper runs, in milliseconds.
    ///
    /// _Default:_ `10000`
    #[serde(default = "Storage::default_sweep_interval")]
    pub sweep_interval: u64,

    /// A loaded shard idle longer than this is unloaded back to disk when
    /// the table allows adaptive loading. Milliseconds.
    ///
    /// _Default:_ `300000`
    #[serde(default = "Storage::default_idle_unload_after")]
    pub idle_unload_after: u64,

    /// How often auto-optimize merges partially filled shards, in
    /// milliseconds.
    ///
    /// _Default:_ `60000`
    #[serde(default = "Storage::default_optimize_interval")]
    pub optimize_interval: u64,
}

impl Storage {
    fn max_records_per_shard() -> i64 {
        10_000
    }

    fn records_per_token_worker() -> usize {
        25_000
    }

    fn max_token_workers() -> usize {
        4
    }

    fn default_sweep_interval() -> u64 {
        10_000
    }

    fn default_idle_unload_after() -> u64 {
        300_000
    }

    fn default_optimize_interval() -> u64 {
        60_000
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval)
    }

    pub fn idle_unload_after(&self) -> Duration {
        Duration::from_millis(self.idle_unload_after)
    }

    pub fn optimize_interval(&self) -> Duration {
        Duration::from_millis(self.optimize_interval)
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            max_records_per_shard: Self::max_records_per_shard(),
            records_per_token_worker: Self::records_per_token_worker(),
            max_token_workers: Self::max_token_workers(),
            sweep_interval: Self::default_sweep_interval(),
            idle_unload_after: Self::default_idle_unload_after(),
            optimize_interval: Self::default_optimize_interval(),
        }
    }
}
