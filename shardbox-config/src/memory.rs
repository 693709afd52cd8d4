use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Memory {
    /// Byte budget for resident shard data. A shard file is only loaded
    /// while `(budget - loaded) * 0.8 >= file size`.
    #[serde(default = "default_shard_load_budget")]
    pub shard_load_budget: u64,

    /// Request bodies larger than this are rejected with 413.
    #[serde(default = "default_max_body")]
    pub max_body: usize,

    /// Request headers larger than this are rejected.
    #[serde(default = "default_max_headers")]
    pub max_headers: usize,
}

impl Default for Memory {
    fn default() -> Self {
        Self {
            shard_load_budget: default_shard_load_budget(),
            max_body: default_max_body(),
            max_headers: default_max_headers(),
        }
    }
}

// Default: 1GiB.
fn default_shard_load_budget() -> u64 {
    1024 * 1024 * 1024
}

// Default: 8MiB.
fn default_max_body() -> usize {
    8 * 1024 * 1024
}

// Default: 8KiB.
fn default_max_headers() -> usize {
    8 * 1024
}
