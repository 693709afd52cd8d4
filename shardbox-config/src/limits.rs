use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rate limiter defaults. Per-user bucket sizes in `users.toml` override
/// `default_max_uses`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RateLimit {
    /// Sliding window size, in milliseconds.
    ///
    /// _Default:_ `60000`
    #[serde(default = "RateLimit::window")]
    pub window: u64,

    /// Requests per window for users without an explicit bucket size.
    ///
    /// _Default:_ `240`
    #[serde(default = "RateLimit::default_max_uses")]
    pub default_max_uses: u32,
}

impl RateLimit {
    fn window() -> u64 {
        60_000
    }

    fn default_max_uses() -> u32 {
        240
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            window: Self::window(),
            default_max_uses: Self::default_max_uses(),
        }
    }
}

/// IP abuse filter settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct IpFilter {
    /// Flags before an IP is auto-banned for an hour.
    ///
    /// _Default:_ `10`
    #[serde(default = "IpFilter::ban_after_flags")]
    pub ban_after_flags: u32,

    /// How often flag counters decay by one, in milliseconds.
    ///
    /// _Default:_ `60000`
    #[serde(default = "IpFilter::default_decay_interval")]
    pub decay_interval: u64,

    /// How often expired bans are removed, in milliseconds.
    ///
    /// _Default:_ `1000`
    #[serde(default = "IpFilter::default_clean_interval")]
    pub clean_interval: u64,
}

impl IpFilter {
    fn ban_after_flags() -> u32 {
        10
    }

    fn default_decay_interval() -> u64 {
        60_000
    }

    fn default_clean_interval() -> u64 {
        1_000
    }

    pub fn decay_interval(&self) -> Duration {
        Duration::from_millis(self.decay_interval)
    }

    pub fn clean_interval(&self) -> Duration {
        Duration::from_millis(self.clean_interval)
    }
}

impl Default for IpFilter {
    fn default() -> Self {
        Self {
            ban_after_flags: Self::ban_after_flags(),
            decay_interval: Self::default_decay_interval(),
            clean_interval: Self::default_clean_interval(),
        }
    }
}
