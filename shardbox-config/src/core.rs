use serde::{Deserialize, Serialize};
use std::fs::read_to_string;
use std::path::PathBuf;
use tracing::{info, warn};

use super::error::Error;
use super::general::General;
use super::limits::{IpFilter, RateLimit};
use super::memory::Memory;
use super::storage::Storage;
use super::users::Users;

#[derive(Debug, Clone)]
pub struct ConfigAndUsers {
    /// shardbox.toml
    pub config: Config,
    /// users.toml
    pub users: Users,
    /// Path to shardbox.toml.
    pub config_path: PathBuf,
    /// Path to users.toml.
    pub users_path: PathBuf,
}

impl ConfigAndUsers {
    /// Load configuration from disk or use defaults.
    pub fn load(config_path: &PathBuf, users_path: &PathBuf) -> Result<Self, Error> {
        let config: Config = if let Ok(config) = read_to_string(config_path) {
            let config = match toml::from_str(&config) {
                Ok(config) => config,
                Err(err) => return Err(Error::config(&config, err)),
            };
            info!("loaded \"{}\"", config_path.display());
            config
        } else {
            warn!(
                "\"{}\" doesn't exist, loading defaults instead",
                config_path.display()
            );
            Config::default()
        };

        let users: Users = if let Ok(users) = read_to_string(users_path) {
            let mut users: Users = toml::from_str(&users)?;
            users.check();
            info!("loaded \"{}\"", users_path.display());
            users
        } else {
            warn!(
                "\"{}\" doesn't exist, loading defaults instead",
                users_path.display()
            );
            Users::default()
        };

        Ok(ConfigAndUsers {
            config,
            users,
            config_path: config_path.to_owned(),
            users_path: users_path.to_owned(),
        })
    }
}

impl Default for ConfigAndUsers {
    fn default() -> Self {
        Self {
            config: Config::default(),
            users: Users::default(),
            config_path: PathBuf::from("shardbox.toml"),
            users_path: PathBuf::from("users.toml"),
        }
    }
}

/// Configuration.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// General configuration.
    #[serde(default)]
    pub general: General,

    /// Storage engine.
    #[serde(default)]
    pub storage: Storage,

    /// Memory limits.
    #[serde(default)]
    pub memory: Memory,

    /// Rate limiter.
    #[serde(default)]
    pub rate_limit: RateLimit,

    /// IP abuse filter.
    #[serde(default)]
    pub ip_filter: IpFilter,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.general.port, 9101);
        assert_eq!(config.storage.max_records_per_shard, 10_000);
        assert_eq!(config.ip_filter.ban_after_flags, 10);
        assert_eq!(config.memory.max_body, 8 * 1024 * 1024);
    }

    #[test]
    fn test_parse() {
        let toml = r#"
[general]
host = "127.0.0.1"
port = 9200
tls_certificate = "tests/tls/cert.pem"
tls_private_key = "tests/tls/key.pem"

[storage]
max_records_per_shard = 500

[rate_limit]
default_max_uses = 5
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.general.port, 9200);
        assert!(config.general.tls().is_some());
        assert_eq!(config.storage.max_records_per_shard, 500);
        assert_eq!(config.rate_limit.default_max_uses, 5);
        // Untouched sections keep defaults.
        assert_eq!(config.storage.max_token_workers, 4);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let toml = r#"
[general]
hots = "127.0.0.1"
"#;
        assert!(toml::from_str::<Config>(toml).is_err());
    }
}
