//! Global configuration access.
//!
//! The loaded [`ConfigAndUsers`] sits behind an `ArcSwap`: readers grab a
//! cheap snapshot, reloads swap atomically. TLS is re-validated before a
//! reload takes effect.

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use thiserror::Error;
use tracing::info;

pub use shardbox_config::{Config, ConfigAndUsers, Users};

static CONFIG: Lazy<ArcSwap<ConfigAndUsers>> =
    Lazy::new(|| ArcSwap::from_pointee(ConfigAndUsers::default()));

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Config(#[from] shardbox_config::Error),

    #[error("{0}")]
    Net(#[from] crate::net::Error),
}

/// Current configuration snapshot.
pub fn config() -> Arc<ConfigAndUsers> {
    CONFIG.load_full()
}

/// Replace the configuration.
pub fn set(config: ConfigAndUsers) -> Arc<ConfigAndUsers> {
    CONFIG.store(Arc::new(config));
    CONFIG.load_full()
}

/// Load configuration from disk and install it.
pub fn load(config_path: &PathBuf, users_path: &PathBuf) -> Result<Arc<ConfigAndUsers>, Error> {
    let config = ConfigAndUsers::load(config_path, users_path)?;
    Ok(set(config))
}

/// Reload from the paths the config was originally loaded from.
/// Called on SIGHUP.
pub fn reload() -> Result<(), Error> {
    let current = config();
    let fresh = ConfigAndUsers::load(&current.config_path, &current.users_path)?;
    set(fresh);
    crate::net::tls::reload()?;
    info!("configuration reloaded");
    Ok(())
}
