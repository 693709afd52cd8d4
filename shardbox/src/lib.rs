//! Shardbox: a multi-tenant, TLS-fronted JSON document store and
//! ephemeral cache service.

pub mod auth;
pub mod cli;
pub mod config;
pub mod crypt;
pub mod dispatch;
pub mod frontend;
pub mod ipfilter;
pub mod limiter;
pub mod net;
pub mod sighup;
pub mod storage;

/// Set up logging. Safe to call more than once; tests lean on that.
pub fn logger() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}
