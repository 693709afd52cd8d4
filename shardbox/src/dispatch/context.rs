//! Shared handles every action executes against. Long-lived components
//! are passed through here instead of living in globals.

use std::sync::Arc;

use crate::auth::UserStore;
use crate::crypt::Crypt;
use crate::ipfilter::IpFilter;
use crate::limiter::RateLimits;
use crate::storage::{CacheStore, Registry};

use super::error::ApiError;

#[derive(Clone)]
pub struct Context {
    pub registry: Arc<Registry>,
    pub caches: Arc<CacheStore>,
    pub users: Arc<UserStore>,
    pub limits: Arc<RateLimits>,
    pub ip_filter: Arc<IpFilter>,
    pub crypt: Arc<Crypt>,
}

/// Run storage work on the blocking pool; shard operations do file I/O
/// under their locks.
pub async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, crate::storage::Error> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| ApiError::internal(format!("blocking task failed: {}", err)))?
        .map_err(Into::into)
}
