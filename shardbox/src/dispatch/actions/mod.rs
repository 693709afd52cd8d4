//! Registered actions, keyed by URL path.

pub mod admin;
pub mod auth;
pub mod cache;
pub mod data;

use std::sync::Arc;

use super::action::Action;

/// Every action and the path it lives under.
pub fn all() -> Vec<(&'static str, Arc<dyn Action>)> {
    vec![
        // Durable hierarchy.
        ("/data/db", Arc::new(data::DatabaseCreate)),
        ("/data/db", Arc::new(data::DatabaseInfo)),
        ("/data/db", Arc::new(data::DatabaseDrop)),
        ("/data/db/table", Arc::new(data::TableCreate)),
        ("/data/db/table", Arc::new(data::TableInfo)),
        ("/data/db/table", Arc::new(data::TableDrop)),
        ("/data/db/table/resolve", Arc::new(data::TableResolve)),
        ("/data/db/table/dataset", Arc::new(data::DatasetPut)),
        ("/data/db/table/dataset", Arc::new(data::DatasetGet)),
        ("/data/db/table/dataset", Arc::new(data::DatasetUpdate)),
        ("/data/db/table/dataset", Arc::new(data::DatasetDelete)),
        // Ephemeral caches.
        ("/cache", Arc::new(cache::CacheCreate)),
        ("/cache", Arc::new(cache::CacheInfo)),
        ("/cache", Arc::new(cache::CacheDrop)),
        ("/cache/data", Arc::new(cache::CacheEntrySet)),
        ("/cache/data", Arc::new(cache::CacheEntryGet)),
        ("/cache/data", Arc::new(cache::CacheEntryDelete)),
        ("/cache/clear", Arc::new(cache::CacheClear)),
        // Administration.
        ("/admin/settings", Arc::new(admin::SettingsInfo)),
        ("/admin/settings", Arc::new(admin::SettingsUpdate)),
        ("/admin/ipfilter", Arc::new(admin::IpFilterInfo)),
        ("/admin/ipfilter", Arc::new(admin::IpFilterUpdate)),
        // Authentication.
        ("/auth/token", Arc::new(auth::TokenIssue)),
    ]
}
