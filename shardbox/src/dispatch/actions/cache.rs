//! Actions over the ephemeral cache store.

use std::time::Duration;

use async_trait::async_trait;
use hyper::Method;
use serde_json::{json, Value};

use crate::dispatch::action::{Action, ActionRequest};
use crate::dispatch::args::Args;
use crate::dispatch::context::Context;
use crate::dispatch::error::ApiError;

fn cache_scope(args: &Args) -> String {
    args.get("cache")
        .or_else(|| args.get("identifier"))
        .unwrap_or("*")
        .to_lowercase()
}

/// PUT /cache?identifier=<cache>
pub struct CacheCreate;

#[async_trait]
impl Action for CacheCreate {
    fn name(&self) -> &'static str {
        "cache_create"
    }

    fn method(&self) -> Method {
        Method::PUT
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["identifier"]
    }

    fn permission_op(&self) -> &'static str {
        "cache.admin"
    }

    fn scope(&self, args: &Args) -> String {
        cache_scope(args)
    }

    async fn execute(&self, ctx: &Context, request: ActionRequest) -> Result<Value, ApiError> {
        let cache = ctx.caches.create(request.args.require("identifier")?)?;
        Ok(json!({"cache": cache.identifier(), "created": true}))
    }
}

/// GET /cache[?identifier=<cache>]
pub struct CacheInfo;

#[async_trait]
impl Action for CacheInfo {
    fn name(&self) -> &'static str {
        "cache_info"
    }

    fn method(&self) -> Method {
        Method::GET
    }

    fn permission_op(&self) -> &'static str {
        "cache.read"
    }

    fn scope(&self, args: &Args) -> String {
        cache_scope(args)
    }

    async fn execute(&self, ctx: &Context, request: ActionRequest) -> Result<Value, ApiError> {
        match request.args.get("identifier") {
            Some(identifier) => {
                let cache = ctx.caches.cache(identifier)?;
                Ok(json!({"cache": cache.identifier(), "entries": cache.len()}))
            }
            None => Ok(json!({"caches": ctx.caches.names()})),
        }
    }
}

/// DELETE /cache?identifier=<cache>
pub struct CacheDrop;

#[async_trait]
impl Action for CacheDrop {
    fn name(&self) -> &'static str {
        "cache_drop"
    }

    fn method(&self) -> Method {
        Method::DELETE
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["identifier"]
    }

    fn permission_op(&self) -> &'static str {
        "cache.admin"
    }

    fn scope(&self, args: &Args) -> String {
        cache_scope(args)
    }

    async fn execute(&self, ctx: &Context, request: ActionRequest) -> Result<Value, ApiError> {
        let identifier = request.args.require("identifier")?;
        ctx.caches.delete(identifier)?;
        Ok(json!({"cache": identifier.to_lowercase(), "deleted": true}))
    }
}

/// PUT /cache/data?cache=<cache>&identifier=<id>[&ttl=<seconds>]
pub struct CacheEntrySet;

#[async_trait]
impl Action for CacheEntrySet {
    fn name(&self) -> &'static str {
        "cache_entry_set"
    }

    fn method(&self) -> Method {
        Method::PUT
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["cache", "identifier"]
    }

    fn needs_body(&self) -> bool {
        true
    }

    fn permission_op(&self) -> &'static str {
        "cache.write"
    }

    fn scope(&self, args: &Args) -> String {
        cache_scope(args)
    }

    async fn execute(&self, ctx: &Context, request: ActionRequest) -> Result<Value, ApiError> {
        let cache = ctx.caches.cache(request.args.require("cache")?)?;
        let identifier = request.args.require("identifier")?;

        let ttl = match request.args.get("ttl") {
            Some(ttl) => {
                let seconds: u64 = ttl
                    .parse()
                    .map_err(|_| ApiError::validation("\"ttl\" must be a number of seconds"))?;
                Some(Duration::from_secs(seconds))
            }
            None => None,
        };

        let body = request.body.expect("needs_body actions always get one");
        let entry = cache.set(identifier, body, ttl);

        Ok(json!({
            "cache": entry.cache,
            "identifier": entry.identifier,
            "isValidUntil": entry.valid_until,
        }))
    }
}

/// GET /cache/data?cache=<cache>&identifier=<id>
pub struct CacheEntryGet;

#[async_trait]
impl Action for CacheEntryGet {
    fn name(&self) -> &'static str {
        "cache_entry_get"
    }

    fn method(&self) -> Method {
        Method::GET
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["cache", "identifier"]
    }

    fn permission_op(&self) -> &'static str {
        "cache.read"
    }

    fn scope(&self, args: &Args) -> String {
        cache_scope(args)
    }

    async fn execute(&self, ctx: &Context, request: ActionRequest) -> Result<Value, ApiError> {
        let cache = ctx.caches.cache(request.args.require("cache")?)?;
        Ok(cache.get(request.args.require("identifier")?)?)
    }
}

/// DELETE /cache/data?cache=<cache>&identifier=<id>
pub struct CacheEntryDelete;

#[async_trait]
impl Action for CacheEntryDelete {
    fn name(&self) -> &'static str {
        "cache_entry_delete"
    }

    fn method(&self) -> Method {
        Method::DELETE
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["cache", "identifier"]
    }

    fn permission_op(&self) -> &'static str {
        "cache.write"
    }

    fn scope(&self, args: &Args) -> String {
        cache_scope(args)
    }

    async fn execute(&self, ctx: &Context, request: ActionRequest) -> Result<Value, ApiError> {
        let cache = ctx.caches.cache(request.args.require("cache")?)?;
        let identifier = request.args.require("identifier")?;
        cache.delete(identifier)?;
        Ok(json!({"identifier": identifier.to_lowercase(), "deleted": true}))
    }
}

/// DELETE /cache/clear?cache=<cache>
pub struct CacheClear;

#[async_trait]
impl Action for CacheClear {
    fn name(&self) -> &'static str {
        "cache_clear"
    }

    fn method(&self) -> Method {
        Method::DELETE
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["cache"]
    }

    fn permission_op(&self) -> &'static str {
        "cache.write"
    }

    fn scope(&self, args: &Args) -> String {
        cache_scope(args)
    }

    async fn execute(&self, ctx: &Context, request: ActionRequest) -> Result<Value, ApiError> {
        let cache = ctx.caches.cache(request.args.require("cache")?)?;
        cache.clear();
        Ok(json!({"cache": cache.identifier(), "cleared": true}))
    }
}
