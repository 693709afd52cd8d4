//! Administrative actions: runtime tunables and the IP abuse filter.

use std::net::IpAddr;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use hyper::Method;
use serde_json::{json, Value};

use crate::dispatch::action::{update_method, Action, ActionRequest};
use crate::dispatch::context::Context;
use crate::dispatch::error::ApiError;
use crate::ipfilter::IpFilter;
use crate::storage::settings::settings;

fn settings_snapshot(ip_filter: &IpFilter) -> Value {
    let settings = settings();
    json!({
        "max_records_per_shard": settings.max_records_per_shard(),
        "records_per_token_worker": settings.records_per_token_worker(),
        "max_token_workers": settings.max_token_workers(),
        "shard_load_budget": settings.shard_load_budget(),
        "ban_after_flags": ip_filter.ban_after_flags(),
    })
}

/// GET /admin/settings
pub struct SettingsInfo;

#[async_trait]
impl Action for SettingsInfo {
    fn name(&self) -> &'static str {
        "settings_info"
    }

    fn method(&self) -> Method {
        Method::GET
    }

    fn permission_op(&self) -> &'static str {
        "admin.settings"
    }

    async fn execute(&self, ctx: &Context, _request: ActionRequest) -> Result<Value, ApiError> {
        Ok(settings_snapshot(&ctx.ip_filter))
    }
}

/// UPDATE /admin/settings?key=<name>&value=<value>
///
/// Adjusts one process-wide tunable; the change takes effect on next use.
pub struct SettingsUpdate;

#[async_trait]
impl Action for SettingsUpdate {
    fn name(&self) -> &'static str {
        "settings_update"
    }

    fn method(&self) -> Method {
        update_method()
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["key", "value"]
    }

    fn permission_op(&self) -> &'static str {
        "admin.settings"
    }

    async fn execute(&self, ctx: &Context, request: ActionRequest) -> Result<Value, ApiError> {
        let key = request.args.require("key")?;
        let value = request.args.require("value")?;

        let parse_err = || ApiError::validation(format!("\"{}\" is not a valid value", value));

        match key {
            "max_records_per_shard" => {
                let parsed: i64 = value.parse().map_err(|_| parse_err())?;
                settings()
                    .max_records_per_shard
                    .store(parsed.max(-1), Ordering::Relaxed);
            }
            "records_per_token_worker" => {
                let parsed: usize = value.parse().map_err(|_| parse_err())?;
                settings()
                    .records_per_token_worker
                    .store(parsed.max(1), Ordering::Relaxed);
            }
            "max_token_workers" => {
                let parsed: usize = value.parse().map_err(|_| parse_err())?;
                settings()
                    .max_token_workers
                    .store(parsed.max(1), Ordering::Relaxed);
            }
            "shard_load_budget" => {
                let parsed: u64 = value.parse().map_err(|_| parse_err())?;
                settings().shard_load_budget.store(parsed, Ordering::Relaxed);
            }
            "ban_after_flags" => {
                let parsed: u32 = value.parse().map_err(|_| parse_err())?;
                ctx.ip_filter.set_ban_after_flags(parsed);
            }
            _ => {
                return Err(ApiError::validation(format!(
                    "unknown setting \"{}\"",
                    key
                )))
            }
        }

        Ok(settings_snapshot(&ctx.ip_filter))
    }
}

fn parse_ip(value: &str) -> Result<IpAddr, ApiError> {
    value
        .parse()
        .map_err(|_| ApiError::validation(format!("\"{}\" is not an IP literal", value)))
}

/// GET /admin/ipfilter?ip=<addr>
pub struct IpFilterInfo;

#[async_trait]
impl Action for IpFilterInfo {
    fn name(&self) -> &'static str {
        "ipfilter_info"
    }

    fn method(&self) -> Method {
        Method::GET
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["ip"]
    }

    fn permission_op(&self) -> &'static str {
        "admin.ipfilter"
    }

    async fn execute(&self, ctx: &Context, request: ActionRequest) -> Result<Value, ApiError> {
        let ip = parse_ip(request.args.require("ip")?)?;
        Ok(json!({
            "ip": ip.to_string(),
            "banned": ctx.ip_filter.is_banned(ip),
            "allowed": ctx.ip_filter.is_allowed(ip),
            "flags": ctx.ip_filter.flag_count(ip),
        }))
    }
}

/// UPDATE /admin/ipfilter?ip=<addr>&action=<ban|extend|unban|flag|allow|disallow>
///        [&duration=<seconds>]
///
/// `ban` without a duration is permanent; `extend` requires one.
pub struct IpFilterUpdate;

#[async_trait]
impl Action for IpFilterUpdate {
    fn name(&self) -> &'static str {
        "ipfilter_update"
    }

    fn method(&self) -> Method {
        update_method()
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["ip", "action"]
    }

    fn permission_op(&self) -> &'static str {
        "admin.ipfilter"
    }

    async fn execute(&self, ctx: &Context, request: ActionRequest) -> Result<Value, ApiError> {
        let ip = parse_ip(request.args.require("ip")?)?;
        let action = request.args.require("action")?;

        let duration = match request.args.get("duration") {
            Some(duration) => {
                let seconds: u64 = duration.parse().map_err(|_| {
                    ApiError::validation("\"duration\" must be a number of seconds")
                })?;
                Some(Duration::from_secs(seconds))
            }
            None => None,
        };

        match action {
            "ban" => ctx.ip_filter.ban(ip, duration),
            "extend" => {
                let duration = duration
                    .ok_or_else(|| ApiError::validation("\"duration\" argument is missing"))?;
                ctx.ip_filter.extend_ban(ip, duration);
            }
            "unban" => ctx.ip_filter.unban(ip),
            "flag" => ctx.ip_filter.flag(ip),
            "allow" => ctx.ip_filter.allow(ip),
            "disallow" => ctx.ip_filter.disallow(ip),
            _ => {
                return Err(ApiError::validation(format!(
                    "unknown action \"{}\"",
                    action
                )))
            }
        }

        if let Err(err) = ctx.ip_filter.persist() {
            tracing::warn!("ipbanmanager persist failed: {}", err);
        }

        Ok(json!({
            "ip": ip.to_string(),
            "banned": ctx.ip_filter.is_banned(ip),
            "allowed": ctx.ip_filter.is_allowed(ip),
            "flags": ctx.ip_filter.flag_count(ip),
        }))
    }
}
