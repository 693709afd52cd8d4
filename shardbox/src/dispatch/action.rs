//! The uniform operation contract.
//!
//! Every registered action declares its verb, required URL arguments,
//! body requirement, accepted authentication modes and a permission
//! predicate. The dispatcher applies those checks in a fixed order before
//! execution.

use async_trait::async_trait;
use hyper::Method;
use serde_json::Value;
use std::sync::Arc;

use crate::auth::{AuthMode, User};

use super::args::Args;
use super::context::Context;
use super::error::ApiError;

/// What an action receives after the pipeline checks pass.
pub struct ActionRequest {
    pub args: Args,
    pub body: Option<Value>,
    pub user: Arc<User>,
}

#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &'static str;

    fn method(&self) -> Method;

    fn required_args(&self) -> &'static [&'static str] {
        &[]
    }

    fn needs_body(&self) -> bool {
        false
    }

    fn auth_modes(&self) -> &'static [AuthMode] {
        &[AuthMode::Token, AuthMode::Basic]
    }

    /// The operation name checked against the caller's permissions.
    fn permission_op(&self) -> &'static str;

    /// The permission scope, usually derived from the database/table
    /// arguments.
    fn scope(&self, args: &Args) -> String {
        match (args.get("database"), args.get("table")) {
            (Some(database), Some(table)) => format!("{}.{}", database, table).to_lowercase(),
            (Some(database), None) => database.to_lowercase(),
            _ => "*".into(),
        }
    }

    /// The uniform permission predicate. Individual actions may override
    /// it (e.g. token issuance is open to any authenticated caller).
    fn permitted(&self, user: &User, args: &Args) -> bool {
        user.has_permission(self.permission_op(), &self.scope(args))
    }

    async fn execute(&self, ctx: &Context, request: ActionRequest) -> Result<Value, ApiError>;
}

/// The custom verb for partial record updates.
pub fn update_method() -> Method {
    Method::from_bytes(b"UPDATE").expect("UPDATE is a valid method token")
}
