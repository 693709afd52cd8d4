//! Authentication actions.

use async_trait::async_trait;
use hyper::Method;
use serde_json::{json, Value};

use crate::auth::{AuthMode, User};
use crate::dispatch::action::{Action, ActionRequest};
use crate::dispatch::args::Args;
use crate::dispatch::context::Context;
use crate::dispatch::error::ApiError;

/// GET /auth/token
///
/// Issues a fresh rolling login token, invalidating the previous one.
/// Basic auth only.
pub struct TokenIssue;

#[async_trait]
impl Action for TokenIssue {
    fn name(&self) -> &'static str {
        "token_issue"
    }

    fn method(&self) -> Method {
        Method::GET
    }

    fn auth_modes(&self) -> &'static [AuthMode] {
        &[AuthMode::Basic]
    }

    fn permission_op(&self) -> &'static str {
        "auth.token"
    }

    // Any authenticated caller may refresh their own token.
    fn permitted(&self, _user: &User, _args: &Args) -> bool {
        true
    }

    async fn execute(&self, _ctx: &Context, request: ActionRequest) -> Result<Value, ApiError> {
        let token = request.user.rotate_token();
        Ok(json!({
            "user": request.user.name(),
            "token": token,
        }))
    }
}
