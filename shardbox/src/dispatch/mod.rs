//! Request dispatch: a tree keyed by URL path segments, a per-request
//! check pipeline, and the registered actions.
//!
//! Check order on every request: resolve the path (400), verb (405),
//! required arguments (400), body requirement (400/406/422), auth mode
//! (403), permission (403), then execute.

pub mod action;
pub mod actions;
pub mod args;
pub mod context;
pub mod error;

pub use action::{Action, ActionRequest};
pub use args::Args;
pub use context::Context;
pub use error::{ApiError, Kind};

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use hyper::Method;
use serde_json::Value;
use tracing::debug;

use crate::auth::AuthedUser;

#[derive(Default)]
struct Node {
    children: HashMap<String, Node>,
    /// Leaf actions, distinguished by verb.
    actions: Vec<Arc<dyn Action>>,
}

/// Everything the pipeline needs from the parsed HTTP request.
pub struct RequestParts {
    pub method: Method,
    pub segments: Vec<String>,
    pub args: Args,
    /// `Content-Type: application/json` was supplied.
    pub json_content: bool,
    pub body: Option<Bytes>,
    pub authed: AuthedUser,
}

pub struct Dispatcher {
    root: Node,
}

impl Dispatcher {
    /// Build the tree with every registered action.
    pub fn new() -> Self {
        let mut dispatcher = Self {
            root: Node::default(),
        };

        for (path, action) in actions::all() {
            dispatcher.register(path, action);
        }

        dispatcher
    }

    fn register(&mut self, path: &str, action: Arc<dyn Action>) {
        let mut node = &mut self.root;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            node = node.children.entry(segment.to_lowercase()).or_default();
        }
        node.actions.push(action);
    }

    fn resolve(&self, segments: &[String]) -> Option<&Vec<Arc<dyn Action>>> {
        let mut node = &self.root;
        for segment in segments {
            node = node.children.get(&segment.to_lowercase())?;
        }
        if node.actions.is_empty() {
            None
        } else {
            Some(&node.actions)
        }
    }

    /// Run the check pipeline and execute the matched action.
    pub async fn dispatch(
        &self,
        ctx: &Context,
        request: RequestParts,
    ) -> Result<Value, ApiError> {
        let leaf = self
            .resolve(&request.segments)
            .ok_or_else(|| ApiError::validation("unknown action"))?;

        let action = leaf
            .iter()
            .find(|action| action.method() == request.method)
            .ok_or_else(|| {
                ApiError::new(Kind::MethodNotAllowed, "verb not supported by this action")
            })?;

        for name in action.required_args() {
            if request.args.get(name).is_none() {
                return Err(ApiError::validation(format!(
                    "\"{}\" argument is missing",
                    name
                )));
            }
        }

        let body = parse_body(action.as_ref(), &request)?;

        if !action.auth_modes().contains(&request.authed.mode) {
            return Err(ApiError::new(
                Kind::AuthInvalid,
                "authentication mode not accepted by this action",
            ));
        }

        if !action.permitted(&request.authed.user, &request.args) {
            return Err(ApiError::new(Kind::AuthInvalid, "permission denied"));
        }

        debug!(
            action = action.name(),
            user = request.authed.user.name(),
            "dispatch"
        );

        action
            .execute(
                ctx,
                ActionRequest {
                    args: request.args,
                    body,
                    user: request.authed.user.clone(),
                },
            )
            .await
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Body checks: required presence, content type, JSON syntax. A body on
/// an action that doesn't require one is still parsed when present.
fn parse_body(action: &dyn Action, request: &RequestParts) -> Result<Option<Value>, ApiError> {
    let present = request.body.as_ref().map(|b| !b.is_empty()).unwrap_or(false);

    if action.needs_body() && !present {
        return Err(ApiError::new(Kind::PayloadRequired, "a JSON body is required"));
    }

    if !present {
        return Ok(None);
    }

    if !request.json_content {
        return Err(ApiError::new(
            Kind::Unsupported,
            "Content-Type must be application/json",
        ));
    }

    let body = request.body.as_ref().unwrap();
    let value = serde_json::from_slice(body)
        .map_err(|err| ApiError::new(Kind::BodyParse, format!("malformed JSON: {}", err)))?;
    Ok(Some(value))
}

/// Split a request path into its segments.
pub fn path_segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_segments() {
        assert_eq!(path_segments("/data/db/table"), vec!["data", "db", "table"]);
        assert_eq!(path_segments("/"), Vec::<String>::new());
        assert_eq!(path_segments("//cache//data"), vec!["cache", "data"]);
    }

    #[test]
    fn test_resolve() {
        let dispatcher = Dispatcher::new();

        assert!(dispatcher.resolve(&path_segments("/data/db")).is_some());
        assert!(dispatcher
            .resolve(&path_segments("/data/db/table/dataset"))
            .is_some());
        assert!(dispatcher.resolve(&path_segments("/cache/data")).is_some());
        assert!(dispatcher.resolve(&path_segments("/nope")).is_none());
        // Interior node without actions is not a leaf.
        assert!(dispatcher.resolve(&path_segments("/data")).is_none());
    }

    #[test]
    fn test_resolve_case_insensitive_path() {
        let dispatcher = Dispatcher::new();
        assert!(dispatcher.resolve(&path_segments("/Data/DB")).is_some());
    }
}
