//! Runtime user store.
//!
//! Built from `users.toml`. The core treats users as opaque principals
//! with two capabilities: consuming from their rate-limit bucket and
//! answering permission checks of the form `(operation, scope)`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use shardbox_config::users::random_string;
use shardbox_config::Users;
use tracing::warn;

use crate::limiter::{Bucket, RateLimits, Taken};

/// A permission pattern: `operation[:scope]`, with `*` suffix wildcards
/// on dot-separated names. `admin` grants everything.
#[derive(Debug, Clone)]
struct Permission {
    op: String,
    scope: String,
}

impl Permission {
    fn parse(pattern: &str) -> Self {
        match pattern.split_once(':') {
            Some((op, scope)) => Self {
                op: op.to_lowercase(),
                scope: scope.to_lowercase(),
            },
            None => Self {
                op: pattern.to_lowercase(),
                scope: "*".into(),
            },
        }
    }

    fn grants(&self, op: &str, scope: &str) -> bool {
        if self.op == "admin" {
            return true;
        }
        wildcard_match(&self.op, op) && wildcard_match(&self.scope, scope)
    }
}

/// `*` matches anything; `a.b.*` matches `a.b` and anything below it;
/// otherwise exact.
fn wildcard_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix(".*") {
        Some(prefix) => value == prefix || value.starts_with(&format!("{}.", prefix)),
        None => pattern == value,
    }
}

pub struct User {
    name: String,
    password_hash: String,
    permissions: Vec<Permission>,
    bucket: Arc<Bucket>,
    login_token: Mutex<Option<String>>,
}

impl User {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Consume one request from the user's bucket.
    pub fn allow_processing(&self) -> Taken {
        self.bucket.take()
    }

    pub fn has_permission(&self, op: &str, scope: &str) -> bool {
        let op = op.to_lowercase();
        let scope = scope.to_lowercase();
        self.permissions.iter().any(|p| p.grants(&op, &scope))
    }

    pub fn verify_password(&self, password: &str) -> bool {
        bcrypt::verify(password, &self.password_hash).unwrap_or(false)
    }

    /// Issue a fresh login token, invalidating the previous one.
    pub fn rotate_token(&self) -> String {
        let token = random_string(48);
        *self.login_token.lock() = Some(token.clone());
        token
    }

    fn token_matches(&self, token: &str) -> bool {
        self.login_token
            .lock()
            .as_deref()
            .map(|t| t == token)
            .unwrap_or(false)
    }
}

pub struct UserStore {
    users: RwLock<HashMap<String, Arc<User>>>,
}

impl UserStore {
    /// Build the store from configuration. Buckets come from the shared
    /// rate-limit registry so reloads keep their fill level.
    pub fn load(config: &Users, limits: Arc<RateLimits>) -> Self {
        let mut users = HashMap::new();

        for entry in &config.users {
            if users.contains_key(&entry.name) {
                warn!("duplicate user \"{}\" ignored", entry.name);
                continue;
            }

            users.insert(
                entry.name.clone(),
                Arc::new(User {
                    name: entry.name.clone(),
                    password_hash: entry.password.clone(),
                    permissions: entry.permissions.iter().map(|p| Permission::parse(p)).collect(),
                    bucket: limits.bucket(&entry.name, entry.max_uses),
                    login_token: Mutex::new(None),
                }),
            );
        }

        Self {
            users: RwLock::new(users),
        }
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<User>> {
        self.users.read().get(name).cloned()
    }

    /// Find the user holding a login token.
    pub fn by_token(&self, token: &str) -> Option<Arc<User>> {
        self.users
            .read()
            .values()
            .find(|user| user.token_matches(token))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(permissions: &[&str]) -> User {
        User {
            name: "alice".into(),
            password_hash: String::new(),
            permissions: permissions.iter().map(|p| Permission::parse(p)).collect(),
            bucket: Arc::new(Bucket::new(60_000, 10)),
            login_token: Mutex::new(None),
        }
    }

    #[test]
    fn test_admin_grants_everything() {
        let user = user(&["admin"]);
        assert!(user.has_permission("data.write", "lib.books"));
        assert!(user.has_permission("admin.settings", "*"));
    }

    #[test]
    fn test_scoped_permission() {
        let user = user(&["data.read:lib.*", "cache.*"]);

        assert!(user.has_permission("data.read", "lib"));
        assert!(user.has_permission("data.read", "lib.books"));
        assert!(!user.has_permission("data.read", "other.books"));
        assert!(!user.has_permission("data.write", "lib.books"));

        assert!(user.has_permission("cache.read", "session"));
        assert!(user.has_permission("cache.write", "session"));
        assert!(!user.has_permission("admin.settings", "*"));
    }

    #[test]
    fn test_case_insensitive() {
        let user = user(&["data.read:LIB.*"]);
        assert!(user.has_permission("DATA.READ", "Lib.Books"));
    }

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("a.*", "a"));
        assert!(wildcard_match("a.*", "a.b.c"));
        assert!(!wildcard_match("a.*", "ab"));
        assert!(wildcard_match("a.b", "a.b"));
        assert!(!wildcard_match("a.b", "a.b.c"));
    }
}
