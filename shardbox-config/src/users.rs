use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Users allowed to talk to the server (`users.toml`).
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Users {
    #[serde(default)]
    pub users: Vec<User>,
}

impl Users {
    /// Sanity-check user entries. Users without a usable password hash
    /// can't authenticate at all.
    pub fn check(&mut self) {
        for user in &self.users {
            if !user.password.starts_with("$2") {
                warn!(
                    "user \"{}\" password is not a bcrypt hash; basic auth will fail",
                    user.name
                );
            }
            if user.name.chars().any(|c| c.is_whitespace()) {
                warn!("user \"{}\" contains whitespace", user.name);
            }
        }
    }

    pub fn find(&self, name: &str) -> Option<&User> {
        self.users.iter().find(|u| u.name == name)
    }
}

/// A user entry.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct User {
    /// User identifier.
    pub name: String,

    /// bcrypt hash of the user's password.
    pub password: String,

    /// Permissions, e.g. `["admin"]` or `["data.read:lib.*", "cache.*"]`.
    #[serde(default)]
    pub permissions: Vec<String>,

    /// Requests per rate-limit window, overriding the global default.
    pub max_uses: Option<u32>,
}

impl User {
    pub fn new(name: &str, password_hash: &str) -> Self {
        Self {
            name: name.to_owned(),
            password: password_hash.to_owned(),
            ..Default::default()
        }
    }
}

/// Generate a random alphanumeric string of length n.
pub fn random_string(n: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(n)
        .map(char::from)
        .collect()
}
