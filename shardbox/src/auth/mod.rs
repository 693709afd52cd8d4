//! Client authentication.
//!
//! Two modes: a rolling login token in the `Token` header, or HTTP basic
//! auth against the bcrypt hash in `users.toml`. Actions declare which
//! modes they accept.

pub mod users;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::sync::Arc;
use thiserror::Error;

pub use users::{User, UserStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Token,
    Basic,
}

/// A successfully authenticated caller and how they proved themselves.
#[derive(Clone)]
pub struct AuthedUser {
    pub user: Arc<User>,
    pub mode: AuthMode,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("authentication required")]
    Required,

    #[error("invalid credentials")]
    Invalid,
}

/// Authenticate from the two supported headers. `Token` wins when both
/// are present.
pub fn authenticate(
    store: &UserStore,
    token: Option<&str>,
    authorization: Option<&str>,
) -> Result<AuthedUser, Error> {
    if let Some(token) = token {
        let user = store.by_token(token).ok_or(Error::Invalid)?;
        return Ok(AuthedUser {
            user,
            mode: AuthMode::Token,
        });
    }

    if let Some(authorization) = authorization {
        let encoded = authorization
            .strip_prefix("Basic ")
            .or_else(|| authorization.strip_prefix("basic "))
            .ok_or(Error::Invalid)?;

        let decoded = BASE64.decode(encoded.trim()).map_err(|_| Error::Invalid)?;
        let decoded = String::from_utf8(decoded).map_err(|_| Error::Invalid)?;
        let (name, password) = decoded.split_once(':').ok_or(Error::Invalid)?;

        let user = store.by_name(name).ok_or(Error::Invalid)?;
        if !user.verify_password(password) {
            return Err(Error::Invalid);
        }

        return Ok(AuthedUser {
            user,
            mode: AuthMode::Basic,
        });
    }

    Err(Error::Required)
}
