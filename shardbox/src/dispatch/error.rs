//! The API error surface: internal failure kinds and their fixed HTTP
//! mapping.

use hyper::StatusCode;
use thiserror::Error;

use crate::storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    NotFound,
    AlreadyExists,
    Validation,
    LoadFailure,
    InconsistencyLock,
    NotReady,
    AuthRequired,
    AuthInvalid,
    MethodNotAllowed,
    Unsupported,
    PayloadRequired,
    PayloadTooLarge,
    RateLimited,
    BodyParse,
    CryptError,
    Internal,
}

impl Kind {
    pub fn status(&self) -> StatusCode {
        match self {
            Kind::NotFound => StatusCode::NOT_FOUND,
            Kind::AlreadyExists => StatusCode::BAD_REQUEST,
            Kind::Validation => StatusCode::BAD_REQUEST,
            Kind::LoadFailure => StatusCode::INTERNAL_SERVER_ERROR,
            Kind::InconsistencyLock => StatusCode::LOCKED,
            Kind::NotReady => StatusCode::BAD_REQUEST,
            Kind::AuthRequired => StatusCode::UNAUTHORIZED,
            Kind::AuthInvalid => StatusCode::FORBIDDEN,
            Kind::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Kind::Unsupported => StatusCode::NOT_ACCEPTABLE,
            Kind::PayloadRequired => StatusCode::BAD_REQUEST,
            Kind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Kind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Kind::BodyParse => StatusCode::UNPROCESSABLE_ENTITY,
            Kind::CryptError => StatusCode::INTERNAL_SERVER_ERROR,
            Kind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short diagnostic for the `Internal-Status` header.
    pub fn tag(&self) -> &'static str {
        match self {
            Kind::NotFound => "not_found",
            Kind::AlreadyExists => "already_exists",
            Kind::Validation => "validation",
            Kind::LoadFailure => "load_failure",
            Kind::InconsistencyLock => "inconsistency_lock",
            Kind::NotReady => "not_ready",
            Kind::AuthRequired => "auth_required",
            Kind::AuthInvalid => "auth_invalid",
            Kind::MethodNotAllowed => "method_not_allowed",
            Kind::Unsupported => "unsupported",
            Kind::PayloadRequired => "payload_required",
            Kind::PayloadTooLarge => "payload_too_large",
            Kind::RateLimited => "rate_limited",
            Kind::BodyParse => "body_parse",
            Kind::CryptError => "crypt_error",
            Kind::Internal => "internal",
        }
    }
}

#[derive(Debug, Error)]
#[error("{detail}")]
pub struct ApiError {
    pub kind: Kind,
    pub detail: String,
}

impl ApiError {
    pub fn new(kind: Kind, detail: impl ToString) -> Self {
        Self {
            kind,
            detail: detail.to_string(),
        }
    }

    pub fn validation(detail: impl ToString) -> Self {
        Self::new(Kind::Validation, detail)
    }

    pub fn not_found(detail: impl ToString) -> Self {
        Self::new(Kind::NotFound, detail)
    }

    pub fn internal(detail: impl ToString) -> Self {
        Self::new(Kind::Internal, detail)
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }
}

impl From<storage::Error> for ApiError {
    fn from(err: storage::Error) -> Self {
        use storage::Error as E;

        let kind = match &err {
            E::NotFound(_) => Kind::NotFound,
            E::AlreadyExists(_) => Kind::AlreadyExists,
            E::Validation(_) => Kind::Validation,
            // The update-token tri-state: token problems surface as
            // validation failures, not auth failures.
            E::TokenRequired | E::TokenHeld => Kind::Validation,
            E::LoadFailure(_) | E::InsufficientMemory | E::StillLoading => Kind::LoadFailure,
            E::InconsistencyLock => Kind::InconsistencyLock,
            E::NotReady => Kind::NotReady,
            E::Crypt(_) => Kind::CryptError,
            E::Json(_) => Kind::BodyParse,
            E::Io(_) => Kind::Internal,
        };
        Self::new(kind, err)
    }
}

impl From<crate::crypt::Error> for ApiError {
    fn from(err: crate::crypt::Error) -> Self {
        Self::new(Kind::CryptError, err)
    }
}

impl From<crate::auth::Error> for ApiError {
    fn from(err: crate::auth::Error) -> Self {
        match err {
            crate::auth::Error::Required => Self::new(Kind::AuthRequired, err),
            crate::auth::Error::Invalid => Self::new(Kind::AuthInvalid, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(Kind::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(Kind::AlreadyExists.status(), StatusCode::BAD_REQUEST);
        assert_eq!(Kind::InconsistencyLock.status().as_u16(), 423);
        assert_eq!(Kind::AuthRequired.status().as_u16(), 401);
        assert_eq!(Kind::AuthInvalid.status().as_u16(), 403);
        assert_eq!(Kind::Unsupported.status().as_u16(), 406);
        assert_eq!(Kind::PayloadTooLarge.status().as_u16(), 413);
        assert_eq!(Kind::RateLimited.status().as_u16(), 429);
        assert_eq!(Kind::BodyParse.status().as_u16(), 422);
    }

    #[test]
    fn test_storage_error_conversion() {
        let err: ApiError = storage::Error::NotFound("record").into();
        assert_eq!(err.kind, Kind::NotFound);

        let err: ApiError = storage::Error::TokenRequired.into();
        assert_eq!(err.kind, Kind::Validation);

        let err: ApiError = storage::Error::NotReady.into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
