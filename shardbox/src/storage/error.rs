//! Storage engine errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("\"{0}\" already exists")]
    AlreadyExists(String),

    #[error("{0}")]
    Validation(String),

    #[error("update token required or mismatched")]
    TokenRequired,

    #[error("field is locked by a live update token")]
    TokenHeld,

    #[error("loading failed: {0}")]
    LoadFailure(String),

    #[error("not enough memory to load shard")]
    InsufficientMemory,

    #[error("shard is still loading")]
    StillLoading,

    #[error("table is locked by the inconsistency resolver")]
    InconsistencyLock,

    #[error("storage is not ready")]
    NotReady,

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("crypt: {0}")]
    Crypt(#[from] crate::crypt::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn validation(msg: impl ToString) -> Self {
        Self::Validation(msg.to_string())
    }
}
