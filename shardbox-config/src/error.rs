//! Configuration errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("config syntax: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("config: {0}")]
    Invalid(String),
}

impl Error {
    /// Attach the line/column context toml gives us to the raw file.
    pub fn config(source: &str, err: toml::de::Error) -> Self {
        if let Some(span) = err.span() {
            let line = source[..span.start].lines().count();
            Self::Invalid(format!("line {}: {}", line, err.message()))
        } else {
            Self::Toml(err)
        }
    }
}
