//! Frontend errors.

use std::io::ErrorKind;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("net: {0}")]
    Net(#[from] crate::net::Error),
}

impl Error {
    /// A peer that just went away isn't worth an error line.
    pub(crate) fn disconnect(&self) -> bool {
        let io_err = match self {
            Error::Io(err) => Some(err),
            Error::Net(crate::net::Error::Io(err)) => Some(err),
            Error::Net(crate::net::Error::HandshakeTimeout) => return true,
            _ => None,
        };

        matches!(
            io_err.map(|err| err.kind()),
            Some(ErrorKind::UnexpectedEof)
                | Some(ErrorKind::ConnectionReset)
                | Some(ErrorKind::BrokenPipe)
        )
    }
}
