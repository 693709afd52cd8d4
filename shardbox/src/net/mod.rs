//! Network glue: the TLS front and the HTTP/1.1 connection service.

pub mod http;
pub mod tls;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("tls: {0}")]
    Tls(#[from] tokio_rustls::rustls::Error),

    #[error("pem: {0}")]
    Pem(#[from] tokio_rustls::rustls::pki_types::pem::Error),

    #[error("TLS handshake timed out")]
    HandshakeTimeout,

    #[error("http: {0}")]
    Http(#[from] hyper::Error),
}
