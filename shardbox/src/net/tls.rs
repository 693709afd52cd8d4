//! TLS configuration.

use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tokio_rustls::rustls::{
    self,
    pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer},
};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

use crate::config::config;

use super::Error;

static ACCEPTOR: ArcSwapOption<TlsAcceptor> = ArcSwapOption::const_empty();

/// Get the current TLS acceptor snapshot, if TLS is enabled.
pub fn acceptor() -> Option<Arc<TlsAcceptor>> {
    ACCEPTOR.load_full()
}

/// Preload TLS at startup.
pub fn load() -> Result<(), Error> {
    reload()
}

/// Rebuild the acceptor according to the current configuration.
///
/// The new settings are validated before the swap; if they don't build,
/// the existing acceptor stays active.
pub fn reload() -> Result<(), Error> {
    debug!("reloading TLS configuration");

    let config = config();
    let tls_paths = config.config.general.tls();

    let new_acceptor = tls_paths
        .map(|(cert, key)| build_acceptor(cert, key))
        .transpose()?;

    match (new_acceptor, tls_paths) {
        (Some(acceptor), Some((cert, _))) => {
            let previous = ACCEPTOR.swap(Some(Arc::new(acceptor)));

            if previous.is_none() {
                info!(cert = %cert.display(), "🔑 TLS enabled");
            } else {
                info!(cert = %cert.display(), "🔁 TLS certificate reloaded");
            }
        }
        _ => {
            let previous = ACCEPTOR.swap(None);
            if previous.is_some() {
                info!("🔓 TLS disabled");
            }
        }
    }

    Ok(())
}

fn build_acceptor(cert: &Path, key: &Path) -> Result<TlsAcceptor, Error> {
    let pem = CertificateDer::from_pem_file(cert)?;
    let key = PrivateKeyDer::from_pem_file(key)?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![pem], key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
