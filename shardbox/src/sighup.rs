//! SIGHUP listener for configuration reloads.

#[cfg(target_family = "unix")]
use tokio::signal::unix::{signal, Signal, SignalKind};

pub struct Sighup {
    #[cfg(target_family = "unix")]
    sig: Signal,
}

impl Sighup {
    pub(crate) fn new() -> std::io::Result<Self> {
        #[cfg(target_family = "unix")]
        {
            let sig = signal(SignalKind::hangup())?;
            Ok(Self { sig })
        }

        #[cfg(not(target_family = "unix"))]
        Ok(Self {})
    }

    pub(crate) async fn listen(&mut self) {
        #[cfg(target_family = "unix")]
        self.sig.recv().await;

        #[cfg(not(target_family = "unix"))]
        std::future::pending::<()>().await;
    }
}
