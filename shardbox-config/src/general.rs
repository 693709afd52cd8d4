use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

/// General settings apply to the server itself: listener address, TLS,
/// worker threads and shutdown behavior.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct General {
    /// The IP address the server binds to.
    ///
    /// _Default:_ `0.0.0.0`
    #[serde(default = "General::host")]
    pub host: String,

    /// The TCP port the server binds to.
    ///
    /// _Default:_ `9101`
    #[serde(default = "General::port")]
    pub port: u16,

    /// Number of Tokio threads spawned at startup. `0` uses the
    /// current-thread runtime.
    ///
    /// _Default:_ `2`
    #[serde(default = "General::workers")]
    pub workers: usize,

    /// Maximum number of concurrently handled client connections. Above
    /// this, clients get an immediate "service unavailable".
    ///
    /// _Default:_ `512`
    #[serde(default = "General::max_clients")]
    pub max_clients: usize,

    /// TLS certificate (PEM).
    pub tls_certificate: Option<PathBuf>,

    /// TLS private key (PEM).
    pub tls_private_key: Option<PathBuf>,

    /// TLS handshake deadline, in milliseconds.
    ///
    /// _Default:_ `2500`
    #[serde(default = "General::default_tls_handshake_timeout")]
    pub tls_handshake_timeout: u64,

    /// Deadline for reading request headers, in milliseconds.
    ///
    /// _Default:_ `3000`
    #[serde(default = "General::default_header_read_timeout")]
    pub header_read_timeout: u64,

    /// Root directory for persisted data (`data/db/...`).
    ///
    /// _Default:_ `data`
    #[serde(default = "General::data_root")]
    pub data_root: PathBuf,

    /// Directory for persisted component state (`ipbanmanager`,
    /// `js2crypt`, ...).
    ///
    /// _Default:_ `config`
    #[serde(default = "General::config_dir")]
    pub config_dir: PathBuf,

    /// How long to wait for in-flight requests on shutdown, in
    /// milliseconds.
    ///
    /// _Default:_ `15000`
    #[serde(default = "General::default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl General {
    fn host() -> String {
        Ipv4Addr::UNSPECIFIED.to_string()
    }

    fn port() -> u16 {
        9101
    }

    fn workers() -> usize {
        2
    }

    fn max_clients() -> usize {
        512
    }

    fn default_tls_handshake_timeout() -> u64 {
        2500
    }

    fn default_header_read_timeout() -> u64 {
        3000
    }

    fn data_root() -> PathBuf {
        PathBuf::from("data")
    }

    fn config_dir() -> PathBuf {
        PathBuf::from("config")
    }

    fn default_shutdown_timeout() -> u64 {
        15_000
    }

    /// Certificate and key, when both are configured.
    pub fn tls(&self) -> Option<(&PathBuf, &PathBuf)> {
        self.tls_certificate
            .as_ref()
            .zip(self.tls_private_key.as_ref())
    }

    pub fn tls_handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.tls_handshake_timeout)
    }

    pub fn header_read_timeout(&self) -> Duration {
        Duration::from_millis(self.header_read_timeout)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout)
    }
}

impl Default for General {
    fn default() -> Self {
        Self {
            host: Self::host(),
            port: Self::port(),
            workers: Self::workers(),
            max_clients: Self::max_clients(),
            tls_certificate: None,
            tls_private_key: None,
            tls_handshake_timeout: Self::default_tls_handshake_timeout(),
            header_read_timeout: Self::default_header_read_timeout(),
            data_root: Self::data_root(),
            config_dir: Self::config_dir(),
            shutdown_timeout: Self::default_shutdown_timeout(),
        }
    }
}
