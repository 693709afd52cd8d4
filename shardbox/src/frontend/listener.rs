//! Connection listener. Handles all client connections.
//!
//! Admission control: a semaphore caps concurrently handled clients, and
//! rejected connections go to a single dedicated overflow task that
//! answers "service unavailable" and closes. The listener itself only
//! ever blocks on accept.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal::ctrl_c;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tokio::select;

use tracing::{error, info, warn};

use crate::config::{self, config};
use crate::dispatch::{Context, Dispatcher};
use crate::net::{self, http, tls};
use crate::sighup::Sighup;

use super::{comms, Error};

const OVERFLOW_REPLY: &[u8] =
    b"HTTP/1.1 503 Service Unavailable\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";

/// Client connections listener and handler.
pub struct Listener {
    addr: String,
}

impl Listener {
    pub fn new(addr: impl ToString) -> Self {
        Self {
            addr: addr.to_string(),
        }
    }

    /// Listen for client connections until shutdown is signalled.
    pub async fn listen(&mut self, ctx: Context) -> Result<(), Error> {
        let listener = TcpListener::bind(&self.addr).await?;
        info!("📦 shardbox listening on {}", self.addr);

        let dispatcher = Arc::new(Dispatcher::new());
        let clients = Arc::new(Semaphore::new(config().config.general.max_clients));
        let overflow = Overflow::spawn();
        let mut sighup = Sighup::new()?;
        let shutdown = comms().shutdown_token();

        loop {
            select! {
                connection = listener.accept() => {
                    let (stream, addr) = connection?;

                    match clients.clone().try_acquire_owned() {
                        Ok(permit) => {
                            let ctx = ctx.clone();
                            let dispatcher = dispatcher.clone();

                            comms().tracker().spawn(async move {
                                let _permit = permit;
                                match handle_client(stream, addr, ctx, dispatcher).await {
                                    Ok(()) => (),
                                    Err(err) => if !err.disconnect() {
                                        error!("client crashed: {:?}", err);
                                    }
                                }
                            });
                        }
                        Err(_) => overflow.push(stream),
                    }
                }

                _ = ctrl_c() => {
                    info!("shutting down");
                    break;
                }

                _ = shutdown.cancelled() => {
                    break;
                }

                _ = sighup.listen() => {
                    if let Err(err) = config::reload() {
                        error!("configuration reload error: {}", err);
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_client(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: Context,
    dispatcher: Arc<Dispatcher>,
) -> Result<(), Error> {
    let peer = addr.ip();

    match tls::acceptor() {
        Some(acceptor) => {
            let deadline = config().config.general.tls_handshake_timeout();
            let stream = timeout(deadline, acceptor.accept(stream))
                .await
                .map_err(|_| net::Error::HandshakeTimeout)?
                .map_err(net::Error::Io)?;

            http::serve(stream, peer, ctx, dispatcher).await?;
        }
        None => {
            http::serve(stream, peer, ctx, dispatcher).await?;
        }
    }

    Ok(())
}

/// The overflow worker: one task, one canned reply.
struct Overflow {
    tx: mpsc::Sender<TcpStream>,
}

impl Overflow {
    fn spawn() -> Self {
        let (tx, mut rx) = mpsc::channel::<TcpStream>(64);

        tokio::spawn(async move {
            while let Some(mut stream) = rx.recv().await {
                let _ = stream.write_all(OVERFLOW_REPLY).await;
                let _ = stream.shutdown().await;
            }
        });

        Self { tx }
    }

    fn push(&self, stream: TcpStream) {
        if self.tx.try_send(stream).is_err() {
            // Even the overflow lane is full; the peer sees a plain close.
            warn!("overflow lane full, dropping connection");
        }
    }
}
