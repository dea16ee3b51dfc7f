//! Receiving server
//!
//! Accepts connections on a fixed port and hands each one to an independent
//! tokio task; workers share nothing but the staging directory on disk. A
//! worker loops over note exchanges on its connection: receive the frame,
//! stream the content into a draft, verify the digest, publish atomically,
//! answer with a status code. The peer closing on a frame boundary ends the
//! loop cleanly; everything else that goes wrong answers an error status and
//! drops the connection. A whole connection is torn down regardless of state
//! once its overall deadline (default one hour) elapses.

use crate::staging::StagingStore;
use crate::wire::{self, FrameHeader, StatusCode};
use crate::{checksum, NoterError, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Default port the server listens on
pub const DEFAULT_PORT: u16 = 8000;

/// Overall per-connection budget; the worker is torn down when it elapses
pub const DEFAULT_CONNECTION_DEADLINE: Duration = Duration::from_secs(3600);

/// Receiving server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind, e.g. `0.0.0.0:8000`
    pub bind_addr: String,

    /// Staging directory received notes are published into
    pub staging_dir: PathBuf,

    /// Overall per-connection deadline
    pub connection_deadline: Duration,
}

impl ServerConfig {
    pub fn new(staging_dir: impl Into<PathBuf>, bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            staging_dir: staging_dir.into(),
            connection_deadline: DEFAULT_CONNECTION_DEADLINE,
        }
    }

    pub fn with_connection_deadline(mut self, deadline: Duration) -> Self {
        self.connection_deadline = deadline;
        self
    }
}

/// The accept loop plus its staging store. Bound eagerly so callers can
/// learn the actual port before the loop starts.
pub struct Server {
    config: ServerConfig,
    store: StagingStore,
    listener: TcpListener,
}

impl Server {
    /// Bind the listening socket and open the staging directory.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let store = StagingStore::open(&config.staging_dir)?;
        let listener = TcpListener::bind(&config.bind_addr).await.map_err(|e| {
            NoterError::Transport(format!("failed to bind '{}': {}", config.bind_addr, e))
        })?;

        Ok(Self {
            config,
            store,
            listener,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| NoterError::Transport(format!("no local address: {}", e)))
    }

    /// Accept connections until the shutdown token fires. Workers in flight
    /// when shutdown arrives are abandoned, not awaited.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        tracing::info!(addr = %self.local_addr()?, "server listening");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((mut socket, peer)) => {
                            tracing::debug!(%peer, "accepted connection");
                            let store = self.store.clone();
                            let deadline = self.config.connection_deadline;
                            tokio::spawn(async move {
                                match tokio::time::timeout(
                                    deadline,
                                    handle_connection(&mut socket, &store),
                                )
                                .await
                                {
                                    Ok(Ok(())) => tracing::debug!(%peer, "connection closed"),
                                    Ok(Err(e)) => {
                                        tracing::error!(%peer, error = %e, "connection failed")
                                    }
                                    Err(_) => tracing::warn!(
                                        %peer,
                                        "connection exceeded deadline, torn down"
                                    ),
                                }
                            });
                        }
                        Err(e) => {
                            // Transient accept failures happen under load
                            tracing::warn!(error = %e, "accept failed");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("accept loop shutting down");
                    return Ok(());
                }
            }
        }
    }
}

/// Serve one connection: a sequence of note exchanges until the peer closes
/// or an error ends it. Exposed to tests; production callers go through
/// [`Server::run`].
pub async fn handle_connection<S>(socket: &mut S, store: &StagingStore) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let header = match wire::read_frame_header(socket).await {
            Ok(Some(header)) => header,
            Ok(None) => return Ok(()),
            Err(e) => {
                let _ = wire::write_status(socket, StatusCode::DataTransferError).await;
                return Err(e);
            }
        };

        match receive_note(socket, store, &header).await {
            Ok(()) => {
                wire::write_status(socket, StatusCode::Ok).await?;
                tracing::info!(identity = %header.identity, size = header.size, "note received");
            }
            Err(e) => {
                let status = match e {
                    NoterError::Staging(_) => StatusCode::ServerInternalError,
                    _ => StatusCode::DataTransferError,
                };
                let _ = wire::write_status(socket, status).await;
                return Err(e);
            }
        }
    }
}

/// Receive and stage one note. On success the note sits published under its
/// final name; on failure the draft is discarded, except after a failed
/// publish where the verified draft is left retainable.
async fn receive_note<S>(socket: &mut S, store: &StagingStore, header: &FrameHeader) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if header.size == 0 {
        return Err(NoterError::Transport(format!(
            "declared size 0 for '{}'",
            header.identity
        )));
    }

    tracing::debug!(identity = %header.identity, size = header.size, "receiving note");

    let mut draft = store.begin_draft(&header.identity)?;

    if let Err(e) = wire::receive_content(socket, &mut draft, header.size).await {
        let _ = store.discard_draft(&header.identity);
        return Err(e);
    }

    if let Err(e) = draft.finish() {
        let _ = store.discard_draft(&header.identity);
        return Err(e);
    }

    let computed = match checksum::digest_file(store.draft_path(&header.identity)) {
        Ok(digest) => digest,
        Err(e) => {
            let _ = store.discard_draft(&header.identity);
            return Err(e);
        }
    };

    if computed != header.checksum {
        let _ = store.discard_draft(&header.identity);
        return Err(NoterError::ChecksumMismatch {
            identity: header.identity.clone(),
            declared: header.checksum.clone(),
            computed,
        });
    }

    store.publish(&header.identity)
}
