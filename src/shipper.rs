//! Shipping daemon
//!
//! Single control loop on the producing host. Each heartbeat it sweeps stale
//! drafts, then walks the staged notes in filename order and sends each one
//! as a transfer-protocol exchange over a single connection. An acknowledged
//! note is deleted together with its sidecar; a rejection or transport error
//! leaves the note in place and aborts the remaining sends until the next
//! heartbeat. The reconnect wait blocks the whole loop. The connection is
//! closed at the end of every heartbeat and reopened on the next one; no
//! pooling.

use crate::staging::{
    is_sidecar_name, is_temp_name, StagingStore, DEFAULT_STALE_AFTER, IDENTITY_LEN, MAX_NOTE_SIZE,
};
use crate::wire::{self, FrameHeader, StatusCode};
use crate::{checksum, NoterError, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Default delay between heartbeats (5 seconds)
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(5);

/// Default wait between reconnect attempts (10 seconds)
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(10);

/// Default budget for one connect attempt
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Shipping daemon configuration
#[derive(Debug, Clone)]
pub struct ShipperConfig {
    /// Local staging directory the producer publishes into
    pub staging_dir: PathBuf,

    /// Address of the receiving server, e.g. `10.0.0.2:8000`
    pub server_addr: String,

    /// Delay between heartbeats
    pub heartbeat: Duration,

    /// Wait between reconnect attempts
    pub reconnect_backoff: Duration,

    /// Budget for one connect attempt
    pub connect_timeout: Duration,

    /// Age threshold for deleting dangling drafts
    pub stale_after: Duration,
}

impl ShipperConfig {
    pub fn new(staging_dir: impl Into<PathBuf>, server_addr: impl Into<String>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            server_addr: server_addr.into(),
            heartbeat: DEFAULT_HEARTBEAT,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

/// The shipping daemon. Single-threaded: the heartbeat loop and the
/// reconnect wait are its only blocking points.
pub struct Shipper {
    config: ShipperConfig,
    store: StagingStore,
    conn: Option<TcpStream>,
}

impl Shipper {
    pub fn new(config: ShipperConfig) -> Result<Self> {
        let store = StagingStore::open(&config.staging_dir)?;
        Ok(Self {
            config,
            store,
            conn: None,
        })
    }

    /// Run the heartbeat loop forever. Callers race this against their
    /// shutdown signal.
    pub async fn run(&mut self) -> Result<()> {
        tracing::info!(
            staging = %self.config.staging_dir.display(),
            server = %self.config.server_addr,
            "starting heartbeat loop"
        );

        let mut interval = tokio::time::interval(self.config.heartbeat);
        loop {
            interval.tick().await;
            if let Err(e) = self.heartbeat().await {
                tracing::error!(error = %e, "heartbeat failed");
            }
        }
    }

    /// One sweep-and-ship pass over the staging directory.
    pub async fn heartbeat(&mut self) -> Result<()> {
        tracing::debug!("heartbeat");

        self.store.sweep_stale(self.config.stale_after)?;

        for (identity, size) in self.eligible_notes()? {
            // A sidecar that cannot be read is a local problem with this one
            // note; nothing has touched the wire yet, so skip it and go on.
            let checksum = match self.read_sidecar(&identity) {
                Ok(sum) => sum,
                Err(e) => {
                    tracing::warn!(identity, error = %e, "unreadable checksum sidecar, skipping");
                    continue;
                }
            };

            if self.conn.is_none() {
                self.connect_loop().await;
            }

            match self.ship_one(&identity, size, checksum).await {
                Ok(StatusCode::Ok) => {
                    tracing::info!(identity, size, "note acknowledged");
                    self.store.remove_note(&identity)?;
                }
                Ok(status) => {
                    tracing::error!(identity, status = status.as_raw(), "note rejected by server");
                    break;
                }
                Err(e) => {
                    tracing::error!(identity, error = %e, "failed to ship note");
                    break;
                }
            }
        }

        self.close_connection();
        Ok(())
    }

    /// Staged notes eligible for shipping, in filename order. A file
    /// qualifies only with an identity-length name and a size in
    /// `(0, MAX_NOTE_SIZE]`; everything else is skipped but kept on disk for
    /// inspection.
    fn eligible_notes(&self) -> Result<Vec<(String, u64)>> {
        let mut notes = Vec::new();

        for entry in std::fs::read_dir(self.store.root())? {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            let name = entry.file_name().to_string_lossy().into_owned();

            if is_temp_name(&name) || is_sidecar_name(&name) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                // Raced with a concurrent deleter
                Err(_) => continue,
            };
            if metadata.is_dir() {
                continue;
            }

            if name.len() != IDENTITY_LEN {
                tracing::warn!(name, "staged file with bad name, skipping");
                continue;
            }

            let size = metadata.len();
            if size == 0 || size > MAX_NOTE_SIZE {
                tracing::warn!(name, size, "staged file with invalid size, skipping");
                continue;
            }

            notes.push((name, size));
        }

        notes.sort();
        Ok(notes)
    }

    fn read_sidecar(&self, identity: &str) -> Result<String> {
        let path = self.store.sidecar_path(identity);
        let sum = std::fs::read_to_string(&path)
            .map_err(|e| {
                NoterError::Checksum(format!("failed to read '{}': {}", path.display(), e))
            })?
            .trim_end()
            .to_string();

        if sum.len() != checksum::CHECKSUM_HEX_LEN {
            return Err(NoterError::Checksum(format!(
                "sidecar '{}' holds {} bytes, expected {}",
                path.display(),
                sum.len(),
                checksum::CHECKSUM_HEX_LEN
            )));
        }

        Ok(sum)
    }

    /// One complete exchange for one note. Any error here leaves the
    /// connection in an undefined protocol state, so the caller aborts the
    /// heartbeat.
    async fn ship_one(&mut self, identity: &str, size: u64, checksum: String) -> Result<StatusCode> {
        let stream = self
            .conn
            .as_mut()
            .ok_or_else(|| NoterError::Transport("not connected".to_string()))?;

        let header = FrameHeader {
            identity: identity.to_string(),
            size: size as u32,
            checksum,
        };

        wire::write_frame_header(stream, &header).await?;
        wire::send_file_content(stream, &self.store.final_path(identity), size).await?;

        let raw = wire::read_status(stream).await?;
        StatusCode::from_raw(raw)
            .ok_or_else(|| NoterError::Transport(format!("unknown status code {}", raw)))
    }

    /// Retry connecting until it works. Blocks the whole daemon; nothing can
    /// ship without a connection.
    async fn connect_loop(&mut self) {
        tracing::debug!(server = %self.config.server_addr, "opening connection to server");

        loop {
            match self.try_connect().await {
                Ok(stream) => {
                    tracing::info!(server = %self.config.server_addr, "connected to server");
                    self.conn = Some(stream);
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "connect failed, retrying");
                    tokio::time::sleep(self.config.reconnect_backoff).await;
                }
            }
        }
    }

    async fn try_connect(&self) -> Result<TcpStream> {
        match timeout(
            self.config.connect_timeout,
            TcpStream::connect(&self.config.server_addr),
        )
        .await
        {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(NoterError::Transport(format!(
                "failed to connect to '{}': {}",
                self.config.server_addr, e
            ))),
            Err(_) => Err(NoterError::Timeout(self.config.connect_timeout)),
        }
    }

    fn close_connection(&mut self) {
        if self.conn.take().is_some() {
            tracing::debug!("closed connection until next heartbeat");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID_A: &str = "11111111-2222-3333-4444-555555555555";
    const ID_B: &str = "66666666-7777-8888-9999-aaaaaaaaaaaa";

    fn shipper(dir: &std::path::Path) -> Shipper {
        Shipper::new(ShipperConfig::new(dir, "127.0.0.1:1")).unwrap()
    }

    #[test]
    fn test_eligible_notes_sorted_by_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(ID_B), b"b").unwrap();
        std::fs::write(dir.path().join(ID_A), b"a").unwrap();

        let notes = shipper(dir.path()).eligible_notes().unwrap();
        assert_eq!(
            notes,
            vec![(ID_A.to_string(), 1), (ID_B.to_string(), 1)]
        );
    }

    #[test]
    fn test_zero_byte_file_filtered_before_any_transmission() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(ID_A), b"").unwrap();
        std::fs::write(
            dir.path().join(format!("{}.md5", ID_A)),
            "D41D8CD98F00B204E9800998ECF8427E",
        )
        .unwrap();

        let notes = shipper(dir.path()).eligible_notes().unwrap();
        assert!(notes.is_empty());
        // Not deleted either: an operator may want to inspect it
        assert!(dir.path().join(ID_A).exists());
    }

    #[test]
    fn test_sidecars_temps_and_bad_names_filtered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(ID_A), b"payload").unwrap();
        std::fs::write(dir.path().join(format!("{}.md5", ID_A)), b"sum").unwrap();
        std::fs::write(dir.path().join(format!("temp_{}", ID_B)), b"draft").unwrap();
        std::fs::write(dir.path().join("odd-name"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("archive")).unwrap();

        let notes = shipper(dir.path()).eligible_notes().unwrap();
        assert_eq!(notes, vec![(ID_A.to_string(), 7)]);
    }

    #[tokio::test]
    async fn test_heartbeat_sweeps_stale_drafts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(format!("temp_{}", ID_A)), b"dangling").unwrap();
        std::thread::sleep(Duration::from_millis(1100));

        let config =
            ShipperConfig::new(dir.path(), "127.0.0.1:1").with_stale_after(Duration::ZERO);
        let mut shipper = Shipper::new(config).unwrap();

        // Nothing eligible to ship, so no connection is attempted
        shipper.heartbeat().await.unwrap();
        assert!(!dir.path().join(format!("temp_{}", ID_A)).exists());
    }

    #[test]
    fn test_read_sidecar_validates_length() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(format!("{}.md5", ID_A)), "tooshort").unwrap();

        let err = shipper(dir.path()).read_sidecar(ID_A).unwrap_err();
        assert!(matches!(err, NoterError::Checksum(_)));
    }

    #[test]
    fn test_missing_sidecar_is_checksum_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = shipper(dir.path()).read_sidecar(ID_A).unwrap_err();
        assert!(matches!(err, NoterError::Checksum(_)));
    }
}
