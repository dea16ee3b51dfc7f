//! Note producer
//!
//! Stages one note from a byte stream: body bytes, then the metadata trailer,
//! written as a draft and published together with an MD5 sidecar. Empty input
//! produces nothing; oversized input is rejected before it can fill the disk.
//! The producer keeps enough state for a signal handler to delete whatever it
//! has written so far.

use crate::envelope::{self, NoteMetadata, META_KEY_CHANNEL, META_KEY_OS, META_KEY_TIMESTAMP};
use crate::staging::{StagingStore, MAX_NOTE_SIZE};
use crate::{checksum, NoterError, Result};
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

const READ_BUF_SIZE: usize = 1024 * 1024;

/// Stages a single note under a fresh identity.
pub struct Producer {
    store: StagingStore,
    identity: String,
    channel: String,
    max_size: u64,
}

impl Producer {
    pub fn new(store: StagingStore, channel: impl Into<String>) -> Self {
        Self {
            store,
            identity: Uuid::new_v4().to_string(),
            channel: channel.into(),
            max_size: MAX_NOTE_SIZE,
        }
    }

    #[cfg(test)]
    fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Read `input` to EOF and stage it as a note. Returns `Ok(false)` when
    /// the input was empty, in which case nothing is left on disk. Any
    /// failure deletes whatever was written so far; no draft or sidecar
    /// outlives a failed run.
    pub async fn stage<R: AsyncRead + Unpin>(&self, input: R) -> Result<bool> {
        match self.stage_inner(input).await {
            Ok(staged) => Ok(staged),
            Err(e) => {
                if let Err(cleanup_err) = self.cleanup() {
                    tracing::error!(error = %cleanup_err, "cleanup after failed staging failed");
                }
                Err(e)
            }
        }
    }

    async fn stage_inner<R: AsyncRead + Unpin>(&self, mut input: R) -> Result<bool> {
        let mut draft = self.store.begin_draft(&self.identity)?;
        let mut buf = vec![0u8; READ_BUF_SIZE];
        let mut total: u64 = 0;

        loop {
            let n = input.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            total += n as u64;
            if total > self.max_size {
                return Err(NoterError::Staging(format!(
                    "input exceeds the {} byte note limit",
                    self.max_size
                )));
            }
            draft.write_all(&buf[..n])?;
        }

        if total == 0 {
            tracing::warn!("empty input, nothing staged");
            self.store.discard_draft(&self.identity)?;
            return Ok(false);
        }

        draft.write_all(&envelope::trailer(&self.metadata()))?;
        draft.finish()?;

        let sum = checksum::digest_file(&self.store.draft_path(&self.identity))?;
        fs::write(self.store.sidecar_path(&self.identity), &sum).map_err(|e| {
            NoterError::Staging(format!("failed to write checksum sidecar: {}", e))
        })?;

        self.store.publish(&self.identity)?;
        tracing::info!(identity = %self.identity, size = total, "note staged");
        Ok(true)
    }

    fn metadata(&self) -> NoteMetadata {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let channel = if self.channel.is_empty() {
            crate::channel::DEFAULT_CHANNEL
        } else {
            &self.channel
        };

        let mut metadata = NoteMetadata::new();
        metadata.insert(META_KEY_TIMESTAMP.to_string(), ts.to_string());
        metadata.insert(META_KEY_OS.to_string(), "linux".to_string());
        metadata.insert(META_KEY_CHANNEL.to_string(), channel.to_string());
        metadata
    }

    /// Delete every file this producer may have written. For signal handlers;
    /// all three paths are removed unconditionally.
    pub fn cleanup(&self) -> Result<()> {
        self.store.discard_draft(&self.identity)?;
        self.store.remove_note(&self.identity)
    }
}
