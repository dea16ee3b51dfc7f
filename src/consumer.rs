//! Consumer loop
//!
//! Background task on the server host, independent of the accept loop.
//! Each heartbeat it clears the scratch transfer directory, sweeps dangling
//! drafts, then decodes every staged note and dispatches it to the channel
//! its `ch` metadata names. Success archives or deletes the note; any
//! failure leaves it staged, and the next cycle retries it. That cross-cycle
//! retry is unconditional and unbounded: a permanently invalid note (an
//! unresolvable channel name, say) retries forever and must be handled
//! operationally.

use crate::channel::{ChannelRegistry, DEFAULT_CHANNEL};
use crate::envelope::{self, META_KEY_CHANNEL};
use crate::staging::{is_temp_name, StagingStore, DEFAULT_STALE_AFTER, IDENTITY_LEN, MAX_NOTE_SIZE};
use crate::Result;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;

/// Default delay between consumer heartbeats (10 seconds)
pub const DEFAULT_CONSUME_INTERVAL: Duration = Duration::from_secs(10);

/// Consumer loop configuration
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Staging directory the receiving server publishes into
    pub staging_dir: PathBuf,

    /// Delay between heartbeats
    pub interval: Duration,

    /// Age threshold for deleting dangling drafts
    pub stale_after: Duration,

    /// Delete notes after successful dispatch instead of archiving them
    pub delete_after_processing: bool,
}

impl ConsumerConfig {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            interval: DEFAULT_CONSUME_INTERVAL,
            stale_after: DEFAULT_STALE_AFTER,
            delete_after_processing: false,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_delete_after_processing(mut self, delete: bool) -> Self {
        self.delete_after_processing = delete;
        self
    }
}

/// The background note consumer. Shares no in-memory state with connection
/// workers; the staging directory is the rendezvous.
pub struct Consumer {
    config: ConsumerConfig,
    store: StagingStore,
    registry: ChannelRegistry,
}

impl Consumer {
    pub fn new(config: ConsumerConfig, registry: ChannelRegistry) -> Result<Self> {
        let store = StagingStore::open(&config.staging_dir)?;
        Ok(Self {
            config,
            store,
            registry,
        })
    }

    /// Run until the shutdown token fires. A failed cycle is logged and the
    /// next tick tries again.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.config.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.cycle().await {
                        tracing::error!(error = %e, "consumer cycle failed");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("consumer loop shutting down");
                    break;
                }
            }
        }
    }

    /// One consumer heartbeat over the staging directory.
    pub async fn cycle(&self) -> Result<()> {
        tracing::debug!("consumer heartbeat");

        self.store.clear_transfer_dir()?;
        self.store.sweep_stale(self.config.stale_after)?;

        let mut names: Vec<String> = std::fs::read_dir(self.store.root())?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();

        for name in names {
            // Fresh drafts are left for their writer; stale ones were swept
            if is_temp_name(&name) {
                continue;
            }

            if name.len() != IDENTITY_LEN {
                tracing::warn!(name, "staged file with bad name, skipping");
                continue;
            }

            self.consume_one(&name).await;
        }

        Ok(())
    }

    /// Dispatch a single staged note. Every failure path retains the file.
    async fn consume_one(&self, identity: &str) {
        let path = self.store.final_path(identity);

        let size = match std::fs::metadata(&path) {
            Ok(m) => m.len(),
            // Raced with a concurrent deleter
            Err(_) => return,
        };
        if size == 0 || size > MAX_NOTE_SIZE {
            tracing::warn!(identity, size, "staged file with invalid size, skipping");
            return;
        }

        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(identity, error = %e, "failed to read staged note");
                return;
            }
        };

        let (body, metadata) = match envelope::decode(&bytes) {
            Ok(decoded) => decoded,
            Err(e) => {
                // Corrupt envelopes are kept for operator inspection
                tracing::error!(identity, error = %e, "corrupt envelope, note retained");
                return;
            }
        };

        let channel_name = metadata
            .get(META_KEY_CHANNEL)
            .map(String::as_str)
            .filter(|ch| !ch.is_empty())
            .unwrap_or(DEFAULT_CHANNEL);

        let channel = match self.registry.get(channel_name) {
            Some(c) => c,
            None => {
                tracing::error!(
                    identity,
                    channel = channel_name,
                    "no such channel registered, note retained"
                );
                return;
            }
        };

        match channel.send_note(identity, body, &metadata).await {
            Ok(()) => {
                tracing::info!(identity, channel = channel.name(), "note dispatched");
                let outcome = if self.config.delete_after_processing {
                    self.store.remove_note(identity)
                } else {
                    self.store.archive(identity)
                };
                if let Err(e) = outcome {
                    tracing::error!(identity, error = %e, "failed to finalize dispatched note");
                }
            }
            Err(e) => {
                tracing::error!(
                    identity,
                    channel = channel.name(),
                    error = %e,
                    "channel dispatch failed, note retained"
                );
            }
        }
    }
}
