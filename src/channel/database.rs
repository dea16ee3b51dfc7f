//! Database delivery channel
//!
//! Copies the note body into the scratch transfer area and inserts a row of
//! (identity, metadata-as-JSON, blob content) into SQLite. `INSERT OR
//! REPLACE` keyed on the identity makes duplicate delivery a harmless
//! overwrite, which the consumer's retry behavior requires.

use super::NotesChannel;
use crate::envelope::NoteMetadata;
use crate::{NoterError, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Registry name of this channel; `default` is an alias for it
pub const CHANNEL_NAME: &str = "db";

pub struct DatabaseChannel {
    conn: Mutex<Connection>,
    transfer_dir: PathBuf,
}

impl DatabaseChannel {
    /// Open (or create) the notes database and prepare the scratch area.
    pub fn open(db_path: impl AsRef<Path>, transfer_dir: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let transfer_dir = transfer_dir.into();
        std::fs::create_dir_all(&transfer_dir)?;

        tracing::info!(path = %db_path.display(), "opening notes database");

        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS note (
                note_id TEXT PRIMARY KEY,
                note_meta TEXT NOT NULL,
                blob_content BLOB NOT NULL
            );
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            transfer_dir,
        })
    }
}

#[async_trait]
impl NotesChannel for DatabaseChannel {
    fn name(&self) -> &'static str {
        CHANNEL_NAME
    }

    async fn send_note(
        &self,
        identity: &str,
        body: &[u8],
        metadata: &NoteMetadata,
    ) -> Result<()> {
        tracing::debug!(identity, "database channel dispatch");

        // Materialize the body under transfer/ so the insert reads a stable
        // copy; the consumer clears this directory every iteration.
        let scratch = self.transfer_dir.join(identity);
        std::fs::write(&scratch, body).map_err(|e| {
            NoterError::Dispatch(format!(
                "failed to write transfer copy '{}': {}",
                scratch.display(),
                e
            ))
        })?;

        let meta_json = serde_json::to_string(metadata)?;
        let blob = std::fs::read(&scratch).map_err(|e| {
            NoterError::Dispatch(format!(
                "failed to read transfer copy '{}': {}",
                scratch.display(),
                e
            ))
        })?;

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO note (note_id, note_meta, blob_content) VALUES (?1, ?2, ?3)",
            params![identity, meta_json, blob],
        )?;

        Ok(())
    }
}
