//! Staging store
//!
//! Filesystem primitive shared by both hosts: drafts are written under a
//! temp-prefixed name, verified, then published by an atomic rename so no
//! reader ever observes a partially written note. Staging directories are the
//! rendezvous points between independently scheduled components; the only
//! concurrency discipline is rename-to-publish plus a sweep that tolerates
//! files disappearing underneath it.

use crate::{NoterError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Prefix distinguishing in-progress drafts from published notes
pub const TMP_PREFIX: &str = "temp_";

/// Suffix of the checksum sidecar written next to a published note
pub const SIDECAR_SUFFIX: &str = ".md5";

/// Length of a note identity: 32 UUID hex digits plus 4 dashes
pub const IDENTITY_LEN: usize = 36;

/// Upper bound on a single note (1000 MB); larger files are never staged,
/// shipped or consumed
pub const MAX_NOTE_SIZE: u64 = 1_048_576_000;

/// Default age past which a temp-prefixed draft counts as dangling (24 hours)
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(86_400);

/// Default staging root on both hosts
pub const DEFAULT_STAGING_DIR: &str = "/tmp/noter";

/// Name of the scratch subdirectory cleared each consumer iteration
const TRANSFER_DIR: &str = "transfer";

/// Name of the archive subdirectory, created on demand
const ARCHIVE_DIR: &str = "archive";

/// A staging directory rooted at one path. Cloning is cheap; the store holds
/// no open handles of its own.
#[derive(Debug, Clone)]
pub struct StagingStore {
    root: PathBuf,
}

/// An in-progress draft. The caller streams bytes in, then either publishes
/// through the store or discards it. Dropping a draft without finishing it
/// leaves the temp file for the stale sweep to recover.
pub struct Draft {
    file: File,
    path: PathBuf,
    identity: String,
}

impl StagingStore {
    /// Open a staging root, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            NoterError::Staging(format!(
                "failed to create staging directory '{}': {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final path of a published note.
    pub fn final_path(&self, identity: &str) -> PathBuf {
        self.root.join(identity)
    }

    /// Temp-prefixed path a draft is written under.
    pub fn draft_path(&self, identity: &str) -> PathBuf {
        self.root.join(format!("{}{}", TMP_PREFIX, identity))
    }

    /// Path of the checksum sidecar for a note.
    pub fn sidecar_path(&self, identity: &str) -> PathBuf {
        self.root.join(format!("{}{}", identity, SIDECAR_SUFFIX))
    }

    /// Begin writing a draft for the given identity.
    pub fn begin_draft(&self, identity: &str) -> Result<Draft> {
        let path = self.draft_path(identity);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| {
                NoterError::Staging(format!(
                    "failed to open draft '{}': {}",
                    path.display(),
                    e
                ))
            })?;

        Ok(Draft {
            file,
            path,
            identity: identity.to_string(),
        })
    }

    /// Publish a finished draft under its final name.
    ///
    /// If a file already occupies the final path it is deleted first
    /// (last-writer-wins; only reachable on an identity collision). A failed
    /// rename leaves the draft in place so nothing is silently destroyed.
    pub fn publish(&self, identity: &str) -> Result<()> {
        replace_rename(&self.draft_path(identity), &self.final_path(identity))
    }

    /// Delete a draft, e.g. after a failed transfer. Missing files are fine;
    /// a concurrent deleter may have won the race.
    pub fn discard_draft(&self, identity: &str) -> Result<()> {
        remove_if_exists(&self.draft_path(identity))
    }

    /// Delete a published note and its checksum sidecar.
    pub fn remove_note(&self, identity: &str) -> Result<()> {
        remove_if_exists(&self.final_path(identity))?;
        remove_if_exists(&self.sidecar_path(identity))
    }

    /// Move a published note into the archive directory under its identity.
    pub fn archive(&self, identity: &str) -> Result<()> {
        let archive_dir = self.root.join(ARCHIVE_DIR);
        fs::create_dir_all(&archive_dir).map_err(|e| {
            NoterError::Staging(format!("failed to create archive directory: {}", e))
        })?;
        replace_rename(&self.final_path(identity), &archive_dir.join(identity))
    }

    /// Scratch directory used by the database channel.
    pub fn transfer_dir(&self) -> PathBuf {
        self.root.join(TRANSFER_DIR)
    }

    /// Remove and recreate the transfer directory, dropping dangling copies
    /// left behind by a previous crashed run.
    pub fn clear_transfer_dir(&self) -> Result<PathBuf> {
        let dir = self.transfer_dir();
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(NoterError::Staging(format!(
                    "failed to clear transfer directory '{}': {}",
                    dir.display(),
                    e
                )))
            }
        }
        fs::create_dir_all(&dir).map_err(|e| {
            NoterError::Staging(format!("failed to create transfer directory: {}", e))
        })?;
        Ok(dir)
    }

    /// Delete temp-prefixed entries older than `max_age`, recovering from a
    /// writer that crashed mid-draft. Age is measured from the modified time,
    /// the portable stand-in for creation time; a dangling draft stops being
    /// written when its writer dies, so the two coincide from then on.
    /// Returns how many drafts were deleted.
    ///
    /// Races with concurrent deleters are expected: an entry vanishing
    /// between listing and statting is skipped, never an error.
    pub fn sweep_stale(&self, max_age: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut deleted = 0;

        for entry in fs::read_dir(&self.root).map_err(|e| {
            NoterError::Staging(format!(
                "failed to list staging directory '{}': {}",
                self.root.display(),
                e
            ))
        })? {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };

            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_temp_name(&name) {
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

            let age = metadata
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or(Duration::ZERO);

            if age > max_age {
                let path = entry.path();
                remove_if_exists(&path)?;
                // A dangling draft may carry a sidecar on the producer host
                remove_if_exists(&path.with_extension("md5"))?;
                tracing::info!(path = %path.display(), "deleted dangling temp file");
                deleted += 1;
            }
        }

        Ok(deleted)
    }
}

impl Draft {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append bytes to the draft.
    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.file.write_all(buf).map_err(|e| {
            NoterError::Staging(format!(
                "failed to write draft '{}': {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Flush the draft to stable storage and close it. Must be called before
    /// the draft is digested or published.
    pub fn finish(self) -> Result<()> {
        self.file.sync_all().map_err(|e| {
            NoterError::Staging(format!(
                "failed to sync draft '{}': {}",
                self.path.display(),
                e
            ))
        })
    }
}

/// Is this file name an in-progress draft?
pub fn is_temp_name(name: &str) -> bool {
    name.starts_with(TMP_PREFIX)
}

/// Is this file name a checksum sidecar?
pub fn is_sidecar_name(name: &str) -> bool {
    name.ends_with(SIDECAR_SUFFIX)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(NoterError::Staging(format!(
            "failed to delete '{}': {}",
            path.display(),
            e
        ))),
    }
}

fn replace_rename(from: &Path, to: &Path) -> Result<()> {
    if to.exists() {
        remove_if_exists(to)?;
    }
    fs::rename(from, to).map_err(|e| {
        NoterError::Staging(format!(
            "failed to rename '{}' to '{}': {}",
            from.display(),
            to.display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, StagingStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StagingStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_draft_then_publish() {
        let (_dir, store) = store();
        let identity = "11111111-2222-3333-4444-555555555555";

        let mut draft = store.begin_draft(identity).unwrap();
        draft.write_all(b"payload").unwrap();
        draft.finish().unwrap();

        // Draft is not visible under the final name until published
        assert!(!store.final_path(identity).exists());
        assert!(store.draft_path(identity).exists());

        store.publish(identity).unwrap();
        assert!(store.final_path(identity).exists());
        assert!(!store.draft_path(identity).exists());
        assert_eq!(fs::read(store.final_path(identity)).unwrap(), b"payload");
    }

    #[test]
    fn test_publish_replaces_existing_final() {
        let (_dir, store) = store();
        let identity = "11111111-2222-3333-4444-555555555555";

        fs::write(store.final_path(identity), b"old").unwrap();

        let mut draft = store.begin_draft(identity).unwrap();
        draft.write_all(b"new").unwrap();
        draft.finish().unwrap();
        store.publish(identity).unwrap();

        assert_eq!(fs::read(store.final_path(identity)).unwrap(), b"new");
    }

    #[test]
    fn test_remove_note_deletes_sidecar_too() {
        let (_dir, store) = store();
        let identity = "11111111-2222-3333-4444-555555555555";

        fs::write(store.final_path(identity), b"x").unwrap();
        fs::write(store.sidecar_path(identity), b"ABCD").unwrap();

        store.remove_note(identity).unwrap();
        assert!(!store.final_path(identity).exists());
        assert!(!store.sidecar_path(identity).exists());

        // Deleting again is a no-op
        store.remove_note(identity).unwrap();
    }

    #[test]
    fn test_archive_moves_note() {
        let (dir, store) = store();
        let identity = "11111111-2222-3333-4444-555555555555";

        fs::write(store.final_path(identity), b"x").unwrap();
        store.archive(identity).unwrap();

        assert!(!store.final_path(identity).exists());
        assert!(dir.path().join("archive").join(identity).exists());
    }

    #[test]
    fn test_sweep_keeps_fresh_drafts() {
        let (_dir, store) = store();
        let mut draft = store.begin_draft("11111111-2222-3333-4444-555555555555").unwrap();
        draft.write_all(b"x").unwrap();
        draft.finish().unwrap();

        let deleted = store.sweep_stale(Duration::from_secs(3600)).unwrap();
        assert_eq!(deleted, 0);
        assert!(store.draft_path("11111111-2222-3333-4444-555555555555").exists());
    }

    #[test]
    fn test_sweep_deletes_stale_drafts_only() {
        let (_dir, store) = store();
        let identity = "11111111-2222-3333-4444-555555555555";

        let mut draft = store.begin_draft(identity).unwrap();
        draft.write_all(b"x").unwrap();
        draft.finish().unwrap();
        fs::write(store.final_path("66666666-7777-8888-9999-aaaaaaaaaaaa"), b"done").unwrap();

        // Let the draft age past a zero-second threshold
        std::thread::sleep(Duration::from_millis(1100));

        let deleted = store.sweep_stale(Duration::ZERO).unwrap();
        assert_eq!(deleted, 1);
        assert!(!store.draft_path(identity).exists());
        // Published notes are never swept
        assert!(store
            .final_path("66666666-7777-8888-9999-aaaaaaaaaaaa")
            .exists());
    }

    #[test]
    fn test_clear_transfer_dir() {
        let (_dir, store) = store();
        let transfer = store.clear_transfer_dir().unwrap();
        fs::write(transfer.join("dangling"), b"x").unwrap();

        let transfer = store.clear_transfer_dir().unwrap();
        assert!(transfer.exists());
        assert_eq!(fs::read_dir(&transfer).unwrap().count(), 0);
    }

    #[test]
    fn test_name_helpers() {
        assert!(is_temp_name("temp_11111111-2222-3333-4444-555555555555"));
        assert!(!is_temp_name("11111111-2222-3333-4444-555555555555"));
        assert!(is_sidecar_name("11111111-2222-3333-4444-555555555555.md5"));
        assert!(!is_sidecar_name("11111111-2222-3333-4444-555555555555"));
    }
}
