//! Error types for noter
//!
//! One enum covering the failure taxonomy of the whole pipeline: transport,
//! integrity, staging, dispatch and configuration errors. Uses thiserror for
//! ergonomic error handling.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for noter operations
pub type Result<T> = std::result::Result<T, NoterError>;

/// Comprehensive error type for noter operations
#[derive(Error, Debug)]
pub enum NoterError {
    /// Connection-level failures: resets, partial reads/writes, refused
    /// connects. Aborts the current connection, never retried within it.
    #[error("transport error: {0}")]
    Transport(String),

    /// A single socket read or write exceeded its time budget
    #[error("socket operation timed out after {0:?}")]
    Timeout(Duration),

    /// The trailing header length of an envelope is inconsistent with the
    /// file contents
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Received bytes do not hash to the digest the peer declared
    #[error("checksum mismatch for '{identity}': declared {declared}, computed {computed}")]
    ChecksumMismatch {
        identity: String,
        declared: String,
        computed: String,
    },

    /// The digest could not be computed at all (unreadable file)
    #[error("checksum error: {0}")]
    Checksum(String),

    /// Filesystem failures during draft/publish/sweep
    #[error("staging error: {0}")]
    Staging(String),

    /// The `ch` metadata value resolves to no registered channel
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    /// A delivery channel failed; the note is retained for retry
    #[error("dispatch error: {0}")]
    Dispatch(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite database errors (database channel)
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization errors (metadata-as-JSON)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
