//! noter - store-and-forward note transfer pipeline
//!
//! Moves opaque "note" payloads from a producing host to a central server over
//! an unreliable network and dispatches them to pluggable delivery channels.
//! Transport is at-least-once with idempotent re-send; notes are deduplicated
//! by a UUID identity that doubles as the staged file name and the wire
//! filename field.
//!
//! # Architecture
//!
//! - **envelope**: on-disk note format (body + trailer-framed metadata header)
//! - **checksum**: streaming MD5 digest guarding against transfer corruption
//! - **staging**: atomic write-to-temp / publish-by-rename filesystem store
//! - **wire**: binary transfer protocol shared by daemon and server
//! - **shipper**: producing-host daemon that ships staged notes each heartbeat
//! - **server**: receiving server, one task per connection
//! - **consumer**: background loop decoding staged notes and dispatching them
//! - **channel**: delivery channel abstraction (email, database) + registry
//! - **producer**: stdin-to-staged-envelope tool logic

pub mod channel;
pub mod checksum;
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod producer;
pub mod server;
pub mod shipper;
pub mod staging;
pub mod wire;

// Re-exports
pub use error::{NoterError, Result};
