//! Delivery channels
//!
//! Each verified note is handed to exactly one channel, picked by its `ch`
//! metadata. Channels are polymorphic behind [`NotesChannel`]; the registry
//! is built once at server startup and read-only afterwards, so concurrent
//! lookup needs no locking.
//!
//! Channels must tolerate duplicate delivery: the consumer may invoke them
//! again for the same identity when a prior attempt's outcome was ambiguous
//! (crash between dispatch and archive/delete).

pub mod database;
pub mod email;

pub use database::DatabaseChannel;
pub use email::{EmailChannel, MailTransport, SendmailTransport};

use crate::envelope::NoteMetadata;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry alias resolved when a note requests no channel
pub const DEFAULT_CHANNEL: &str = "default";

/// A pluggable delivery capability.
#[async_trait]
pub trait NotesChannel: Send + Sync {
    /// Registry name of this channel
    fn name(&self) -> &'static str;

    /// Deliver one note. Failure leaves the note staged for a future retry.
    async fn send_note(&self, identity: &str, body: &[u8], metadata: &NoteMetadata)
        -> Result<()>;
}

/// Static name-to-channel mapping, populated at startup and then frozen.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: HashMap<String, Arc<dyn NotesChannel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel under its own name.
    pub fn register(&mut self, channel: Arc<dyn NotesChannel>) {
        self.channels.insert(channel.name().to_string(), channel);
    }

    /// Register an additional name for an already registered channel.
    pub fn alias(&mut self, alias: &str, name: &str) -> Result<()> {
        let channel = self
            .channels
            .get(name)
            .cloned()
            .ok_or_else(|| crate::NoterError::UnknownChannel(name.to_string()))?;
        self.channels.insert(alias.to_string(), channel);
        Ok(())
    }

    /// Look up a channel. `None` is a hard failure for the requesting note;
    /// the note stays retained so a registry change can recover it.
    pub fn get(&self, name: &str) -> Option<Arc<dyn NotesChannel>> {
        self.channels.get(name).cloned()
    }
}
