//! Email delivery channel
//!
//! Formats the note body as a plain-text message with a subject derived from
//! the `ts` metadata field and hands it to a [`MailTransport`] collaborator.
//! The transport owns all SMTP concerns; the channel keeps no durable state,
//! so re-delivery after an ambiguous outcome just sends the mail again.

use super::NotesChannel;
use crate::envelope::{NoteMetadata, META_KEY_TIMESTAMP};
use crate::{NoterError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Registry name of this channel
pub const CHANNEL_NAME: &str = "email";

/// Outbound mail collaborator. One call per note; the implementation receives
/// an owned message and needs no shared buffer or lock.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<()>;
}

pub struct EmailChannel {
    transport: Arc<dyn MailTransport>,
}

impl EmailChannel {
    pub fn new(transport: Arc<dyn MailTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl NotesChannel for EmailChannel {
    fn name(&self) -> &'static str {
        CHANNEL_NAME
    }

    async fn send_note(
        &self,
        identity: &str,
        body: &[u8],
        metadata: &NoteMetadata,
    ) -> Result<()> {
        tracing::debug!(identity, "email channel dispatch");

        let ts = metadata
            .get(META_KEY_TIMESTAMP)
            .ok_or_else(|| NoterError::Dispatch(format!("note '{}' has no ts field", identity)))?;
        let secs: i64 = ts.parse().map_err(|_| {
            NoterError::Dispatch(format!("note '{}' has unparseable ts '{}'", identity, ts))
        })?;

        let subject = format!("Note from {}", format_timestamp(secs));
        let text = String::from_utf8_lossy(body);

        self.transport.send(&subject, &text).await
    }
}

fn format_timestamp(secs: i64) -> String {
    match chrono::DateTime::from_timestamp(secs, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => secs.to_string(),
    }
}

/// Mail transport that pipes an assembled message into a sendmail-compatible
/// command. The recipient is carried in the headers, so the command is
/// invoked with `-t`.
pub struct SendmailTransport {
    command: String,
    from: String,
    to: String,
}

impl SendmailTransport {
    pub fn new(
        command: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            from: from.into(),
            to: to.into(),
        }
    }
}

#[async_trait]
impl MailTransport for SendmailTransport {
    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        let message = format!(
            "From: {}\nTo: {}\nSubject: {}\n\n{}\n",
            self.from, self.to, subject, body
        );

        let mut child = tokio::process::Command::new(&self.command)
            .arg("-t")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                NoterError::Dispatch(format!("failed to spawn '{}': {}", self.command, e))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| NoterError::Dispatch("sendmail stdin unavailable".to_string()))?;
        stdin
            .write_all(message.as_bytes())
            .await
            .map_err(|e| NoterError::Dispatch(format!("failed to write message: {}", e)))?;
        drop(stdin);

        let status = child
            .wait()
            .await
            .map_err(|e| NoterError::Dispatch(format!("failed to wait for sendmail: {}", e)))?;

        if !status.success() {
            return Err(NoterError::Dispatch(format!(
                "'{}' exited with {}",
                self.command, status
            )));
        }

        Ok(())
    }
}
