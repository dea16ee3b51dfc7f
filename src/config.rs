//! Application configuration
//!
//! A flat key=value config file shared by all three binaries. The reader is
//! forgiving: a missing file yields an empty config, a missing
//! key yields an empty string, so every consumer works against defaults. The
//! one hard rule is Unix line endings; a config file with `\r` in it is
//! rejected outright rather than silently mis-parsed.

use crate::{NoterError, Result};
use std::collections::HashMap;
use std::path::Path;

/// Channel name the producer writes into the `ch` header field
pub const KEY_CHANNEL: &str = "channel";

/// Address of the receiving server, e.g. `10.0.0.2:8000`
pub const KEY_SERVER_ADDR: &str = "noter_srv_addr";

/// "true" to delete notes after successful dispatch instead of archiving
pub const KEY_DELETE_AFTER_PROCESSING: &str = "delete_note_after_processing";

/// Path of the SQLite database backing the `db` channel
pub const KEY_DB_PATH: &str = "db_path";

/// Recipient address for the `email` channel
pub const KEY_EMAIL_TO: &str = "email_to_mail_addr";

/// Sender address for the `email` channel
pub const KEY_EMAIL_FROM: &str = "email_from_mail_addr";

/// Command the email channel pipes outbound messages to
pub const KEY_SENDMAIL_COMMAND: &str = "email_sendmail_command";

/// Flat key=value application config
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    values: HashMap<String, String>,
}

impl AppConfig {
    /// Load a config file.
    ///
    /// A file that does not exist is not an error: it produces an empty
    /// config and a warning, since every key has a usable default.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(NoterError::Config(format!(
                    "failed to read config file '{}': {}",
                    path.display(),
                    e
                )))
            }
        };

        Self::parse(&content)
    }

    /// Parse config file content.
    fn parse(content: &str) -> Result<Self> {
        if content.contains('\r') {
            return Err(NoterError::Config(
                "non-unix linebreaks in config file".to_string(),
            ));
        }

        let mut values = HashMap::new();

        for line in content.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                values.insert(key.to_string(), value.to_string());
            }
        }

        Ok(Self { values })
    }

    /// Build a config directly from key/value pairs (tests, embedding).
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Look up a key. Missing keys yield an empty string.
    pub fn get(&self, key: &str) -> &str {
        self.values.get(key).map(String::as_str).unwrap_or("")
    }

    /// Look up a boolean flag; anything other than the literal "true" is false.
    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key) == "true"
    }
}
