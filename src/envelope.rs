//! Envelope codec
//!
//! The on-disk note format, byte-exact:
//!
//! ```text
//! [body bytes][header bytes][4-byte big-endian header length]
//! ```
//!
//! The header is an ASCII string of `key:value` pairs joined by `;`. Known
//! keys are `ts` (producer-local Unix seconds), `os` (fixed "linux") and `ch`
//! (requested channel name, empty meaning "default"). Unknown keys are
//! carried through and ignored by consumers; malformed pairs are dropped
//! silently at parse time.
//!
//! The format performs no escaping: a `;` or `:` inside a value corrupts
//! parsing. Downstream consumers depend on the exact byte layout, so this
//! limitation is preserved rather than fixed.

use crate::{NoterError, Result};
use std::collections::BTreeMap;

/// Header key for the producer-local Unix timestamp (decimal seconds)
pub const META_KEY_TIMESTAMP: &str = "ts";

/// Header key for the producing OS, always "linux"
pub const META_KEY_OS: &str = "os";

/// Header key for the requested delivery channel
pub const META_KEY_CHANNEL: &str = "ch";

const ENTRY_DELIM: char = ';';
const KEY_VALUE_DELIM: char = ':';
const HEADER_LEN_FIELD: usize = 4;

/// Parsed note metadata. Insertion order is irrelevant to every consumer, so
/// a sorted map keeps encoding deterministic.
pub type NoteMetadata = BTreeMap<String, String>;

/// Serialize metadata into the `key:value;...` header string.
pub fn header_string(metadata: &NoteMetadata) -> String {
    metadata
        .iter()
        .map(|(k, v)| format!("{}{}{}", k, KEY_VALUE_DELIM, v))
        .collect::<Vec<_>>()
        .join(&ENTRY_DELIM.to_string())
}

/// The trailer appended after the body: header bytes plus the 4-byte
/// big-endian header length. Writers that stream the body separately (the
/// producer) append exactly these bytes to finish an envelope.
pub fn trailer(metadata: &NoteMetadata) -> Vec<u8> {
    let header = header_string(metadata);
    let mut out = Vec::with_capacity(header.len() + HEADER_LEN_FIELD);
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(&(header.len() as u32).to_be_bytes());
    out
}

/// Encode a complete envelope from a body and its metadata.
pub fn encode(body: &[u8], metadata: &NoteMetadata) -> Vec<u8> {
    let trailer = trailer(metadata);
    let mut out = Vec::with_capacity(body.len() + trailer.len());
    out.extend_from_slice(body);
    out.extend_from_slice(&trailer);
    out
}

/// Decode an envelope into its body slice and parsed metadata.
///
/// # Errors
///
/// Returns [`NoterError::MalformedEnvelope`] if the file is too short to
/// carry a length field, the header length is zero, or the header length
/// exceeds what the file can hold. Callers treat that as "corrupt, skip but
/// never delete" so an operator can inspect the file.
pub fn decode(envelope: &[u8]) -> Result<(&[u8], NoteMetadata)> {
    if envelope.len() < HEADER_LEN_FIELD {
        return Err(NoterError::MalformedEnvelope(format!(
            "envelope of {} bytes cannot hold a header length field",
            envelope.len()
        )));
    }

    let tail = &envelope[envelope.len() - HEADER_LEN_FIELD..];
    let header_len = u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]]) as usize;

    if header_len == 0 {
        return Err(NoterError::MalformedEnvelope(
            "header length is zero".to_string(),
        ));
    }

    let available = envelope.len() - HEADER_LEN_FIELD;
    if header_len > available {
        return Err(NoterError::MalformedEnvelope(format!(
            "header length {} exceeds envelope capacity {}",
            header_len, available
        )));
    }

    let body_len = available - header_len;
    let header_bytes = &envelope[body_len..body_len + header_len];

    let header = std::str::from_utf8(header_bytes)
        .map_err(|_| NoterError::MalformedEnvelope("header is not valid ASCII".to_string()))?;

    Ok((&envelope[..body_len], parse_metadata(header)))
}

/// Parse a header string into the metadata map.
///
/// Entries that do not split into exactly one key and one value on `:` are
/// dropped silently; unknown keys are kept and left to consumers to ignore.
pub fn parse_metadata(header: &str) -> NoteMetadata {
    let mut metadata = NoteMetadata::new();

    for entry in header.split(ENTRY_DELIM) {
        let mut parts = entry.split(KEY_VALUE_DELIM);
        if let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) {
            metadata.insert(key.to_string(), value.to_string());
        }
    }

    metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> NoteMetadata {
        NoteMetadata::from([
            (META_KEY_TIMESTAMP.to_string(), "1700000000".to_string()),
            (META_KEY_OS.to_string(), "linux".to_string()),
            (META_KEY_CHANNEL.to_string(), "default".to_string()),
        ])
    }

    #[test]
    fn test_roundtrip() {
        let body = b"hello";
        let metadata = sample_metadata();

        let envelope = encode(body, &metadata);
        let (decoded_body, decoded_meta) = decode(&envelope).unwrap();

        assert_eq!(decoded_body, body);
        assert_eq!(decoded_meta, metadata);
    }

    #[test]
    fn test_roundtrip_empty_body() {
        let metadata = sample_metadata();
        let envelope = encode(b"", &metadata);
        let (body, meta) = decode(&envelope).unwrap();
        assert!(body.is_empty());
        assert_eq!(meta, metadata);
    }

    #[test]
    fn test_roundtrip_binary_body() {
        let body: Vec<u8> = (0u8..=255).collect();
        let envelope = encode(&body, &sample_metadata());
        let (decoded, _) = decode(&envelope).unwrap();
        assert_eq!(decoded, body.as_slice());
    }

    #[test]
    fn test_header_layout_is_byte_exact() {
        // [body]["ch:default;os:linux;ts:1700000000"][4B BE length]
        let envelope = encode(b"hi", &sample_metadata());
        let header = "ch:default;os:linux;ts:1700000000";

        assert_eq!(&envelope[..2], b"hi");
        assert_eq!(&envelope[2..2 + header.len()], header.as_bytes());
        assert_eq!(
            &envelope[envelope.len() - 4..],
            (header.len() as u32).to_be_bytes()
        );
    }

    #[test]
    fn test_decode_too_short() {
        assert!(matches!(
            decode(&[0, 0]),
            Err(NoterError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_decode_zero_header_length() {
        let envelope = [b'x', 0, 0, 0, 0];
        assert!(matches!(
            decode(&envelope),
            Err(NoterError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_decode_header_length_exceeds_file() {
        let mut envelope = b"tiny".to_vec();
        envelope.extend_from_slice(&100u32.to_be_bytes());
        assert!(matches!(
            decode(&envelope),
            Err(NoterError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_parse_drops_malformed_pairs() {
        let metadata = parse_metadata("ts:1;badentry;os:linux;a:b:c;:");
        assert_eq!(metadata.get("ts").map(String::as_str), Some("1"));
        assert_eq!(metadata.get("os").map(String::as_str), Some("linux"));
        // "badentry" has no colon, "a:b:c" has two: both dropped
        assert!(!metadata.contains_key("badentry"));
        assert!(!metadata.contains_key("a"));
        // ":" parses as empty key and empty value, which is harmless
        assert_eq!(metadata.len(), 3);
    }

    #[test]
    fn test_unknown_keys_are_carried() {
        let envelope = encode(
            b"x",
            &NoteMetadata::from([
                ("ts".to_string(), "1".to_string()),
                ("future".to_string(), "stuff".to_string()),
            ]),
        );
        let (_, meta) = decode(&envelope).unwrap();
        assert_eq!(meta.get("future").map(String::as_str), Some("stuff"));
    }

    #[test]
    fn test_unescaped_delimiter_in_value_corrupts_parsing() {
        // Documented limitation: a ';' inside a value splits the entry.
        let metadata = NoteMetadata::from([("ch".to_string(), "a;b".to_string())]);
        let envelope = encode(b"", &metadata);
        let (_, decoded) = decode(&envelope).unwrap();
        assert_eq!(decoded.get("ch").map(String::as_str), Some("a"));
    }
}
