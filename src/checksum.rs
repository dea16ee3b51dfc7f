//! Checksum utility
//!
//! Streaming MD5 digest of a file's exact byte content, rendered as a
//! 32-character uppercase hex string. The digest is computed after the file
//! is fully written and closed, and accompanies the note end-to-end: as an
//! `.md5` sidecar on the producing host and inline in the wire protocol.
//! It is the only integrity guard against partial or corrupted transfer.

use crate::{NoterError, Result};
use md5::{Digest, Md5};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Length of the hex-encoded digest
pub const CHECKSUM_HEX_LEN: usize = 32;

/// Files are read in bounded chunks so arbitrarily large notes never have to
/// fit in memory.
const READ_BUF_SIZE: usize = 1024 * 1024;

/// Compute the digest of a file.
///
/// # Errors
///
/// Any inability to open or read the file is a [`NoterError::Checksum`] for
/// the whole operation; it is never treated as "no checksum".
pub fn digest_file(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();

    let mut file = File::open(path).map_err(|e| {
        NoterError::Checksum(format!("failed to open '{}': {}", path.display(), e))
    })?;

    let mut hasher = Md5::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let n = file.read(&mut buf).map_err(|e| {
            NoterError::Checksum(format!("failed to read '{}': {}", path.display(), e))
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(to_uppercase_hex(&hasher.finalize()))
}

fn to_uppercase_hex(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{:02X}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn file_with(content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_known_digest() {
        let file = file_with(b"hello");
        assert_eq!(
            digest_file(file.path()).unwrap(),
            "5D41402ABC4B2A76B9719D911017C592"
        );
    }

    #[test]
    fn test_digest_is_deterministic() {
        let a = file_with(b"the same bytes");
        let b = file_with(b"the same bytes");

        let digest_a = digest_file(a.path()).unwrap();
        let digest_b = digest_file(b.path()).unwrap();

        assert_eq!(digest_a, digest_b);
        assert_eq!(digest_a.len(), CHECKSUM_HEX_LEN);
        assert!(digest_a
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_empty_file_digest() {
        let file = file_with(b"");
        assert_eq!(
            digest_file(file.path()).unwrap(),
            "D41D8CD98F00B204E9800998ECF8427E"
        );
    }

    #[test]
    fn test_different_bytes_differ() {
        let a = file_with(b"aaa");
        let b = file_with(b"aab");
        assert_ne!(
            digest_file(a.path()).unwrap(),
            digest_file(b.path()).unwrap()
        );
    }

    #[test]
    fn test_unreadable_file_is_checksum_error() {
        let err = digest_file("/nonexistent/no-such-file").unwrap_err();
        assert!(matches!(err, NoterError::Checksum(_)));
    }
}
