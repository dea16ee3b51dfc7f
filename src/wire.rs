//! Transfer protocol
//!
//! The wire contract shared by the shipping daemon and the receiving server.
//! One TCP stream carries a sequence of note exchanges; per note the client
//! sends:
//!
//! | field        | size     | encoding                         |
//! |--------------|----------|----------------------------------|
//! | filename     | 36 bytes | ASCII note identity              |
//! | file size    | 4 bytes  | unsigned, big-endian             |
//! | checksum     | 32 bytes | ASCII uppercase hex MD5          |
//! | file content | `size`   | raw envelope bytes, chunked      |
//!
//! The server always answers with exactly one 4-byte signed status code,
//! transmitted in native byte order (both ends must agree out of band; there
//! is no protocol version field either). Every individual read and write is
//! bounded by [`IO_TIMEOUT`]; a stall fails that operation and aborts the
//! connection.

use crate::checksum::CHECKSUM_HEX_LEN;
use crate::staging::{Draft, IDENTITY_LEN};
use crate::{NoterError, Result};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// Budget for one socket read or write call, re-armed on each call
pub const IO_TIMEOUT: Duration = Duration::from_secs(60);

/// File content travels in chunks of this size
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Status codes the server replies with, one per note exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 100,
    GenericError = 101,
    DataTransferError = 102,
    ServerInternalError = 103,
}

impl StatusCode {
    pub fn as_raw(self) -> i32 {
        self as i32
    }

    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            100 => Some(StatusCode::Ok),
            101 => Some(StatusCode::GenericError),
            102 => Some(StatusCode::DataTransferError),
            103 => Some(StatusCode::ServerInternalError),
            _ => None,
        }
    }
}

/// The fixed-size preamble of one note exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub identity: String,
    pub size: u32,
    pub checksum: String,
}

/// Write a full buffer within the per-call time budget.
pub async fn write_all_timed<S>(stream: &mut S, buf: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    match timeout(IO_TIMEOUT, stream.write_all(buf)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(NoterError::Transport(format!("write failed: {}", e))),
        Err(_) => Err(NoterError::Timeout(IO_TIMEOUT)),
    }
}

/// Fill a buffer completely within the per-call time budget. An early EOF is
/// a transport error; the peer closed mid-frame.
pub async fn read_exact_timed<S>(stream: &mut S, buf: &mut [u8]) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    match timeout(IO_TIMEOUT, stream.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(NoterError::Transport(
            "peer closed connection mid-frame".to_string(),
        )),
        Ok(Err(e)) => Err(NoterError::Transport(format!("read failed: {}", e))),
        Err(_) => Err(NoterError::Timeout(IO_TIMEOUT)),
    }
}

/// Read the preamble of the next note exchange.
///
/// Returns `Ok(None)` when the peer closes the connection cleanly on a frame
/// boundary (zero bytes before the filename). A close partway through the
/// filename or any later field is a transport error.
pub async fn read_frame_header<S>(stream: &mut S) -> Result<Option<FrameHeader>>
where
    S: AsyncRead + Unpin,
{
    let mut identity_buf = [0u8; IDENTITY_LEN];
    let mut filled = 0;

    while filled < IDENTITY_LEN {
        let n = match timeout(IO_TIMEOUT, stream.read(&mut identity_buf[filled..])).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Ok(Err(e)) => return Err(NoterError::Transport(format!("read failed: {}", e))),
            Err(_) => return Err(NoterError::Timeout(IO_TIMEOUT)),
        };
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(NoterError::Transport(
                "peer closed connection mid-filename".to_string(),
            ));
        }
        filled += n;
    }

    let identity = std::str::from_utf8(&identity_buf)
        .map_err(|_| NoterError::Transport("filename field is not ASCII".to_string()))?
        .to_string();

    let mut size_buf = [0u8; 4];
    read_exact_timed(stream, &mut size_buf).await?;
    let size = u32::from_be_bytes(size_buf);

    let mut checksum_buf = [0u8; CHECKSUM_HEX_LEN];
    read_exact_timed(stream, &mut checksum_buf).await?;
    let checksum = std::str::from_utf8(&checksum_buf)
        .map_err(|_| NoterError::Transport("checksum field is not ASCII".to_string()))?
        .to_string();

    Ok(Some(FrameHeader {
        identity,
        size,
        checksum,
    }))
}

/// Write the preamble of one note exchange.
pub async fn write_frame_header<S>(stream: &mut S, header: &FrameHeader) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    if header.identity.len() != IDENTITY_LEN {
        return Err(NoterError::Transport(format!(
            "identity '{}' is not {} bytes",
            header.identity, IDENTITY_LEN
        )));
    }
    if header.checksum.len() != CHECKSUM_HEX_LEN {
        return Err(NoterError::Transport(format!(
            "checksum '{}' is not {} bytes",
            header.checksum, CHECKSUM_HEX_LEN
        )));
    }

    write_all_timed(stream, header.identity.as_bytes()).await?;
    write_all_timed(stream, &header.size.to_be_bytes()).await?;
    write_all_timed(stream, header.checksum.as_bytes()).await
}

/// Stream `size` bytes of a local file into the connection in bounded chunks.
///
/// Socket failures surface as [`NoterError::Transport`]/[`NoterError::Timeout`];
/// a file that cannot supply the declared size is a [`NoterError::Staging`]
/// problem with the local data, not the connection.
pub async fn send_file_content<S>(stream: &mut S, path: &Path, size: u64) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| NoterError::Staging(format!("failed to open '{}': {}", path.display(), e)))?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut remaining = size;

    while remaining > 0 {
        let chunk = remaining.min(CHUNK_SIZE as u64) as usize;
        let n = file
            .read(&mut buf[..chunk])
            .await
            .map_err(|e| NoterError::Staging(format!("failed to read '{}': {}", path.display(), e)))?;
        if n == 0 {
            return Err(NoterError::Staging(format!(
                "'{}' ended {} bytes short of its declared size",
                path.display(),
                remaining
            )));
        }
        write_all_timed(stream, &buf[..n]).await?;
        remaining -= n as u64;
    }

    Ok(())
}

/// Receive `size` bytes of file content into a staging draft in bounded
/// chunks. Transport and staging failures keep their respective variants so
/// the server can answer with the right status code.
pub async fn receive_content<S>(stream: &mut S, draft: &mut Draft, size: u32) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut remaining = size as usize;

    while remaining > 0 {
        let chunk = remaining.min(CHUNK_SIZE);
        read_exact_timed(stream, &mut buf[..chunk]).await?;
        draft.write_all(&buf[..chunk])?;
        remaining -= chunk;
    }

    Ok(())
}

/// Write the 4-byte status reply in native byte order.
pub async fn write_status<S>(stream: &mut S, status: StatusCode) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    write_all_timed(stream, &status.as_raw().to_ne_bytes()).await
}

/// Read the 4-byte status reply. Returns the raw code so unknown values can
/// be logged as-is.
pub async fn read_status<S>(stream: &mut S) -> Result<i32>
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4];
    read_exact_timed(stream, &mut buf).await?;
    Ok(i32::from_ne_bytes(buf))
}
