//! ADB host protocol framing
//!
//! Requests to the ADB server are a 4-digit hex length followed by the
//! service name. Each request is answered by `OKAY`, or by `FAIL` plus a
//! hex-length-prefixed message.
//!
//! The `sync:` service uses 8-byte records instead: a 4-byte id and a
//! little-endian u32 argument.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::{ConnectionError, ConnectionResult};

/// Longest service request the server accepts
pub const MAX_REQUEST_LEN: usize = 0xffff;

/// Largest chunk in a sync `DATA` record
pub const SYNC_DATA_MAX: usize = 64 * 1024;

/// Mode for pushed files: regular file, rw-r--r--
pub const DEFAULT_FILE_MODE: u32 = 0o100644;

const OKAY: &[u8; 4] = b"OKAY";
const FAIL: &[u8; 4] = b"FAIL";
const SYNC_SEND: &[u8; 4] = b"SEND";
const SYNC_DATA: &[u8; 4] = b"DATA";
const SYNC_DONE: &[u8; 4] = b"DONE";

/// Frames a service request
///
/// # Errors
///
/// Returns `ConnectionError::Protocol` if the service name is too long
pub fn encode_request(service: &str) -> ConnectionResult<Vec<u8>> {
    if service.len() > MAX_REQUEST_LEN {
        return Err(ConnectionError::Protocol(format!(
            "request too long: {} bytes",
            service.len()
        )));
    }

    let mut request = format!("{:04x}", service.len()).into_bytes();
    request.extend_from_slice(service.as_bytes());
    Ok(request)
}

/// Sends a service request
pub async fn write_request<W>(writer: &mut W, service: &str) -> ConnectionResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    trace!("ADB request: {}", service);
    let request = encode_request(service)?;
    writer.write_all(&request).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads `OKAY` or `FAIL <message>`
///
/// # Errors
///
/// Returns `ConnectionError::Rejected` with the server's message on `FAIL`
pub async fn read_status<R>(reader: &mut R) -> ConnectionResult<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut status = [0u8; 4];
    read_exact_or_closed(reader, &mut status).await?;

    match &status {
        OKAY => Ok(()),
        FAIL => {
            let message = read_length_prefixed(reader).await?;
            Err(ConnectionError::Rejected(message))
        }
        other => Err(ConnectionError::Protocol(format!(
            "unexpected status {:?}",
            String::from_utf8_lossy(other)
        ))),
    }
}

/// Reads a 4-digit hex length and that many bytes as text
pub async fn read_length_prefixed<R>(reader: &mut R) -> ConnectionResult<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut length = [0u8; 4];
    read_exact_or_closed(reader, &mut length).await?;
    let length = std::str::from_utf8(&length)
        .ok()
        .and_then(|hex| usize::from_str_radix(hex, 16).ok())
        .ok_or_else(|| {
            ConnectionError::Protocol(format!(
                "invalid length prefix {:?}",
                String::from_utf8_lossy(&length)
            ))
        })?;

    let mut payload = vec![0u8; length];
    read_exact_or_closed(reader, &mut payload).await?;
    Ok(String::from_utf8_lossy(&payload).into_owned())
}

async fn read_exact_or_closed<R>(reader: &mut R, buf: &mut [u8]) -> ConnectionResult<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(ConnectionError::Closed),
        Err(e) => Err(e.into()),
    }
}

fn sync_record(id: &[u8; 4], arg: u32) -> [u8; 8] {
    let mut record = [0u8; 8];
    record[..4].copy_from_slice(id);
    record[4..].copy_from_slice(&arg.to_le_bytes());
    record
}

/// Writes `data` to `path` over an open `sync:` connection
///
/// The whole file is sent before the server's verdict is read.
pub async fn sync_push<R, W>(
    reader: &mut R,
    writer: &mut W,
    path: &str,
    mode: u32,
    mtime: u32,
    data: &Bytes,
) -> ConnectionResult<()>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let target = format!("{},{}", path, mode);
    let mut header = sync_record(SYNC_SEND, target.len() as u32).to_vec();
    header.extend_from_slice(target.as_bytes());
    writer.write_all(&header).await?;

    for chunk in data.chunks(SYNC_DATA_MAX) {
        writer
            .write_all(&sync_record(SYNC_DATA, chunk.len() as u32))
            .await?;
        writer.write_all(chunk).await?;
    }

    writer.write_all(&sync_record(SYNC_DONE, mtime)).await?;
    writer.flush().await?;

    let mut response = [0u8; 8];
    read_exact_or_closed(reader, &mut response).await?;
    let length = u32::from_le_bytes([response[4], response[5], response[6], response[7]]);

    match &response[..4] {
        id if id == OKAY => Ok(()),
        id if id == FAIL => {
            let mut message = vec![0u8; length as usize];
            read_exact_or_closed(reader, &mut message).await?;
            Err(ConnectionError::Rejected(
                String::from_utf8_lossy(&message).into_owned(),
            ))
        }
        other => Err(ConnectionError::Protocol(format!(
            "unexpected sync response {:?}",
            String::from_utf8_lossy(other)
        ))),
    }
}
