//! Client link framing: a 4-byte big-endian length followed by that many bytes of JSON.
//! The node link is carried by WebSocket text messages and needs no framing of its own.

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::DebuggerError;
use crate::Result;

pub const MAX_CLIENT_FRAME: usize = 16 * 1024 * 1024;

/// Read one length-prefixed client frame. `Ok(None)` means the peer closed cleanly
/// between frames.
pub async fn read_client_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len == 0 {
        return Err(DebuggerError::frame("zero-length frame"));
    }
    if len > MAX_CLIENT_FRAME {
        return Err(DebuggerError::frame(format!(
            "frame of {len} bytes exceeds limit of {MAX_CLIENT_FRAME}"
        )));
    }

    let mut buffer = vec![0_u8; len];
    reader.read_exact(&mut buffer).await?;
    Ok(Some(buffer))
}

pub async fn write_client_frame<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(value)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| DebuggerError::frame("reply too large to frame"))?;
    writer.write_u32(len).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}
