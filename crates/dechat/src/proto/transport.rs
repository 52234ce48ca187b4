//! Frame transport over TCP.
//!
//! Thin helpers around tokio's socket types: bind/dial with a connect
//! timeout, and exact-length frame reads/writes. Framing is
//! length-prefixed by the header's `type_and_length` field, so a receive
//! is always exactly `38 + 2 + length` bytes.

use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::frame::{Frame, HEADER_LEN};
use crate::error::{Error, Result};

/// How long a `dial` waits before giving up on a remote server.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Bind a listening socket.
pub async fn bind_listener(host: &str, port: u16) -> Result<TcpListener> {
    Ok(TcpListener::bind((host, port)).await?)
}

/// Connect to a remote server, bounded by [`DIAL_TIMEOUT`].
pub async fn dial(host: &str, port: u16) -> Result<TcpStream> {
    match tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect((host, port))).await {
        Ok(stream) => Ok(stream?),
        Err(_) => Err(Error::DialTimeout {
            host: host.to_owned(),
            port,
        }),
    }
}

/// Write one frame.
///
/// Callers on the broadcast path treat failures as best-effort and drop
/// them; the peer is reaped by its receive path.
pub async fn send_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = frame.to_bytes()?;
    writer.write_all(&bytes).await?;
    Ok(())
}

/// Read exactly one frame.
///
/// Reads the 38 fixed header bytes, then the 2-byte `type_and_length`,
/// then exactly the declared payload. Returns `Ok(None)` when the peer
/// closed the connection cleanly before a new frame began; EOF in the
/// middle of a frame is an error, as is a connection reset.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];

    // A clean close only ever lands on a frame boundary.
    let n = reader.read(&mut header[..1]).await?;
    if n == 0 {
        return Ok(None);
    }

    reader.read_exact(&mut header[1..HEADER_LEN - 2]).await?;
    reader.read_exact(&mut header[HEADER_LEN - 2..]).await?;

    let type_and_length =
        u16::from_le_bytes([header[HEADER_LEN - 2], header[HEADER_LEN - 1]]);
    let (_, length) = Frame::unpack_type_and_length(type_and_length);

    let mut buf = BytesMut::with_capacity(HEADER_LEN + length);
    buf.put_slice(&header);
    if length > 0 {
        let mut payload = vec![0u8; length];
        reader.read_exact(&mut payload).await?;
        buf.put_slice(&payload);
    }

    Frame::from_bytes(&buf).map(Some)
}
