//! TCP message framing: a 4-byte big-endian length prefix followed by that
//! many bytes of UTF-8 JSON. A zero-length read at the
//! start of a frame means the peer closed the stream cleanly; a short read
//! anywhere else is a [`TransportError::ConnectionClosed`].

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;

/// Frames above this size are refused rather than buffered, guarding
/// against a malformed or hostile length prefix forcing an unbounded
/// allocation. Well above anything a real room directory or chat payload
/// produces.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Reads one length-prefixed frame. Returns `Ok(None)` on a clean close at
/// a frame boundary (zero bytes read for the length prefix itself).
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Vec<u8>>, TransportError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf);
    if len as usize > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge(len, MAX_FRAME_BYTES));
    }
    let mut body = vec![0u8; len as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => TransportError::ConnectionClosed,
            _ => TransportError::Io(e),
        })?;
    Ok(Some(body))
}

/// Writes one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    body: &[u8],
) -> Result<(), TransportError> {
    if body.len() > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge(body.len() as u32, MAX_FRAME_BYTES));
    }
    let len = (body.len() as u32).to_be_bytes();
    writer.write_all(&len).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").await.unwrap();
        let mut cursor = Cursor::new(buf);
        let frame = read_frame(&mut cursor).await.unwrap();
        assert_eq!(frame, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn empty_stream_reads_as_clean_close() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let frame = read_frame(&mut cursor).await.unwrap();
        assert_eq!(frame, None);
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((MAX_FRAME_BYTES as u32) + 1).to_be_bytes());
        let mut cursor = Cursor::new(buf);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge(_, _)));
    }
}
