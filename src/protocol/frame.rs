//! Frame I/O over an async byte stream.
//!
//! A frame is one BERT payload behind a 4-byte big-endian length. A clean
//! close by the peer before any header byte is reported as
//! [`FrameRead::Closed`], not as an error.
//!
//! # Example
//!
//! ```
//! use bertlet::protocol::{build_frame, read_frame, FrameRead, DEFAULT_MAX_FRAME_SIZE};
//!
//! # tokio_test();
//! # fn tokio_test() {
//! let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! rt.block_on(async {
//!     let bytes = build_frame(b"hello").unwrap();
//!     let mut reader = &bytes[..];
//!
//!     let frame = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
//!     assert!(matches!(frame, FrameRead::Frame(ref p) if &p[..] == b"hello"));
//!
//!     let next = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
//!     assert!(matches!(next, FrameRead::Closed));
//! });
//! # }
//! ```

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::wire_format::{decode_header, encode_header, validate_length, HEADER_SIZE};
use crate::error::{BertletError, Result};

/// Outcome of reading one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameRead {
    /// A complete payload.
    Frame(Bytes),
    /// Peer closed the stream before sending a header byte.
    Closed,
}

/// Build a complete frame as a single byte vector.
pub fn build_frame(payload: &[u8]) -> Result<Vec<u8>> {
    let len = u32::try_from(payload.len()).map_err(|_| BertletError::FrameTooLarge {
        size: u32::MAX,
        max: u32::MAX,
    })?;
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&encode_header(len));
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Read one frame.
///
/// Blocks until the whole payload has arrived. Errors:
/// - [`BertletError::MalformedHeader`] if EOF cuts the length prefix short
/// - [`BertletError::FrameTooLarge`] if the declared length exceeds `max_frame_size`
/// - [`BertletError::Io`] if the stream drops mid-payload
pub async fn read_frame<R>(reader: &mut R, max_frame_size: u32) -> Result<FrameRead>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    let mut filled = 0;

    while filled < HEADER_SIZE {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(FrameRead::Closed);
            }
            return Err(BertletError::MalformedHeader(filled));
        }
        filled += n;
    }

    let length = decode_header(&header).ok_or(BertletError::MalformedHeader(filled))?;
    validate_length(length, max_frame_size)?;

    let mut payload = BytesMut::zeroed(length as usize);
    reader.read_exact(&mut payload).await?;

    Ok(FrameRead::Frame(payload.freeze()))
}

/// Write one frame: header and payload in a single `write_all`, then flush.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = build_frame(payload)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
