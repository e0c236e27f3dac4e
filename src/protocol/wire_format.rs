//! Wire format encoding and decoding.
//!
//! Implements the 4-byte BERP header:
//! ```text
//! ┌──────────┬──────────────────────┐
//! │ Length   │ Payload (BERT term)  │
//! │ 4 bytes  │ Length bytes         │
//! │ uint32 BE│                      │
//! └──────────┴──────────────────────┘
//! ```

use crate::error::{BertletError, Result};

/// Header size in bytes (fixed, exactly 4).
pub const HEADER_SIZE: usize = 4;

/// Default maximum payload size (64 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Encode a payload length to header bytes (Big Endian).
///
/// # Example
///
/// ```
/// use bertlet::protocol::encode_header;
///
/// assert_eq!(encode_header(258), [0, 0, 1, 2]);
/// ```
#[inline]
pub fn encode_header(payload_length: u32) -> [u8; HEADER_SIZE] {
    payload_length.to_be_bytes()
}

/// Decode a payload length from header bytes (Big Endian).
///
/// Returns `None` if buffer is too short.
///
/// # Example
///
/// ```
/// use bertlet::protocol::decode_header;
///
/// assert_eq!(decode_header(&[0, 0, 1, 2]), Some(258));
/// assert_eq!(decode_header(&[0, 0, 1]), None);
/// ```
#[inline]
pub fn decode_header(buf: &[u8]) -> Option<u32> {
    let bytes: [u8; HEADER_SIZE] = buf.get(..HEADER_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

/// Validate a declared payload length against the configured maximum.
pub fn validate_length(payload_length: u32, max_frame_size: u32) -> Result<()> {
    if payload_length > max_frame_size {
        return Err(BertletError::FrameTooLarge {
            size: payload_length,
            max: max_frame_size,
        });
    }
    Ok(())
}
