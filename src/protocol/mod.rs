//! Protocol module - BERP framing and request classification.
//!
//! - 4-byte big-endian length header
//! - Async frame read/write over any `AsyncRead`/`AsyncWrite`
//! - Typed view of decoded request terms

mod frame;
mod request;
mod wire_format;

pub use frame::{build_frame, read_frame, write_frame, FrameRead};
pub use request::{CallKind, CallRequest, Request};
pub use wire_format::{
    decode_header, encode_header, validate_length, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE,
};
