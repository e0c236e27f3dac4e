//! Error types for bertlet.
//!
//! These are infrastructure errors (socket, codec, compression, TLS,
//! configuration). Faults that are reported to a client as a wire error term
//! live in [`crate::fault`].

use thiserror::Error;

/// Main error type for all bertlet operations.
#[derive(Debug, Error)]
pub enum BertletError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Term payload could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Term could not be encoded.
    #[error("Encode error: {0}")]
    Encode(String),

    /// Gzip compression or decompression failed.
    #[error("Compression error: {0}")]
    Compression(String),

    /// Length prefix was cut short by EOF (1-3 bytes read).
    #[error("Malformed frame header: got {0} of 4 length bytes")]
    MalformedHeader(usize),

    /// Declared frame length exceeds the configured maximum.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Declared payload length.
        size: u32,
        /// Configured limit.
        max: u32,
    },

    /// TLS setup or handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Invalid configuration value.
    #[error("Config error: {0}")]
    Config(String),
}

impl From<rustls::Error> for BertletError {
    fn from(err: rustls::Error) -> Self {
        BertletError::Tls(err.to_string())
    }
}

/// Result type alias using BertletError.
pub type Result<T> = std::result::Result<T, BertletError>;
