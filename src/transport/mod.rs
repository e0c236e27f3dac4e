//! Transport module - TCP listener and TLS wrapping.
//!
//! Provides:
//! - Plain TCP on `host:port`
//! - Optional rustls server-side TLS, configured from PEM files

mod tcp;
mod tls;

pub use tcp::Listener;
pub use tls::{build_acceptor, load_certs, load_private_key};
