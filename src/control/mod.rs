//! Control plane - in-band `info` negotiation.
//!
//! `info` directives travel on the same framed stream as requests but never
//! produce a response frame. They toggle per-connection behavior, currently
//! only gzip compression.
//!
//! # Workflow
//!
//! 1. Client sends `(info, accept_encoding, [{gzip}])`
//! 2. Server may compress large responses, announcing each one with
//!    `(info, encoding, [{gzip}])`
//! 3. Client sends `(info, encoding, [{gzip}])` then `(gzip, Bytes)` to
//!    compress a single request
//!
//! [`ConnectionState`] is the other per-connection piece: a typed map that
//! middleware uses to remember things between requests.

mod info;
mod negotiation;
mod state;

pub use info::{Encoding, InfoDirective};
pub use negotiation::Negotiation;
pub use state::ConnectionState;
