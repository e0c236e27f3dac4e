//! # bertlet
//!
//! BERT-RPC server for Rust.
//!
//! Clients send BERT-encoded `call` and `cast` requests naming a module and
//! a function; the server dispatches them to registered async functions and
//! answers with `(reply, Value)`, `(noreply,)` or a structured error term.
//!
//! ## Architecture
//!
//! - **Framing**: 4-byte big-endian length prefix per BERT payload
//! - **Negotiation**: in-band `info` directives enable gzip per connection
//! - **Dispatch**: middleware hooks, module registry, one task per invocation
//! - **Transport**: TCP, optionally wrapped in TLS
//!
//! ## Example
//!
//! ```no_run
//! use bertlet::codec::Term;
//! use bertlet::fault::Fault;
//! use bertlet::handler::Module;
//! use bertlet::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> bertlet::Result<()> {
//!     let math = Module::new("math").function("div", |args: Vec<Term>| async move {
//!         match args.as_slice() {
//!             [Term::Integer(_), Term::Integer(0)] => {
//!                 Err(Fault::new("ZeroDivisionError", "division by zero"))
//!             }
//!             [Term::Integer(a), Term::Integer(b)] => Ok(Term::from(a / b)),
//!             _ => Err(Fault::new("TypeError", "expected two integers")),
//!         }
//!     });
//!
//!     let server = Server::builder()
//!         .config(ServerConfig::from_env()?)
//!         .register(math)
//!         .build();
//!     server.run().await
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod control;
pub mod error;
pub mod fault;
pub mod handler;
pub mod protocol;
pub mod transport;

mod server;

pub use config::{ServerConfig, TlsConfig};
pub use error::{BertletError, Result};
pub use fault::Fault;
pub use server::{serve, BoundServer, Server, ServerBuilder};
