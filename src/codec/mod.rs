//! Codec module - term model and payload serialization.
//!
//! - [`Term`] - the value model carried by every frame
//! - [`BertCodec`] - BERT encode/decode (Erlang external term format subset)
//! - [`GzipCodec`] - gzip wrapper used by the compression negotiation
//!
//! # Design
//!
//! Codecs are marker structs with static methods rather than trait objects.
//!
//! # Example
//!
//! ```
//! use bertlet::codec::{BertCodec, GzipCodec, Term};
//!
//! let term = Term::list(vec![Term::from(1), Term::from("two")]);
//! let encoded = BertCodec::encode(&term).unwrap();
//! let zipped = GzipCodec::compress(&encoded).unwrap();
//! let unzipped = GzipCodec::decompress(&zipped, 1024).unwrap();
//! assert_eq!(BertCodec::decode(&unzipped).unwrap(), term);
//! ```

mod bert;
mod gzip;
mod term;

pub use bert::{BertCodec, MAX_DEPTH, VERSION_MAGIC};
pub use gzip::GzipCodec;
pub use term::{atoms, Atom, Term};
