//! Term data model.
//!
//! A [`Term`] is one value of the BERT data model: atom, integer, float,
//! binary, tuple or list. Protocol tags are atoms and compare by value.
//!
//! # Example
//!
//! ```
//! use bertlet::codec::{atoms, Term};
//!
//! let request = Term::tuple(vec![
//!     Term::atom(atoms::CALL),
//!     Term::atom("math"),
//!     Term::atom("double"),
//!     Term::list(vec![Term::from(21)]),
//! ]);
//!
//! assert!(request.elements().unwrap()[0].is_atom(atoms::CALL));
//! ```

use std::fmt;

use bytes::Bytes;

/// Atom names used as protocol markers.
pub mod atoms {
    /// Synchronous request.
    pub const CALL: &str = "call";
    /// Fire-and-forget request.
    pub const CAST: &str = "cast";
    /// Successful `call` response.
    pub const REPLY: &str = "reply";
    /// `cast` response.
    pub const NOREPLY: &str = "noreply";
    /// Error response.
    pub const ERROR: &str = "error";
    /// Out-of-band negotiation directive.
    pub const INFO: &str = "info";
    /// Gzip wrapper tag and encoding option.
    pub const GZIP: &str = "gzip";
    /// Info command: next inbound frame is encoded.
    pub const ENCODING: &str = "encoding";
    /// Info command: peer accepts encoded responses.
    pub const ACCEPT_ENCODING: &str = "accept_encoding";
}

/// An interned symbolic constant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom(String);

impl Atom {
    /// Create an atom from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Atom name.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Atom {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A value in the term data model.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// Symbolic constant.
    Atom(Atom),
    /// Signed integer.
    Integer(i64),
    /// IEEE 754 double.
    Float(f64),
    /// Opaque byte string (also used for text).
    Binary(Bytes),
    /// Fixed-size ordered collection.
    Tuple(Vec<Term>),
    /// Proper list. The empty list is `nil`.
    List(Vec<Term>),
}

impl Term {
    /// Build an atom term.
    pub fn atom(name: impl Into<String>) -> Self {
        Term::Atom(Atom::new(name))
    }

    /// Build a tuple term.
    pub fn tuple(elements: Vec<Term>) -> Self {
        Term::Tuple(elements)
    }

    /// Build a list term.
    pub fn list(elements: Vec<Term>) -> Self {
        Term::List(elements)
    }

    /// Build a binary term from raw bytes.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Term::Binary(data.into())
    }

    /// Empty list.
    pub fn nil() -> Self {
        Term::List(Vec::new())
    }

    /// True if this is the atom `name`.
    #[inline]
    pub fn is_atom(&self, name: &str) -> bool {
        matches!(self, Term::Atom(a) if a.as_str() == name)
    }

    /// Atom name, if this is an atom.
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Term::Atom(a) => Some(a.as_str()),
            _ => None,
        }
    }

    /// Integer value, if this is an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Term::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Raw bytes, if this is a binary.
    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Term::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Text form of an atom or a UTF-8 binary.
    ///
    /// Module and function names arrive as either.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Term::Atom(a) => Some(a.as_str()),
            Term::Binary(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Tuple elements, if this is a tuple.
    pub fn elements(&self) -> Option<&[Term]> {
        match self {
            Term::Tuple(items) => Some(items),
            _ => None,
        }
    }

    /// List elements, if this is a list.
    pub fn as_list(&self) -> Option<&[Term]> {
        match self {
            Term::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<i64> for Term {
    fn from(n: i64) -> Self {
        Term::Integer(n)
    }
}

impl From<i32> for Term {
    fn from(n: i32) -> Self {
        Term::Integer(i64::from(n))
    }
}

impl From<f64> for Term {
    fn from(f: f64) -> Self {
        Term::Float(f)
    }
}

impl From<&str> for Term {
    fn from(s: &str) -> Self {
        Term::Binary(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Term {
    fn from(s: String) -> Self {
        Term::Binary(Bytes::from(s))
    }
}

impl From<Atom> for Term {
    fn from(a: Atom) -> Self {
        Term::Atom(a)
    }
}

impl From<Vec<Term>> for Term {
    fn from(items: Vec<Term>) -> Self {
        Term::List(items)
    }
}
