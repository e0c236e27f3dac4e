//! Typed view of a decoded request term.
//!
//! Every frame payload decodes to one of:
//!
//! ```text
//! (call, Module, Function, [Arg, ...])
//! (cast, Module, Function, [Arg, ...])
//! (info, Command, Options)
//! (gzip, CompressedBytes)
//! ```
//!
//! Module, function and command names may be atoms or UTF-8 binaries.

use std::net::SocketAddr;

use bytes::Bytes;

use crate::codec::{atoms, Term};
use crate::control::ConnectionState;
use crate::fault::Fault;

/// Whether the client waits for the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Synchronous: answered with `(reply, value)` or an error.
    Call,
    /// Fire-and-forget: answered with `(noreply,)`.
    Cast,
}

impl CallKind {
    /// Tag atom name.
    pub fn as_str(self) -> &'static str {
        match self {
            CallKind::Call => atoms::CALL,
            CallKind::Cast => atoms::CAST,
        }
    }
}

/// A `call` or `cast` on its way through middleware and dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    /// Call or cast.
    pub kind: CallKind,
    /// Registered module name.
    pub module: String,
    /// Function name within the module.
    pub function: String,
    /// Positional arguments.
    pub args: Vec<Term>,
    /// Remote address, when known.
    pub peer: Option<SocketAddr>,
    /// State shared by all requests on the originating connection.
    pub state: ConnectionState,
}

impl CallRequest {
    /// Create a `call` request.
    pub fn call(module: impl Into<String>, function: impl Into<String>, args: Vec<Term>) -> Self {
        Self {
            kind: CallKind::Call,
            module: module.into(),
            function: function.into(),
            args,
            peer: None,
            state: ConnectionState::new(),
        }
    }

    /// Create a `cast` request.
    pub fn cast(module: impl Into<String>, function: impl Into<String>, args: Vec<Term>) -> Self {
        Self {
            kind: CallKind::Cast,
            ..Self::call(module, function, args)
        }
    }

    /// Attach the peer address.
    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Attach a connection's state.
    pub fn with_state(mut self, state: ConnectionState) -> Self {
        self.state = state;
        self
    }

    /// Rebuild the request term, as a client would send it.
    pub fn to_term(&self) -> Term {
        Term::tuple(vec![
            Term::atom(self.kind.as_str()),
            Term::atom(self.module.as_str()),
            Term::atom(self.function.as_str()),
            Term::list(self.args.clone()),
        ])
    }
}

/// A classified request frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// `call` or `cast`.
    Call(CallRequest),
    /// `(info, Command, Options)`; options are validated by the negotiator.
    Info {
        /// Command name.
        command: String,
        /// Raw options term.
        options: Term,
    },
    /// `(gzip, Bytes)`; the compressed bytes are not inspected here.
    Gzip(Bytes),
}

impl Request {
    /// Classify a decoded term by its leading atom.
    ///
    /// Any unrecognized shape is a `BadData` fault.
    pub fn from_term(term: Term) -> Result<Self, Fault> {
        let mut items = match term {
            Term::Tuple(items) if !items.is_empty() => items,
            other => return Err(Fault::bad_data(format!("expected request tuple, got {other:?}"))),
        };

        let tag = match items[0].as_atom() {
            Some(tag) => tag.to_string(),
            None => return Err(Fault::bad_data("request tag is not an atom")),
        };

        match (tag.as_str(), items.len()) {
            (atoms::CALL, 4) | (atoms::CAST, 4) => {
                let kind = if tag == atoms::CALL {
                    CallKind::Call
                } else {
                    CallKind::Cast
                };
                let args = match items.pop() {
                    Some(Term::List(args)) => args,
                    _ => return Err(Fault::bad_data("call arguments must be a list")),
                };
                let function = name_of(&items[2], "function")?;
                let module = name_of(&items[1], "module")?;
                Ok(Request::Call(CallRequest {
                    kind,
                    module,
                    function,
                    args,
                    peer: None,
                    state: ConnectionState::new(),
                }))
            }
            (atoms::INFO, 3) => {
                let options = items.pop().unwrap_or_else(Term::nil);
                let command = name_of(&items[1], "info command")?;
                Ok(Request::Info { command, options })
            }
            (atoms::GZIP, 2) => match items.pop() {
                Some(Term::Binary(data)) => Ok(Request::Gzip(data)),
                _ => Err(Fault::bad_data("gzip payload must be a binary")),
            },
            (tag, arity) => Err(Fault::bad_data(format!(
                "unrecognized request {{{tag}, ...}} of arity {arity}"
            ))),
        }
    }
}

fn name_of(term: &Term, what: &str) -> Result<String, Fault> {
    term.as_name()
        .map(str::to_string)
        .ok_or_else(|| Fault::bad_data(format!("{what} name must be an atom or binary")))
}
