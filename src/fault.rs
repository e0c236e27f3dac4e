//! Wire-visible faults and their translation to error terms.
//!
//! A [`Fault`] is what a client sees when something goes wrong: a stable
//! category and numeric code, the fault name, a message and a diagnostic
//! backtrace. [`Fault::to_wire_term`] produces
//!
//! ```text
//! (error, (error_type, error_code, fault_name, message, [line, ...]))
//! ```
//!
//! # Example
//!
//! ```
//! use bertlet::fault::{ErrorType, Fault};
//!
//! let fault = Fault::invalid_module();
//! assert_eq!(fault.error_type(), ErrorType::Server);
//! assert_eq!(fault.code(), 1);
//!
//! let custom = Fault::new("DivideByZero", "denominator was 0").with_code(7);
//! assert_eq!(custom.error_type(), ErrorType::User);
//! ```

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;

use crate::codec::{atoms, Term};
use crate::error::BertletError;

/// Code used when a fault does not declare one.
pub const DEFAULT_CODE: i64 = 100;

/// Base code of [`Fault::protocol_error`].
pub const PROTOCOL_ERROR_CODE: i64 = -99;

/// Fault category, sent as an atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// Malformed or out-of-order protocol traffic.
    Protocol,
    /// Resolution failures inside the server.
    Server,
    /// Faults raised by application code.
    User,
    /// Uncategorized.
    Unknown,
}

impl ErrorType {
    /// Atom name on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::Protocol => "protocol",
            ErrorType::Server => "server",
            ErrorType::User => "user",
            ErrorType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fault reported to the client as a wire error.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    name: String,
    error_type: ErrorType,
    code: i64,
    message: String,
    backtrace: Vec<String>,
}

impl Fault {
    /// Application fault: category `user`, code 100.
    ///
    /// Frames are captured here when `RUST_BACKTRACE` enables backtraces.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error_type: ErrorType::User,
            code: DEFAULT_CODE,
            message: message.into(),
            backtrace: capture_backtrace(),
        }
    }

    /// Override the category.
    pub fn with_type(mut self, error_type: ErrorType) -> Self {
        self.error_type = error_type;
        self
    }

    /// Override the numeric code.
    pub fn with_code(mut self, code: i64) -> Self {
        self.code = code;
        self
    }

    /// Replace the captured backtrace.
    pub fn with_backtrace(mut self, lines: Vec<String>) -> Self {
        self.backtrace = lines;
        self
    }

    /// Truncated or oversized frame header.
    pub fn bad_header(message: impl Into<String>) -> Self {
        Self::new("BadHeader", message)
            .with_type(ErrorType::Protocol)
            .with_code(1)
    }

    /// Undecodable payload or unrecognized request shape.
    pub fn bad_data(message: impl Into<String>) -> Self {
        Self::new("BadData", message)
            .with_type(ErrorType::Protocol)
            .with_code(2)
    }

    /// No module registered under the requested name.
    pub fn invalid_module() -> Self {
        Self::new("InvalidModule", "No such module")
            .with_type(ErrorType::Server)
            .with_code(1)
    }

    /// Missing or private function.
    pub fn invalid_function() -> Self {
        Self::new("InvalidFunction", "No such function")
            .with_type(ErrorType::Server)
            .with_code(2)
    }

    /// Malformed info directive.
    pub fn invalid_info(message: impl Into<String>) -> Self {
        Self::new("InvalidInfo", message).with_type(ErrorType::Server)
    }

    /// Generic protocol violation, category `unknown`, code -99.
    pub fn protocol_error(message: impl Into<String>) -> Self {
        Self::new("ProtocolError", message)
            .with_type(ErrorType::Unknown)
            .with_code(PROTOCOL_ERROR_CODE)
    }

    /// `(gzip, _)` arrived without a preceding `encoding` directive.
    pub fn gzip_not_negotiated() -> Self {
        Self::protocol_error("gzip encoding without prior info directive")
            .with_type(ErrorType::Protocol)
    }

    /// Invocation exceeded the configured call timeout.
    pub fn timeout(module: &str, function: &str, limit_ms: u128) -> Self {
        Self::new(
            "Timeout",
            format!("{module}:{function} did not complete within {limit_ms} ms"),
        )
        .with_type(ErrorType::Server)
        .with_code(3)
    }

    /// Invocation task panicked or was cancelled.
    ///
    /// Built after the task has unwound, so no backtrace is attached: one
    /// captured here would show the join site rather than the panic.
    pub fn panic(message: impl Into<String>) -> Self {
        Self::new("Panic", message).with_backtrace(Vec::new())
    }

    /// Build a [`Fault::panic`] from a failed invocation task.
    pub fn from_join_error(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            return Self::panic("invocation task was cancelled");
        }
        let payload = err.into_panic();
        Self::panic(panic_message(payload.as_ref()))
    }

    /// Map a transport or codec error to the fault reported to the peer.
    pub fn from_error(err: &BertletError) -> Self {
        match err {
            BertletError::MalformedHeader(_) | BertletError::FrameTooLarge { .. } => {
                Self::bad_header(err.to_string())
            }
            BertletError::Decode(_) | BertletError::Compression(_) => {
                Self::bad_data(err.to_string())
            }
            other => Self::protocol_error(other.to_string()),
        }
    }

    /// Fault name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Category.
    pub fn error_type(&self) -> ErrorType {
        self.error_type
    }

    /// Numeric code.
    pub fn code(&self) -> i64 {
        self.code
    }

    /// Primary message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Captured stack frames, possibly empty.
    pub fn backtrace(&self) -> &[String] {
        &self.backtrace
    }

    /// Translate into the wire error term.
    pub fn to_wire_term(&self) -> Term {
        let lines = self
            .backtrace
            .iter()
            .map(|line| Term::from(line.as_str()))
            .collect();

        Term::tuple(vec![
            Term::atom(atoms::ERROR),
            Term::tuple(vec![
                Term::atom(self.error_type.as_str()),
                Term::Integer(self.code),
                Term::from(self.name.as_str()),
                Term::from(self.message.as_str()),
                Term::list(lines),
            ]),
        ])
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {}): {}",
            self.name, self.error_type, self.code, self.message
        )
    }
}

impl From<BertletError> for Fault {
    fn from(err: BertletError) -> Self {
        Self::from_error(&err)
    }
}

/// True if `term` has the shape of a wire error.
pub fn is_wire_error(term: &Term) -> bool {
    matches!(term.elements(), Some([tag, _]) if tag.is_atom(atoms::ERROR))
}

fn capture_backtrace() -> Vec<String> {
    let backtrace = Backtrace::capture();
    if backtrace.status() != BacktraceStatus::Captured {
        return Vec::new();
    }
    backtrace
        .to_string()
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "invocation panicked".to_string()
    }
}
