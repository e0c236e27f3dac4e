//! `info` directive parsing.
//!
//! Only `encoding` and `accept_encoding` with the option list `[{gzip}]`
//! change connection state. Other commands are kept verbatim so they can be
//! logged and otherwise ignored.
//!
//! # Example
//!
//! ```
//! use bertlet::codec::{atoms, Term};
//! use bertlet::control::{Encoding, InfoDirective};
//!
//! let options = Term::list(vec![Term::tuple(vec![Term::atom(atoms::GZIP)])]);
//! let directive = InfoDirective::parse(atoms::ACCEPT_ENCODING, &options).unwrap();
//! assert_eq!(directive, InfoDirective::AcceptEncoding(Encoding::Gzip));
//! ```

use crate::codec::{atoms, Term};
use crate::fault::Fault;

/// Content encodings the server can negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// RFC 1952 gzip.
    Gzip,
}

/// A parsed `(info, Command, Options)` directive.
#[derive(Debug, Clone, PartialEq)]
pub enum InfoDirective {
    /// The next inbound frame is wrapped in this encoding.
    Encoding(Encoding),
    /// The client accepts responses in this encoding.
    AcceptEncoding(Encoding),
    /// Unrecognized command, ignored.
    Other {
        /// Command name.
        command: String,
        /// Option list.
        options: Vec<Term>,
    },
}

impl InfoDirective {
    /// Parse a command and its options.
    ///
    /// `options` must be a list; the recognized commands accept exactly
    /// `[{gzip}]`. Anything else is an `InvalidInfo` fault.
    pub fn parse(command: &str, options: &Term) -> Result<Self, Fault> {
        let options = options
            .as_list()
            .ok_or_else(|| Fault::invalid_info(format!("options for {command} must be a list")))?;

        match command {
            atoms::ENCODING => Ok(InfoDirective::Encoding(parse_encoding(command, options)?)),
            atoms::ACCEPT_ENCODING => Ok(InfoDirective::AcceptEncoding(parse_encoding(
                command, options,
            )?)),
            _ => Ok(InfoDirective::Other {
                command: command.to_string(),
                options: options.to_vec(),
            }),
        }
    }

    /// The directive term, as sent on the wire.
    pub fn to_term(&self) -> Term {
        let (command, options) = match self {
            InfoDirective::Encoding(enc) => (atoms::ENCODING, vec![encoding_option(*enc)]),
            InfoDirective::AcceptEncoding(enc) => {
                (atoms::ACCEPT_ENCODING, vec![encoding_option(*enc)])
            }
            InfoDirective::Other { command, options } => {
                return Term::tuple(vec![
                    Term::atom(atoms::INFO),
                    Term::atom(command.as_str()),
                    Term::list(options.clone()),
                ]);
            }
        };
        Term::tuple(vec![
            Term::atom(atoms::INFO),
            Term::atom(command),
            Term::list(options),
        ])
    }
}

fn parse_encoding(command: &str, options: &[Term]) -> Result<Encoding, Fault> {
    match options {
        [option] if is_gzip_option(option) => Ok(Encoding::Gzip),
        _ => Err(Fault::invalid_info(format!(
            "unsupported options for {command}: {options:?}"
        ))),
    }
}

fn is_gzip_option(term: &Term) -> bool {
    matches!(term.elements(), Some([name]) if name.is_atom(atoms::GZIP))
}

fn encoding_option(encoding: Encoding) -> Term {
    match encoding {
        Encoding::Gzip => Term::tuple(vec![Term::atom(atoms::GZIP)]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gzip_options() -> Term {
        Term::list(vec![Term::tuple(vec![Term::atom(atoms::GZIP)])])
    }

    #[test]
    fn test_parse_encoding() {
        assert_eq!(
            InfoDirective::parse(atoms::ENCODING, &gzip_options()).unwrap(),
            InfoDirective::Encoding(Encoding::Gzip)
        );
    }

    #[test]
    fn test_options_must_be_list() {
        let fault = InfoDirective::parse(atoms::ENCODING, &Term::atom("gzip")).unwrap_err();
        assert_eq!(fault.name(), "InvalidInfo");
        assert_eq!(fault.code(), 100);

        // even for commands we would otherwise ignore
        let fault = InfoDirective::parse("callback", &Term::from(1)).unwrap_err();
        assert_eq!(fault.name(), "InvalidInfo");
    }

    #[test]
    fn test_unsupported_encoding_options() {
        let cases = [
            Term::nil(),
            Term::list(vec![Term::tuple(vec![Term::atom("deflate")])]),
            Term::list(vec![Term::atom(atoms::GZIP)]),
            Term::list(vec![
                Term::tuple(vec![Term::atom(atoms::GZIP)]),
                Term::tuple(vec![Term::atom(atoms::GZIP)]),
            ]),
        ];
        for options in cases {
            let fault = InfoDirective::parse(atoms::ACCEPT_ENCODING, &options).unwrap_err();
            assert_eq!(fault.name(), "InvalidInfo");
        }
    }

    #[test]
    fn test_unknown_command_is_kept() {
        let options = Term::list(vec![Term::from(1)]);
        let directive = InfoDirective::parse("cache", &options).unwrap();
        assert_eq!(
            directive,
            InfoDirective::Other {
                command: "cache".into(),
                options: vec![Term::from(1)],
            }
        );
    }

    #[test]
    fn test_to_term() {
        let term = InfoDirective::Encoding(Encoding::Gzip).to_term();
        assert_eq!(
            term,
            Term::tuple(vec![
                Term::atom(atoms::INFO),
                Term::atom(atoms::ENCODING),
                gzip_options(),
            ])
        );
    }
}
