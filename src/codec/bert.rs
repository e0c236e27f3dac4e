//! BERT codec: the subset of the Erlang external term format used on the wire.
//!
//! Every encoded term starts with the version byte `131`. Supported tags:
//!
//! ```text
//! 97  SMALL_INTEGER_EXT    u8
//! 98  INTEGER_EXT          i32 BE
//! 110 SMALL_BIG_EXT        n:u8 sign:u8 digits (LE), fits in i64
//! 70  NEW_FLOAT_EXT        f64 BE
//! 100 ATOM_EXT             len:u16 latin-1
//! 115 SMALL_ATOM_EXT       len:u8  latin-1
//! 118 ATOM_UTF8_EXT        len:u16 utf-8
//! 119 SMALL_ATOM_UTF8_EXT  len:u8  utf-8
//! 104 SMALL_TUPLE_EXT      arity:u8
//! 105 LARGE_TUPLE_EXT      arity:u32
//! 106 NIL_EXT
//! 107 STRING_EXT           len:u16 bytes (decoded as a list of integers)
//! 108 LIST_EXT             len:u32 elements tail (tail must be NIL)
//! 109 BINARY_EXT           len:u32 bytes
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::term::{Atom, Term};
use crate::error::{BertletError, Result};

/// Version magic byte that prefixes every encoded term.
pub const VERSION_MAGIC: u8 = 131;

/// Maximum nesting depth accepted by the decoder.
pub const MAX_DEPTH: usize = 256;

mod tag {
    pub const NEW_FLOAT: u8 = 70;
    pub const SMALL_INTEGER: u8 = 97;
    pub const INTEGER: u8 = 98;
    pub const ATOM: u8 = 100;
    pub const SMALL_TUPLE: u8 = 104;
    pub const LARGE_TUPLE: u8 = 105;
    pub const NIL: u8 = 106;
    pub const STRING: u8 = 107;
    pub const LIST: u8 = 108;
    pub const BINARY: u8 = 109;
    pub const SMALL_BIG: u8 = 110;
    pub const SMALL_ATOM: u8 = 115;
    pub const ATOM_UTF8: u8 = 118;
    pub const SMALL_ATOM_UTF8: u8 = 119;
}

/// BERT codec.
///
/// Marker struct with static methods, like the other codecs in this crate.
///
/// # Example
///
/// ```
/// use bertlet::codec::{BertCodec, Term};
///
/// let term = Term::tuple(vec![Term::atom("reply"), Term::from(42)]);
/// let bytes = BertCodec::encode(&term).unwrap();
/// assert_eq!(bytes[0], 131);
/// assert_eq!(BertCodec::decode(&bytes).unwrap(), term);
/// ```
pub struct BertCodec;

impl BertCodec {
    /// Encode a term, including the version byte.
    pub fn encode(term: &Term) -> Result<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(VERSION_MAGIC);
        encode_term(&mut buf, term)?;
        Ok(buf.to_vec())
    }

    /// Decode one term. Trailing bytes are rejected.
    pub fn decode(data: &[u8]) -> Result<Term> {
        let mut buf = data;
        if buf.is_empty() {
            return Err(decode_err("empty payload"));
        }
        let magic = buf.get_u8();
        if magic != VERSION_MAGIC {
            return Err(decode_err(format!("bad version byte {magic}")));
        }
        let term = decode_term(&mut buf, 0)?;
        if buf.has_remaining() {
            return Err(decode_err(format!(
                "{} trailing bytes after term",
                buf.remaining()
            )));
        }
        Ok(term)
    }
}

fn decode_err(msg: impl Into<String>) -> BertletError {
    BertletError::Decode(msg.into())
}

fn encode_term(buf: &mut BytesMut, term: &Term) -> Result<()> {
    match term {
        Term::Atom(atom) => encode_atom(buf, atom),
        Term::Integer(n) => {
            encode_integer(buf, *n);
            Ok(())
        }
        Term::Float(f) => {
            buf.put_u8(tag::NEW_FLOAT);
            buf.put_f64(*f);
            Ok(())
        }
        Term::Binary(data) => {
            let len = u32::try_from(data.len())
                .map_err(|_| BertletError::Encode("binary longer than u32::MAX".to_string()))?;
            buf.put_u8(tag::BINARY);
            buf.put_u32(len);
            buf.put_slice(data);
            Ok(())
        }
        Term::Tuple(items) => {
            match u8::try_from(items.len()) {
                Ok(arity) => {
                    buf.put_u8(tag::SMALL_TUPLE);
                    buf.put_u8(arity);
                }
                Err(_) => {
                    let arity = u32::try_from(items.len()).map_err(|_| {
                        BertletError::Encode("tuple arity exceeds u32::MAX".to_string())
                    })?;
                    buf.put_u8(tag::LARGE_TUPLE);
                    buf.put_u32(arity);
                }
            }
            items.iter().try_for_each(|item| encode_term(buf, item))
        }
        Term::List(items) => {
            if items.is_empty() {
                buf.put_u8(tag::NIL);
                return Ok(());
            }
            let len = u32::try_from(items.len())
                .map_err(|_| BertletError::Encode("list longer than u32::MAX".to_string()))?;
            buf.put_u8(tag::LIST);
            buf.put_u32(len);
            for item in items {
                encode_term(buf, item)?;
            }
            buf.put_u8(tag::NIL);
            Ok(())
        }
    }
}

fn encode_atom(buf: &mut BytesMut, atom: &Atom) -> Result<()> {
    let name = atom.as_str().as_bytes();
    match u8::try_from(name.len()) {
        Ok(len) => {
            buf.put_u8(tag::SMALL_ATOM_UTF8);
            buf.put_u8(len);
        }
        Err(_) => {
            let len = u16::try_from(name.len())
                .map_err(|_| BertletError::Encode(format!("atom too long ({} bytes)", name.len())))?;
            buf.put_u8(tag::ATOM_UTF8);
            buf.put_u16(len);
        }
    }
    buf.put_slice(name);
    Ok(())
}

fn encode_integer(buf: &mut BytesMut, n: i64) {
    if let Ok(small) = u8::try_from(n) {
        buf.put_u8(tag::SMALL_INTEGER);
        buf.put_u8(small);
    } else if let Ok(int) = i32::try_from(n) {
        buf.put_u8(tag::INTEGER);
        buf.put_i32(int);
    } else {
        let sign = u8::from(n < 0);
        let mut magnitude = n.unsigned_abs();
        let mut digits = Vec::with_capacity(8);
        while magnitude > 0 {
            digits.push((magnitude & 0xff) as u8);
            magnitude >>= 8;
        }
        buf.put_u8(tag::SMALL_BIG);
        buf.put_u8(digits.len() as u8);
        buf.put_u8(sign);
        buf.put_slice(&digits);
    }
}

fn need(buf: &&[u8], n: usize, what: &str) -> Result<()> {
    if buf.remaining() < n {
        return Err(decode_err(format!(
            "truncated {what}: need {n} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

fn take(buf: &mut &[u8], n: usize, what: &str) -> Result<Bytes> {
    need(buf, n, what)?;
    Ok(buf.copy_to_bytes(n))
}

fn decode_term(buf: &mut &[u8], depth: usize) -> Result<Term> {
    if depth > MAX_DEPTH {
        return Err(decode_err("term nested too deeply"));
    }
    need(buf, 1, "tag")?;
    match buf.get_u8() {
        tag::SMALL_INTEGER => {
            need(buf, 1, "small integer")?;
            Ok(Term::Integer(i64::from(buf.get_u8())))
        }
        tag::INTEGER => {
            need(buf, 4, "integer")?;
            Ok(Term::Integer(i64::from(buf.get_i32())))
        }
        tag::SMALL_BIG => decode_small_big(buf),
        tag::NEW_FLOAT => {
            need(buf, 8, "float")?;
            Ok(Term::Float(buf.get_f64()))
        }
        tag::ATOM => {
            need(buf, 2, "atom length")?;
            let len = usize::from(buf.get_u16());
            let name = take(buf, len, "atom")?;
            Ok(Term::atom(latin1(&name)))
        }
        tag::SMALL_ATOM => {
            need(buf, 1, "atom length")?;
            let len = usize::from(buf.get_u8());
            let name = take(buf, len, "atom")?;
            Ok(Term::atom(latin1(&name)))
        }
        tag::ATOM_UTF8 => {
            need(buf, 2, "atom length")?;
            let len = usize::from(buf.get_u16());
            decode_utf8_atom(buf, len)
        }
        tag::SMALL_ATOM_UTF8 => {
            need(buf, 1, "atom length")?;
            let len = usize::from(buf.get_u8());
            decode_utf8_atom(buf, len)
        }
        tag::SMALL_TUPLE => {
            need(buf, 1, "tuple arity")?;
            let arity = usize::from(buf.get_u8());
            decode_elements(buf, arity, depth).map(Term::Tuple)
        }
        tag::LARGE_TUPLE => {
            need(buf, 4, "tuple arity")?;
            let arity = buf.get_u32() as usize;
            decode_elements(buf, arity, depth).map(Term::Tuple)
        }
        tag::NIL => Ok(Term::nil()),
        tag::STRING => {
            need(buf, 2, "string length")?;
            let len = usize::from(buf.get_u16());
            let chars = take(buf, len, "string")?;
            Ok(Term::List(
                chars.iter().map(|&c| Term::Integer(i64::from(c))).collect(),
            ))
        }
        tag::LIST => {
            need(buf, 4, "list length")?;
            let len = buf.get_u32() as usize;
            let items = decode_elements(buf, len, depth)?;
            need(buf, 1, "list tail")?;
            match buf.get_u8() {
                tag::NIL => Ok(Term::List(items)),
                other => Err(decode_err(format!(
                    "improper list (tail tag {other}) is not supported"
                ))),
            }
        }
        tag::BINARY => {
            need(buf, 4, "binary length")?;
            let len = buf.get_u32() as usize;
            take(buf, len, "binary").map(Term::Binary)
        }
        other => Err(decode_err(format!("unsupported tag {other}"))),
    }
}

fn decode_elements(buf: &mut &[u8], count: usize, depth: usize) -> Result<Vec<Term>> {
    // Every element takes at least one byte, so cap the preallocation.
    let mut items = Vec::with_capacity(count.min(buf.remaining()));
    for _ in 0..count {
        items.push(decode_term(buf, depth + 1)?);
    }
    Ok(items)
}

fn decode_utf8_atom(buf: &mut &[u8], len: usize) -> Result<Term> {
    let name = take(buf, len, "atom")?;
    let name = std::str::from_utf8(&name).map_err(|e| decode_err(format!("atom: {e}")))?;
    Ok(Term::atom(name))
}

fn decode_small_big(buf: &mut &[u8]) -> Result<Term> {
    need(buf, 2, "big integer header")?;
    let n = usize::from(buf.get_u8());
    let sign = buf.get_u8();
    let digits = take(buf, n, "big integer")?;
    if n > 8 {
        return Err(decode_err(format!("big integer of {n} bytes exceeds i64")));
    }
    let magnitude = digits
        .iter()
        .rev()
        .fold(0u64, |acc, &d| (acc << 8) | u64::from(d));
    let value = if sign == 0 {
        i64::try_from(magnitude).map_err(|_| decode_err("big integer exceeds i64"))?
    } else if magnitude == 1u64 << 63 {
        i64::MIN
    } else {
        let m = i64::try_from(magnitude).map_err(|_| decode_err("big integer exceeds i64"))?;
        -m
    };
    Ok(Term::Integer(value))
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(term: Term) {
        let encoded = BertCodec::encode(&term).unwrap();
        assert_eq!(BertCodec::decode(&encoded).unwrap(), term);
    }

    #[test]
    fn test_known_encodings() {
        // {reply, 42}
        let term = Term::tuple(vec![Term::atom("reply"), Term::from(42)]);
        let bytes = BertCodec::encode(&term).unwrap();
        assert_eq!(
            bytes,
            vec![131, 104, 2, 119, 5, b'r', b'e', b'p', b'l', b'y', 97, 42]
        );

        assert_eq!(BertCodec::encode(&Term::nil()).unwrap(), vec![131, 106]);
        assert_eq!(
            BertCodec::encode(&Term::from(-1)).unwrap(),
            vec![131, 98, 0xff, 0xff, 0xff, 0xff]
        );
        assert_eq!(
            BertCodec::encode(&Term::from("hi")).unwrap(),
            vec![131, 109, 0, 0, 0, 2, b'h', b'i']
        );
    }

    #[test]
    fn test_integer_boundaries() {
        for n in [0, 255, 256, -1, i64::from(i32::MAX), i64::from(i32::MIN)] {
            roundtrip(Term::Integer(n));
        }
        for n in [1i64 << 40, -(1i64 << 40), i64::MAX, i64::MIN] {
            let bytes = BertCodec::encode(&Term::Integer(n)).unwrap();
            assert_eq!(bytes[1], tag::SMALL_BIG);
            assert_eq!(BertCodec::decode(&bytes).unwrap(), Term::Integer(n));
        }
    }

    #[test]
    fn test_nested_structures() {
        roundtrip(Term::tuple(vec![
            Term::atom("call"),
            Term::atom("m"),
            Term::atom("f"),
            Term::list(vec![
                Term::from(1.5),
                Term::tuple(vec![]),
                Term::list(vec![Term::from("x"), Term::nil()]),
            ]),
        ]));
    }

    #[test]
    fn test_large_tuple_and_long_atom() {
        let items: Vec<Term> = (0..300i64).map(Term::from).collect();
        let bytes = BertCodec::encode(&Term::Tuple(items.clone())).unwrap();
        assert_eq!(bytes[1], tag::LARGE_TUPLE);
        assert_eq!(BertCodec::decode(&bytes).unwrap(), Term::Tuple(items));

        roundtrip(Term::atom("a".repeat(300)));
    }

    #[test]
    fn test_decode_latin1_atoms_and_strings() {
        // SMALL_ATOM_EXT 'ok'
        assert_eq!(
            BertCodec::decode(&[131, 115, 2, b'o', b'k']).unwrap(),
            Term::atom("ok")
        );
        // ATOM_EXT 'ok'
        assert_eq!(
            BertCodec::decode(&[131, 100, 0, 2, b'o', b'k']).unwrap(),
            Term::atom("ok")
        );
        // STRING_EXT "ab"
        assert_eq!(
            BertCodec::decode(&[131, 107, 0, 2, b'a', b'b']).unwrap(),
            Term::list(vec![Term::from(97), Term::from(98)])
        );
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(BertCodec::decode(&[]).is_err());
        assert!(BertCodec::decode(&[130, 106]).is_err());
        // Truncated binary
        assert!(BertCodec::decode(&[131, 109, 0, 0, 0, 9, 1]).is_err());
        // Trailing bytes
        assert!(BertCodec::decode(&[131, 106, 106]).is_err());
        // Improper list [1 | 2]
        assert!(BertCodec::decode(&[131, 108, 0, 0, 0, 1, 97, 1, 97, 2]).is_err());
        // Unknown tag
        assert!(BertCodec::decode(&[131, 200]).is_err());
    }

    #[test]
    fn test_decode_huge_declared_length_does_not_allocate() {
        // Tuple claiming u32::MAX elements with no data.
        let err = BertCodec::decode(&[131, 105, 0xff, 0xff, 0xff, 0xff]).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_decode_depth_limit() {
        let mut bytes = vec![131];
        for _ in 0..(MAX_DEPTH + 2) {
            bytes.extend_from_slice(&[104, 1]);
        }
        bytes.push(106);
        let err = BertCodec::decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("nested"));
    }
}
