//! A minimal reply reader for the sentinel conversations the resolver has.
//!
//! This is deliberately not a general RESP client parser: it covers the
//! shapes `SENTINEL get-master-addr-by-name`, `SENTINEL sentinels`, `ROLE`
//! and `AUTH` produce. Sentinels are queried without a `HELLO` upgrade, so
//! the RESP2 null forms (`$-1`, `*-1`) are accepted alongside the RESP3
//! `_\r\n`.

use memchr::memmem::Finder;
use once_cell::sync::Lazy;

use super::write::CRLF;

// sentinel replies are shallow and small; anything past these bounds is
// malformed or hostile
const MAX_DEPTH: usize = 8;
const MAX_ELEMENTS: i64 = 4096;
const MAX_BULK_LEN: i64 = 1024 * 1024;

/// One parsed reply element.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Simple string (`+OK`).
    Simple(String),
    /// Error reply (`-ERR ...`).
    Error(String),
    /// Integer (`:1`).
    Int(i64),
    /// Bulk string (`$3\r\nfoo`).
    Bulk(Vec<u8>),
    /// Array of replies.
    Array(Vec<Reply>),
    /// RESP3 map.
    Map(Vec<(Reply, Reply)>),
    /// Null, in any of its wire forms.
    Null,
}

impl Reply {
    /// The reply's text, when it is a simple string or UTF-8 bulk.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Reply::Simple(s) => Some(s),
            Reply::Bulk(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Whether this reply is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Reply::Null)
    }
}

/// Malformed-reply errors.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ReplyError {
    /// The first byte of an element is not a known type prefix.
    #[error("invalid reply prefix: {0:#04x}")]
    InvalidPrefix(u8),
    /// A bulk payload was not terminated by `\r\n`.
    #[error("expected \\r\\n after payload")]
    ExpectedCrlf,
    /// An integer line did not parse.
    #[error("failed to parse integer")]
    ParseIntFailed,
    /// A simple string or error line was not UTF-8.
    #[error("invalid utf-8 in line reply")]
    InvalidUtf8,
    /// A declared element count or bulk length is out of range.
    #[error("invalid declared length: {0}")]
    InvalidLength(i64),
    /// Nesting beyond anything a sentinel reply can legitimately contain.
    #[error("reply nested too deeply")]
    NestedTooDeep,
}

/// Tries to parse one complete reply from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the reply and
/// the number of bytes it consumed.
pub fn parse_reply(buf: &[u8]) -> Result<Option<(Reply, usize)>, ReplyError> {
    let mut cursor = buf;
    match next_reply(&mut cursor, 0) {
        Ok(reply) => Ok(Some((reply, buf.len() - cursor.len()))),
        Err(None) => Ok(None),
        Err(Some(err)) => Err(err),
    }
}

// `Err(None)` means the buffer does not yet hold a complete element.
fn next_reply(buf: &mut &[u8], depth: usize) -> Result<Reply, Option<ReplyError>> {
    if depth > MAX_DEPTH {
        return Err(Some(ReplyError::NestedTooDeep));
    }
    let (&prefix, rest) = buf.split_first().ok_or(None)?;
    let mut cursor = rest;

    let reply = match prefix {
        b'+' => Reply::Simple(line_str(&mut cursor)?),
        b'-' => Reply::Error(line_str(&mut cursor)?),
        b':' => Reply::Int(line_i64(&mut cursor)?),
        b'$' => match line_i64(&mut cursor)? {
            -1 => Reply::Null,
            len if !(0..=MAX_BULK_LEN).contains(&len) => {
                return Err(Some(ReplyError::InvalidLength(len)))
            }
            len => Reply::Bulk(take_payload(&mut cursor, len as usize)?.to_vec()),
        },
        b'*' => match line_i64(&mut cursor)? {
            -1 => Reply::Null,
            len if !(0..=MAX_ELEMENTS).contains(&len) => {
                return Err(Some(ReplyError::InvalidLength(len)))
            }
            len => {
                let mut items = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    items.push(next_reply(&mut cursor, depth + 1)?);
                }
                Reply::Array(items)
            }
        },
        b'%' => match line_i64(&mut cursor)? {
            len if !(0..=MAX_ELEMENTS).contains(&len) => {
                return Err(Some(ReplyError::InvalidLength(len)))
            }
            len => {
                let mut pairs = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    let key = next_reply(&mut cursor, depth + 1)?;
                    let value = next_reply(&mut cursor, depth + 1)?;
                    pairs.push((key, value));
                }
                Reply::Map(pairs)
            }
        },
        b'_' => {
            until_crlf(&mut cursor)?;
            Reply::Null
        }
        other => return Err(Some(ReplyError::InvalidPrefix(other))),
    };

    *buf = cursor;
    Ok(reply)
}

fn until_crlf<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], Option<ReplyError>> {
    static CRLF_SEARCH: Lazy<Finder> = Lazy::new(|| Finder::new(CRLF));

    let idx = CRLF_SEARCH.find(buf).ok_or(None)?;
    let line = &buf[..idx];
    *buf = &buf[idx + CRLF.len()..];
    Ok(line)
}

fn line_str(buf: &mut &[u8]) -> Result<String, Option<ReplyError>> {
    let line = until_crlf(buf)?;
    std::str::from_utf8(line)
        .map(str::to_owned)
        .map_err(|_| Some(ReplyError::InvalidUtf8))
}

fn line_i64(buf: &mut &[u8]) -> Result<i64, Option<ReplyError>> {
    let line = until_crlf(buf)?;
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(Some(ReplyError::ParseIntFailed))
}

fn take_payload<'a>(buf: &mut &'a [u8], len: usize) -> Result<&'a [u8], Option<ReplyError>> {
    if buf.len() < len + CRLF.len() {
        return Err(None);
    }
    let (payload_crlf, rest) = buf.split_at(len + CRLF.len());
    let (payload, crlf) = payload_crlf.split_at(len);
    if crlf != CRLF {
        return Err(Some(ReplyError::ExpectedCrlf));
    }
    *buf = rest;
    Ok(payload)
}
