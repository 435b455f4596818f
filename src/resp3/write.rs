//! Low-level RESP wire writers.
//!
//! Each writer appends one protocol element to a [`BufMut`] sink. Integer
//! text comes from `itoa` and double text from `ryu`, written straight into
//! the buffer. The hot small-number encodings are precomputed: array/bulk
//! length prefixes for `0..=255` and integer lines for the full `i16`
//! range. Correctness never depends on a cache hit — out-of-range values
//! take the formatting path.

use bytes::BufMut;
use once_cell::sync::Lazy;

pub(crate) const CRLF: &[u8] = b"\r\n";

const ARRAY: u8 = b'*';
const BULK: u8 = b'$';
const LONG: u8 = b':';

const LEN_CACHE_MAX: usize = 255;
const LONG_CACHE_MIN: i64 = i16::MIN as i64;
const LONG_CACHE_MAX: i64 = i16::MAX as i64;

fn prefixed_line(tag: u8, n: i64) -> Box<[u8]> {
    let mut nbuf = itoa::Buffer::new();
    let digits = nbuf.format(n).as_bytes();
    let mut line = Vec::with_capacity(1 + digits.len() + CRLF.len());
    line.push(tag);
    line.extend_from_slice(digits);
    line.extend_from_slice(CRLF);
    line.into_boxed_slice()
}

static ARRAY_LEN_CACHE: Lazy<Box<[Box<[u8]>]>> = Lazy::new(|| {
    (0..=LEN_CACHE_MAX as i64)
        .map(|n| prefixed_line(ARRAY, n))
        .collect()
});

static BULK_LEN_CACHE: Lazy<Box<[Box<[u8]>]>> = Lazy::new(|| {
    (0..=LEN_CACHE_MAX as i64)
        .map(|n| prefixed_line(BULK, n))
        .collect()
});

static LONG_CACHE: Lazy<Box<[Box<[u8]>]>> = Lazy::new(|| {
    (LONG_CACHE_MIN..=LONG_CACHE_MAX)
        .map(|n| prefixed_line(LONG, n))
        .collect()
});

fn put_len_line<B: BufMut>(buf: &mut B, tag: u8, cache: &[Box<[u8]>], n: usize) {
    if n <= LEN_CACHE_MAX {
        buf.put_slice(&cache[n]);
    } else {
        let mut nbuf = itoa::Buffer::new();
        buf.put_u8(tag);
        buf.put_slice(nbuf.format(n).as_bytes());
        buf.put_slice(CRLF);
    }
}

/// Writes an array header: `*<n>\r\n`.
pub fn write_array_len<B: BufMut>(buf: &mut B, n: usize) {
    put_len_line(buf, ARRAY, &ARRAY_LEN_CACHE, n);
}

/// Writes a bulk-string header: `$<n>\r\n`.
pub fn write_bulk_len<B: BufMut>(buf: &mut B, n: usize) {
    put_len_line(buf, BULK, &BULK_LEN_CACHE, n);
}

/// Writes an integer in the simple-long form: `:<n>\r\n`.
pub fn write_simple_long<B: BufMut>(buf: &mut B, n: i64) {
    if (LONG_CACHE_MIN..=LONG_CACHE_MAX).contains(&n) {
        buf.put_slice(&LONG_CACHE[(n - LONG_CACHE_MIN) as usize]);
    } else {
        let mut nbuf = itoa::Buffer::new();
        buf.put_u8(LONG);
        buf.put_slice(nbuf.format(n).as_bytes());
        buf.put_slice(CRLF);
    }
}

/// Writes a double as a bulk string of its decimal form:
/// `$<len>\r\n<decimal>\r\n`.
pub fn write_bulk_double<B: BufMut>(buf: &mut B, d: f64) {
    debug_assert!(!d.is_nan(), "RESP has no NaN representation");
    let mut fbuf = ryu::Buffer::new();
    write_bulk_bytes(buf, fbuf.format(d).as_bytes());
}

/// Writes a UTF-8 string as a bulk string.
pub fn write_bulk_str<B: BufMut>(buf: &mut B, s: &str) {
    write_bulk_bytes(buf, s.as_bytes());
}

/// Writes a bulk string: `$<len>\r\n<payload>\r\n`.
pub fn write_bulk_bytes<B: BufMut>(buf: &mut B, payload: &[u8]) {
    write_bulk_len(buf, payload.len());
    buf.put_slice(payload);
    buf.put_slice(CRLF);
}

/// Writes a bulk string whose payload is `marker` followed by `payload`:
/// `$<marker_len+payload_len>\r\n<marker><payload>\r\n`.
///
/// Used to prefix wrapped payloads with their magic sequence without an
/// intermediate concatenation.
pub fn write_bulk_bytes_marked<B: BufMut>(buf: &mut B, marker: &[u8], payload: &[u8]) {
    write_bulk_len(buf, marker.len() + payload.len());
    buf.put_slice(marker);
    buf.put_slice(payload);
    buf.put_slice(CRLF);
}
