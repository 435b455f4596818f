//! Command argument encoding.
//!
//! Host values are converted into the tagged [`Arg`] variant at the API
//! boundary, so the hot write path is a single match and the wrapped-payload
//! marker policy lives in exactly one place. Values with no native RESP
//! form are serialized through the [`codec`](crate::codec) seam *at
//! conversion time* — a failing conversion can never leave a partially
//! written request on the wire.

use bytes::BufMut;

use crate::codec::{self, CodecError, FreezeOptions, FreezeSpec};

use super::write;

/// Marker payload written for a null argument: `00 5F`.
pub const NIL_MARKER: [u8; 2] = [0x00, 0x5F];
/// Marker prefix for an unwrapped byte array: `00 3C`.
pub const BIN_MARKER: [u8; 2] = [0x00, 0x3C];
/// Marker prefix for a serialized payload: `00 3E 4E 50 59 00`.
pub const NPY_MARKER: [u8; 6] = [0x00, 0x3E, 0x4E, 0x50, 0x59, 0x00];

/// Encoding policy threaded through the writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Prefix wrapped payloads (byte arrays, serialized values, null) with
    /// their marker sequence so a reader can reconstruct the original type.
    /// Enabled by default; never applies to string or numeric forms.
    pub blob_markers: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        EncodeOptions { blob_markers: true }
    }
}

/// Errors from encoding a single argument.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ArgError {
    /// A string argument begins with the reserved NUL byte while blob
    /// markers are enabled, which would collide with the marker space.
    #[error("string argument begins with the reserved null byte")]
    ReservedNull,
    /// The value has no wire form under the current encoding policy.
    #[error("unsupported argument type: {kind}")]
    UnsupportedArgType {
        /// What the offending value was.
        kind: &'static str,
    },
}

/// A single command argument, dispatch-ready.
///
/// Constructed via the `From` conversions for the common host types, or via
/// [`Arg::name`], [`Arg::ext`], [`Arg::into_raw`] and
/// [`Frozen`] for the wrapped forms.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// UTF-8 string, written as a bulk string.
    Str(String),
    /// Signed integer, written in the simple-long form.
    Int(i64),
    /// Double, written as a bulk string of its decimal form.
    Double(f64),
    /// An unwrapped byte array; `bin`-marked when markers are enabled.
    Bytes(Vec<u8>),
    /// The raw-bytes wrapper: written verbatim, never marker-prefixed.
    Raw(Vec<u8>),
    /// An eagerly frozen payload; `npy`-marked when markers are enabled,
    /// verbatim otherwise.
    Frozen {
        /// Codec options the payload was produced under.
        opts: FreezeOptions,
        /// The serialized bytes.
        payload: Vec<u8>,
    },
    /// Null; representable only when markers are enabled.
    Null,
    /// A value serialized at the conversion boundary because it has no
    /// native RESP form. Requires markers.
    Ext(Vec<u8>),
}

impl Arg {
    /// Converts a possibly namespaced name to its qualified string form,
    /// `"ns/name"` or bare `"name"`.
    pub fn name(ns: Option<&str>, name: &str) -> Arg {
        Arg::Str(crate::addr::qualify(ns, name))
    }

    /// Serializes an arbitrary value through the codec, eagerly.
    ///
    /// Codec failures surface here, at wrap time.
    pub fn ext<T: serde::Serialize + ?Sized>(
        value: &T,
        opts: &FreezeOptions,
    ) -> Result<Arg, CodecError> {
        Ok(Arg::Ext(codec::freeze(value, opts)?))
    }

    /// The raw-bytes wrapper: freezes this argument's bytes for verbatim
    /// output, bypassing markers.
    ///
    /// Idempotent on an already-raw argument; fails with
    /// [`ArgError::UnsupportedArgType`] for anything that is not a byte
    /// array.
    pub fn into_raw(self) -> Result<Arg, ArgError> {
        match self {
            Arg::Bytes(b) | Arg::Raw(b) => Ok(Arg::Raw(b)),
            other => Err(ArgError::UnsupportedArgType {
                kind: other.kind(),
            }),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Arg::Str(_) => "string",
            Arg::Int(_) => "integer",
            Arg::Double(_) => "double",
            Arg::Bytes(_) => "bytes",
            Arg::Raw(_) => "raw bytes",
            Arg::Frozen { .. } => "frozen",
            Arg::Null => "null",
            Arg::Ext(_) => "serialized value",
        }
    }

    /// Writes this argument's bulk form to `buf`.
    ///
    /// On error, nothing has been written.
    pub fn write<B: BufMut>(&self, buf: &mut B, opts: EncodeOptions) -> Result<(), ArgError> {
        match self {
            Arg::Str(s) => {
                if opts.blob_markers && s.as_bytes().first() == Some(&0x00) {
                    return Err(ArgError::ReservedNull);
                }
                write::write_bulk_str(buf, s);
            }
            Arg::Int(n) => write::write_simple_long(buf, *n),
            Arg::Double(d) => write::write_bulk_double(buf, *d),
            Arg::Bytes(b) => {
                if opts.blob_markers {
                    write::write_bulk_bytes_marked(buf, &BIN_MARKER, b);
                } else {
                    write::write_bulk_bytes(buf, b);
                }
            }
            Arg::Raw(b) => write::write_bulk_bytes(buf, b),
            Arg::Frozen { payload, .. } => {
                if opts.blob_markers {
                    write::write_bulk_bytes_marked(buf, &NPY_MARKER, payload);
                } else {
                    write::write_bulk_bytes(buf, payload);
                }
            }
            Arg::Null => {
                if !opts.blob_markers {
                    return Err(ArgError::UnsupportedArgType { kind: self.kind() });
                }
                write::write_bulk_bytes(buf, &NIL_MARKER);
            }
            Arg::Ext(payload) => {
                if !opts.blob_markers {
                    return Err(ArgError::UnsupportedArgType { kind: self.kind() });
                }
                write::write_bulk_bytes_marked(buf, &NPY_MARKER, payload);
            }
        }
        Ok(())
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Str(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Str(s)
    }
}

impl From<char> for Arg {
    fn from(c: char) -> Self {
        Arg::Str(c.to_string())
    }
}

macro_rules! arg_from_int {
    ($($int:ty)*) => {$(
        impl From<$int> for Arg {
            fn from(n: $int) -> Self {
                Arg::Int(n as i64)
            }
        }
    )*};
}

// the unsigned types stop at u32: every value still fits in an i64
arg_from_int!(i8 i16 i32 i64 u8 u16 u32);

impl From<f32> for Arg {
    fn from(d: f32) -> Self {
        Arg::Double(d.into())
    }
}

impl From<f64> for Arg {
    fn from(d: f64) -> Self {
        Arg::Double(d)
    }
}

impl From<&[u8]> for Arg {
    fn from(b: &[u8]) -> Self {
        Arg::Bytes(b.to_vec())
    }
}

impl From<Vec<u8>> for Arg {
    fn from(b: Vec<u8>) -> Self {
        Arg::Bytes(b)
    }
}

impl<T: Into<Arg>> From<Option<T>> for Arg {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Arg::Null,
        }
    }
}

/// A value frozen ahead of time: the original value, the codec options it
/// was serialized under, and the eagerly computed payload.
///
/// Keeping the original value around is what makes
/// [`refreeze`](Frozen::refreeze) with different options possible.
#[derive(Debug, Clone, PartialEq)]
pub struct Frozen<T> {
    value: T,
    opts: FreezeOptions,
    payload: Vec<u8>,
}

impl<T: serde::Serialize> Frozen<T> {
    /// Serializes `value` under the resolved options, eagerly.
    pub fn new(spec: impl Into<FreezeSpec>, value: T) -> Result<Self, CodecError> {
        let opts = spec.into().resolve(None);
        let payload = codec::freeze(&value, &opts)?;
        Ok(Frozen {
            value,
            opts,
            payload,
        })
    }

    /// Like [`new`](Frozen::new), resolving [`FreezeSpec::Dynamic`] against
    /// the given ambient default options.
    pub fn with_ambient(
        spec: FreezeSpec,
        ambient: Option<&FreezeOptions>,
        value: T,
    ) -> Result<Self, CodecError> {
        let opts = spec.resolve(ambient);
        let payload = codec::freeze(&value, &opts)?;
        Ok(Frozen {
            value,
            opts,
            payload,
        })
    }

    /// Re-wraps under possibly different options.
    ///
    /// With options equal to the current ones this is a no-op returning
    /// `self`; otherwise the retained value is serialized again.
    pub fn refreeze(self, spec: impl Into<FreezeSpec>) -> Result<Self, CodecError> {
        let opts = spec.into().resolve(None);
        if opts == self.opts {
            return Ok(self);
        }
        Frozen::new(FreezeSpec::Options(opts), self.value)
    }
}

impl<T> Frozen<T> {
    /// The options the payload was serialized under.
    pub fn opts(&self) -> &FreezeOptions {
        &self.opts
    }

    /// The serialized payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the wrapper, returning the original value.
    pub fn into_value(self) -> T {
        self.value
    }
}

impl<T> From<Frozen<T>> for Arg {
    fn from(frozen: Frozen<T>) -> Self {
        Arg::Frozen {
            opts: frozen.opts,
            payload: frozen.payload,
        }
    }
}
