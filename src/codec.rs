//! The freeze/thaw serialization seam.
//!
//! Values that have no native RESP form are serialized to a binary blob
//! before being written, and thawed back on the way out by whoever reads
//! them. The codec is `bincode` over `serde`: output is deterministic for
//! identical values and options, which is all the encoder relies on.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Codec configuration.
///
/// The options are part of a frozen value's identity: re-freezing with equal
/// options is a no-op, re-freezing with different options re-serializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FreezeOptions {
    /// Encode integers variable-width instead of fixed-width.
    pub varint: bool,
}

/// Either concrete codec options or a request to resolve them from the
/// ambient default in effect at the call site.
///
/// `Dynamic` is resolved explicitly via [`FreezeSpec::resolve`]; there is
/// no hidden thread-local. When no ambient default is threaded through,
/// the codec defaults apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreezeSpec {
    /// Use exactly these options.
    Options(FreezeOptions),
    /// Use the ambient default options.
    Dynamic,
}

impl FreezeSpec {
    /// Resolves to concrete options against an optional ambient default.
    pub fn resolve(self, ambient: Option<&FreezeOptions>) -> FreezeOptions {
        match self {
            FreezeSpec::Options(opts) => opts,
            FreezeSpec::Dynamic => ambient.copied().unwrap_or_default(),
        }
    }
}

impl From<FreezeOptions> for FreezeSpec {
    fn from(opts: FreezeOptions) -> Self {
        FreezeSpec::Options(opts)
    }
}

/// Codec failures. Freeze errors surface at wrap time, never during output.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("freeze failed")]
    Freeze(#[source] bincode::Error),
    /// Deserialization failed.
    #[error("thaw failed")]
    Thaw(#[source] bincode::Error),
}

/// Serializes `value` under `opts`.
pub fn freeze<T: Serialize + ?Sized>(
    value: &T,
    opts: &FreezeOptions,
) -> Result<Vec<u8>, CodecError> {
    use bincode::Options as _;
    let config = bincode::options().allow_trailing_bytes();
    if opts.varint {
        config
            .with_varint_encoding()
            .serialize(value)
            .map_err(CodecError::Freeze)
    } else {
        config
            .with_fixint_encoding()
            .serialize(value)
            .map_err(CodecError::Freeze)
    }
}

/// Deserializes bytes produced by [`freeze`] under the same `opts`.
pub fn thaw<T: DeserializeOwned>(bytes: &[u8], opts: &FreezeOptions) -> Result<T, CodecError> {
    use bincode::Options as _;
    let config = bincode::options().allow_trailing_bytes();
    if opts.varint {
        config
            .with_varint_encoding()
            .deserialize(bytes)
            .map_err(CodecError::Thaw)
    } else {
        config
            .with_fixint_encoding()
            .deserialize(bytes)
            .map_err(CodecError::Thaw)
    }
}
