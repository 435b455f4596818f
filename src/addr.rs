//! Socket addresses and the ordered sentinel address lists built from them.
//!
//! Everything here is value-level: list operations return new lists and
//! perform no I/O. Order is significant — the first entry of a sentinel
//! address list is the preferred sentinel to try.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A `(host, port)` pair identifying a Redis or Sentinel server.
///
/// Two addresses are equal iff host and port match; the optional [`label`]
/// metadata is preserved across list transformations but takes no part in
/// equality or hashing. Ports arriving as decimal strings (as Sentinel
/// replies deliver them) are parsed up front via [`Addr::from_parts`].
///
/// [`label`]: Addr::label
#[derive(Debug, Clone)]
pub struct Addr {
    host: String,
    port: u16,
    label: Option<String>,
}

/// Errors from constructing an [`Addr`].
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum AddrError {
    /// The host component is an empty string.
    #[error("host must be a non-empty string")]
    EmptyHost,
    /// The port component is not a decimal integer in `0..=65535`.
    #[error("invalid port: {0:?}")]
    InvalidPort(String),
}

impl Addr {
    /// Constructs an address from a host and an already-numeric port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        debug_assert!(!host.is_empty(), "Addr host must be non-empty");
        Addr {
            host,
            port,
            label: None,
        }
    }

    /// Constructs an address from a host and a decimal port string.
    ///
    /// This is the parse used on Sentinel replies, which report ports as
    /// bulk strings. Hosts are kept verbatim, so IPv6 literals pass through
    /// untouched.
    pub fn from_parts(host: &str, port: &str) -> Result<Self, AddrError> {
        if host.is_empty() {
            return Err(AddrError::EmptyHost);
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| AddrError::InvalidPort(port.into()))?;
        Ok(Addr::new(host, port))
    }

    /// Attaches descriptive metadata (e.g. a server name) to the address.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// The host component.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port component.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Descriptive metadata, if any. Not part of address equality.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

impl PartialEq for Addr {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for Addr {}

impl Hash for Addr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<(&str, u16)> for Addr {
    fn from((host, port): (&str, u16)) -> Self {
        Addr::new(host, port)
    }
}

impl From<(String, u16)> for Addr {
    fn from((host, port): (String, u16)) -> Self {
        Addr::new(host, port)
    }
}

/// Produces the qualified string form of a possibly namespaced name:
/// `"ns/name"` when a namespace is given, `"name"` otherwise.
///
/// Used to normalize master-name keys and name-like command arguments.
pub fn qualify(ns: Option<&str>, name: &str) -> String {
    match ns {
        Some(ns) => format!("{}/{}", ns, name),
        None => name.to_string(),
    }
}

/// Appends each of `addrs` not already present, preserving input order.
pub fn add_back(list: &[Addr], addrs: impl IntoIterator<Item = Addr>) -> Vec<Addr> {
    let mut out = list.to_vec();
    for addr in addrs {
        if !out.contains(&addr) {
            out.push(addr);
        }
    }
    out
}

/// Ensures `addr` is the first element.
///
/// Returns the input unchanged when `addr` already leads the list;
/// otherwise removes any prior occurrence and prepends. The prior
/// occurrence's metadata wins over the argument's.
pub fn add_front(list: &[Addr], addr: Addr) -> Vec<Addr> {
    if list.first() == Some(&addr) {
        return list.to_vec();
    }
    let mut out = Vec::with_capacity(list.len() + 1);
    match list.iter().find(|a| **a == addr) {
        Some(existing) => out.push(existing.clone()),
        None => out.push(addr.clone()),
    }
    out.extend(list.iter().filter(|a| **a != addr).cloned());
    out
}

/// Drops all occurrences of `addr`.
pub fn remove(list: &[Addr], addr: &Addr) -> Vec<Addr> {
    list.iter().filter(|a| *a != addr).cloned().collect()
}

/// Deduplicates by address equality, keeping the first occurrence
/// (and therefore its metadata).
pub fn dedupe(list: impl IntoIterator<Item = Addr>) -> Vec<Addr> {
    let mut out = Vec::new();
    for addr in list {
        if !out.contains(&addr) {
            out.push(addr);
        }
    }
    out
}

/// Normalizes a sentinel address map: deduplicates every value list while
/// preserving first-occurrence metadata. Keys are already qualified strings
/// (see [`qualify`]) and pass through unchanged.
pub fn clean(map: HashMap<String, Vec<Addr>>) -> HashMap<String, Vec<Addr>> {
    map.into_iter().map(|(k, v)| (k, dedupe(v))).collect()
}
