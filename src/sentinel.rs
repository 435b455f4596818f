//! Sentinel-based master resolution.
//!
//! A [`SentinelSpec`] tracks, per named master service, an ordered list of
//! sentinel addresses, the last confirmed master, and statistics about how
//! the sentinels behave. [`SentinelSpec::resolve_master_addr`] runs the
//! resolution state machine: query sentinels in order, confirm the first
//! candidate with `ROLE`, promote whoever knew the answer, and learn about
//! new sentinels from gossip.

mod resolve;
mod spec;

#[cfg(test)]
mod tests;

pub use resolve::{Attempt, AttemptKind, ErrorCounts, ResolveError, ResolveOpts};
pub use spec::{ResolveStats, SentinelOpts, SentinelSpec, SentinelStats};
