//! sentis
//! ======
//!
//! `sentis` is the core of a Sentinel-aware Redis client: it discovers and
//! tracks the current master address for a named service by consulting the
//! service's Sentinel servers, and it encodes command arguments into the
//! RESP wire format.
//!
//! ## Resolving a master
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use sentis::addr::Addr;
//! use sentis::connector::TcpConnector;
//! use sentis::sentinel::{ResolveOpts, SentinelOpts, SentinelSpec};
//!
//! let mut sentinels = std::collections::HashMap::new();
//! sentinels.insert(
//!     "mymaster".to_string(),
//!     vec![Addr::new("127.0.0.1", 26379), Addr::new("127.0.0.1", 26380)],
//! );
//! let spec = SentinelSpec::new(sentinels, SentinelOpts::default());
//!
//! let master = spec
//!     .resolve_master_addr(&TcpConnector, "mymaster", &ResolveOpts::default())
//!     .await?;
//! println!("master is at {}", master);
//! # Ok(()) }
//! ```
//!
//! Successful resolutions promote the answering sentinel to the front of
//! the list and merge newly gossiped sentinels, so the spec converges on
//! the healthiest ordering as the deployment changes. Observers can watch
//! every transition through [`events::CallbackTable`]s.
//!
//! ## Encoding a request
//!
//! ```
//! use bytes::BytesMut;
//! use sentis::resp3::request::encode_requests;
//! use sentis::resp3::{Arg, EncodeOptions};
//!
//! let mut buf = BytesMut::new();
//! let ping: Vec<Arg> = vec!["PING".into()];
//! encode_requests(&mut buf, &[&ping], EncodeOptions::default()).unwrap();
//! assert_eq!(&buf[..], b"*1\r\n$4\r\nPING\r\n");
//! ```

#![deny(missing_docs)]
#![deny(missing_debug_implementations)]

pub mod addr;
pub mod codec;
pub mod connection;
pub mod connector;
pub mod events;
pub mod resp3;
pub mod sentinel;

pub use addr::Addr;
pub use sentinel::SentinelSpec;
