//! Connection acquisition seam.
//!
//! The resolver talks to many short-lived peers — each configured sentinel,
//! then the candidate master — so a [`Connector`] dials a caller-supplied
//! [`Addr`] per call rather than a fixed endpoint. Tests substitute their
//! own transports through this trait.

use std::fmt::Debug;
use std::marker::Unpin;

use futures_core::future::BoxFuture;
use tokio::io::{self, AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::addr::Addr;

/// Produces transient connections to arbitrary addresses.
///
/// The caller owns the returned stream and drops it when the conversation
/// ends; connectors never pool.
pub trait Connector: Send + Sync {
    /// Connection stream this connector produces.
    type Stream: AsyncRead + AsyncWrite + Debug + Unpin + Send;

    /// Connects to `addr`.
    fn connect<'a>(&'a self, addr: &'a Addr) -> BoxFuture<'a, io::Result<Self::Stream>>;
}

/// Plain TCP connector. Host names resolve through the system resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect<'a>(&'a self, addr: &'a Addr) -> BoxFuture<'a, io::Result<Self::Stream>> {
        Box::pin(TcpStream::connect((addr.host(), addr.port())))
    }
}
