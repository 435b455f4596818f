//! Transient connections for sentinel conversations.
//!
//! A [`SentinelConn`] lives for one short exchange: dial with a timeout,
//! optionally `AUTH`, pipeline a handful of commands, read the replies
//! back, drop. These are deliberately not pooled — the peer is a Sentinel
//! (or a candidate master being role-checked), not a data server.

use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::time::timeout;

use crate::addr::Addr;
use crate::connector::Connector;
use crate::resp3::arg::{Arg, ArgError, EncodeOptions};
use crate::resp3::reply::{parse_reply, Reply, ReplyError};
use crate::resp3::request::{write_requests, RequestError};

/// Credentials sent via `AUTH` when a connection opens.
///
/// Sentinels are authenticated with the same credentials as the data
/// servers they monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Auth {
    /// ACL username; legacy single-argument `AUTH` when absent.
    pub username: Option<String>,
    /// The password.
    pub password: String,
}

/// Options for opening and driving one transient connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnOpts {
    /// Budget for establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Budget for reading each reply.
    pub io_timeout: Duration,
    /// Credentials, if the peers require authentication.
    pub auth: Option<Auth>,
}

impl Default for ConnOpts {
    fn default() -> Self {
        ConnOpts {
            connect_timeout: Duration::from_millis(500),
            io_timeout: Duration::from_millis(500),
            auth: None,
        }
    }
}

/// Connection-level failures.
#[derive(Debug, thiserror::Error)]
pub enum ConnError {
    /// Transport failure.
    #[error("io error")]
    Io(#[from] std::io::Error),
    /// A request argument could not be encoded.
    #[error("encode error")]
    Encode(#[from] ArgError),
    /// The peer sent bytes this reader does not understand.
    #[error("reply error")]
    Reply(#[from] ReplyError),
    /// Connect or read exceeded its budget.
    #[error("timed out")]
    TimedOut,
    /// The peer closed the connection mid-conversation.
    #[error("connection closed by peer")]
    Closed,
    /// The peer rejected our `AUTH`.
    #[error("authentication failed: {0}")]
    Auth(String),
}

impl From<RequestError> for ConnError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Encode(e) => ConnError::Encode(e),
            RequestError::Io(e) => ConnError::Io(e),
        }
    }
}

/// One short-lived, buffered connection.
#[derive(Debug)]
pub struct SentinelConn<T> {
    stream: T,
    rbuf: BytesMut,
    io_timeout: Duration,
}

impl<T: AsyncRead + AsyncWrite + Unpin> SentinelConn<T> {
    /// Dials `addr` through `connector` and authenticates when configured.
    pub async fn open<C: Connector<Stream = T>>(
        connector: &C,
        addr: &Addr,
        opts: &ConnOpts,
    ) -> Result<Self, ConnError> {
        let stream = timeout(opts.connect_timeout, connector.connect(addr))
            .await
            .map_err(|_| ConnError::TimedOut)??;
        let mut conn = SentinelConn {
            stream,
            rbuf: BytesMut::with_capacity(4096),
            io_timeout: opts.io_timeout,
        };
        if let Some(auth) = &opts.auth {
            conn.authenticate(auth).await?;
        }
        Ok(conn)
    }

    /// Pipelines the non-empty requests and reads one reply per command,
    /// in order.
    pub async fn exchange(&mut self, requests: &[&[Arg]]) -> Result<Vec<Reply>, ConnError> {
        let expected = requests.iter().filter(|r| !r.is_empty()).count();
        write_requests(&mut self.stream, requests, EncodeOptions::default()).await?;

        let mut replies = Vec::with_capacity(expected);
        while replies.len() < expected {
            if let Some((reply, consumed)) = parse_reply(&self.rbuf)? {
                self.rbuf.advance(consumed);
                replies.push(reply);
                continue;
            }
            let read = timeout(self.io_timeout, self.stream.read_buf(&mut self.rbuf))
                .await
                .map_err(|_| ConnError::TimedOut)??;
            if read == 0 {
                return Err(ConnError::Closed);
            }
        }
        Ok(replies)
    }

    async fn authenticate(&mut self, auth: &Auth) -> Result<(), ConnError> {
        let mut args: Vec<Arg> = vec!["AUTH".into()];
        if let Some(username) = &auth.username {
            args.push(username.as_str().into());
        }
        args.push(auth.password.as_str().into());

        let replies = self.exchange(&[&args]).await?;
        match replies.first() {
            Some(Reply::Simple(ok)) if ok == "OK" => Ok(()),
            Some(Reply::Error(err)) => Err(ConnError::Auth(err.clone())),
            other => Err(ConnError::Auth(format!(
                "unexpected AUTH reply: {:?}",
                other
            ))),
        }
    }
}
