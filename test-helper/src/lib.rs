//! In-process fixture servers for resolver tests.
//!
//! These speak just enough RESP over a real TCP socket to stand in for a
//! Sentinel or a role-checked master. They are deliberately independent of
//! the library under test: requests are parsed with a minimal hand-rolled
//! command reader and replies are written as literal byte strings.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// A scripted Sentinel.
///
/// Answers `SENTINEL get-master-addr-by-name` with the configured master
/// (or a RESP2 null when absent), `SENTINEL sentinels` with the configured
/// peer descriptors, plus `PING` and `AUTH`.
#[derive(Debug, Clone, Default)]
pub struct MockSentinel {
    /// The master address to report; `None` plays an ignorant sentinel.
    pub master: Option<(String, u16)>,
    /// Peer sentinels to gossip.
    pub sentinels: Vec<(String, u16)>,
    /// Gossip in the RESP3 map form instead of flat key/value arrays.
    pub map_form: bool,
}

/// A running fixture server. Aborted on drop.
#[derive(Debug)]
pub struct MockHandle {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl MockHandle {
    /// Host to dial, always `127.0.0.1`.
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// The ephemeral port the fixture listens on.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl MockSentinel {
    /// Reports `master` and gossips no peers.
    pub fn reporting(host: &str, port: u16) -> Self {
        MockSentinel {
            master: Some((host.to_string(), port)),
            ..MockSentinel::default()
        }
    }

    /// Binds an ephemeral port and serves connections until dropped.
    pub async fn spawn(self) -> MockHandle {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            loop {
                let (sock, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                let script = self.clone();
                tokio::spawn(async move { script.serve(sock).await });
            }
        });
        MockHandle { addr, task }
    }

    async fn serve(&self, mut sock: TcpStream) {
        let mut buf = Vec::new();
        loop {
            let mut chunk = [0u8; 4096];
            let n = match sock.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            buf.extend_from_slice(&chunk[..n]);

            while let Some((command, consumed)) = read_command(&buf) {
                buf.drain(..consumed);
                let reply = self.reply_to(&command);
                if sock.write_all(&reply).await.is_err() {
                    return;
                }
            }
        }
    }

    fn reply_to(&self, command: &[Vec<u8>]) -> Vec<u8> {
        let tokens: Vec<String> = command
            .iter()
            .map(|t| String::from_utf8_lossy(t).into_owned())
            .collect();
        let head = tokens.first().map(|t| t.to_ascii_uppercase());

        match head.as_deref() {
            Some("PING") => b"+PONG\r\n".to_vec(),
            Some("AUTH") => b"+OK\r\n".to_vec(),
            Some("SENTINEL") => match tokens.get(1).map(String::as_str) {
                Some("get-master-addr-by-name") => match &self.master {
                    Some((host, port)) => {
                        let port = port.to_string();
                        let mut reply = format!("*2\r\n${}\r\n{}\r\n", host.len(), host);
                        reply.push_str(&format!("${}\r\n{}\r\n", port.len(), port));
                        reply.into_bytes()
                    }
                    None => b"*-1\r\n".to_vec(),
                },
                Some("sentinels") => self.gossip_reply(),
                _ => b"-ERR unknown SENTINEL subcommand\r\n".to_vec(),
            },
            _ => b"-ERR unknown command\r\n".to_vec(),
        }
    }

    fn gossip_reply(&self) -> Vec<u8> {
        let mut reply = format!("*{}\r\n", self.sentinels.len());
        for (host, port) in &self.sentinels {
            let port = port.to_string();
            if self.map_form {
                reply.push_str("%2\r\n");
            } else {
                reply.push_str("*6\r\n$4\r\nname\r\n$4\r\npeer\r\n");
            }
            reply.push_str(&format!("$2\r\nip\r\n${}\r\n{}\r\n", host.len(), host));
            reply.push_str(&format!("$4\r\nport\r\n${}\r\n{}\r\n", port.len(), port));
        }
        reply.into_bytes()
    }
}

/// Spawns a server that answers `ROLE` with `[<role>, 0, []]`.
///
/// `spawn_role_server("master")` confirms a candidate;
/// `spawn_role_server("slave")` makes it look misidentified.
pub async fn spawn_role_server(role: &str) -> MockHandle {
    let role = role.to_string();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        loop {
            let (mut sock, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };
            let role = role.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                loop {
                    let mut chunk = [0u8; 1024];
                    let n = match sock.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    buf.extend_from_slice(&chunk[..n]);
                    while let Some((command, consumed)) = read_command(&buf) {
                        buf.drain(..consumed);
                        let head = command
                            .first()
                            .map(|t| String::from_utf8_lossy(t).to_ascii_uppercase());
                        let reply = match head.as_deref() {
                            Some("ROLE") => {
                                format!("*3\r\n${}\r\n{}\r\n:0\r\n*0\r\n", role.len(), role)
                                    .into_bytes()
                            }
                            Some("AUTH") => b"+OK\r\n".to_vec(),
                            _ => b"-ERR unknown command\r\n".to_vec(),
                        };
                        if sock.write_all(&reply).await.is_err() {
                            return;
                        }
                    }
                }
            });
        }
    });
    MockHandle { addr, task }
}

/// Renders a Sentinel config file for fixtures:
///
/// ```text
/// port <P>
/// sentinel monitor <master> <ip> <port> <quorum>
/// sentinel down-after-milliseconds <master> 60000
/// ```
pub fn sentinel_config_file(
    port: u16,
    master: &str,
    master_ip: &str,
    master_port: u16,
    quorum: u32,
) -> String {
    format!(
        "port {port}\n\
         sentinel monitor {master} {master_ip} {master_port} {quorum}\n\
         sentinel down-after-milliseconds {master} 60000\n"
    )
}

// Minimal RESP command reader: `*<n>` followed by n bulk strings.
// Returns the argument list and bytes consumed, or None when incomplete.
// Fixture-only; malformed input panics.
fn read_command(buf: &[u8]) -> Option<(Vec<Vec<u8>>, usize)> {
    let mut pos = 0;

    fn read_line(buf: &[u8], pos: &mut usize) -> Option<String> {
        let rest = &buf[*pos..];
        let idx = rest.windows(2).position(|w| w == b"\r\n")?;
        let line = String::from_utf8(rest[..idx].to_vec()).expect("ascii header line");
        *pos += idx + 2;
        Some(line)
    }

    let header = read_line(buf, &mut pos)?;
    let count: usize = header
        .strip_prefix('*')
        .expect("command must be an array")
        .parse()
        .expect("array length");

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let len_line = read_line(buf, &mut pos)?;
        let len: usize = len_line
            .strip_prefix('$')
            .expect("argument must be a bulk string")
            .parse()
            .expect("bulk length");
        if buf.len() < pos + len + 2 {
            return None;
        }
        args.push(buf[pos..pos + len].to_vec());
        pos += len + 2;
    }
    Some((args, pos))
}
