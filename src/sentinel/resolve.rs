//! Master resolution: ask the configured sentinels who the master is,
//! confirm the answer with `ROLE`, and keep the sentinel list fresh from
//! gossip along the way.

use std::time::Duration;

use tokio::time::Instant;

use crate::addr::Addr;
use crate::connection::{ConnError, ConnOpts, SentinelConn};
use crate::connector::Connector;
use crate::events::{CallbackTable, Event, EventKind};
use crate::resp3::arg::Arg;
use crate::resp3::reply::Reply;

use super::spec::{SentinelOpts, SentinelSpec};

/// Per-request option overrides, merged over the spec's
/// [`SentinelOpts`] (which in turn sit on the process defaults).
#[derive(Debug, Clone, Default)]
pub struct ResolveOpts {
    /// Override the total resolution budget.
    pub timeout: Option<Duration>,
    /// Override the pause between attempt rounds.
    pub retry_delay: Option<Duration>,
    /// Override the transient-connection options.
    pub conn: Option<ConnOpts>,
    /// Override gossip merging.
    pub add_missing_sentinels: Option<bool>,
    /// Per-request observers, consulted after the process and spec tables.
    pub cbs: Option<CallbackTable>,
}

/// How one attempt against one sentinel (or one synthetic log entry) ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptKind {
    /// The sentinel could not be reached or the conversation broke.
    Unreachable,
    /// The sentinel answered but does not know the master.
    Ignorant,
    /// The reported candidate failed the `ROLE` check.
    Misidentified,
    /// The sentinel answered something unusable.
    OtherError,
    /// Synthetic entry: a retry round began after sleeping.
    RetryAfterSleep,
    /// Synthetic entry: the budget ran out.
    Timeout,
}

impl AttemptKind {
    /// The log-friendly name of this outcome.
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptKind::Unreachable => "unreachable",
            AttemptKind::Ignorant => "ignorant",
            AttemptKind::Misidentified => "misidentified",
            AttemptKind::OtherError => "other-error",
            AttemptKind::RetryAfterSleep => "retry-after-sleep",
            AttemptKind::Timeout => "timeout",
        }
    }
}

/// One entry of the attempt log carried by
/// [`ResolveError::Timeout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// 1-based attempt counter at the time of the entry.
    pub index: u32,
    /// The sentinel involved; absent on synthetic entries.
    pub addr: Option<Addr>,
    /// The outcome.
    pub kind: AttemptKind,
    /// Time since the resolution started.
    pub elapsed: Duration,
    /// Extra context, e.g. the role a misidentified candidate reported.
    pub detail: Option<String>,
}

/// Failed-attempt totals for a single resolution call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorCounts {
    /// Sentinels that could not be reached.
    pub unreachable: u64,
    /// Sentinels that do not know the master.
    pub ignorant: u64,
    /// Candidates that failed the role check.
    pub misidentified: u64,
    /// Everything else.
    pub other: u64,
}

/// Resolution failures. Per-sentinel connection problems never surface
/// here — they land in the statistics and the attempt log.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The spec holds no sentinel addresses for the master.
    #[error("no sentinel addresses in spec for master {master:?}")]
    NoSentinelAddrs {
        /// The master service name.
        master: String,
    },
    /// The budget ran out before any sentinel's answer was confirmed.
    #[error(
        "resolving master {master:?} timed out after {n_attempts} attempts and {n_retries} retries"
    )]
    Timeout {
        /// The master service name.
        master: String,
        /// Sentinel attempts made across all rounds.
        n_attempts: u32,
        /// Retry rounds slept through.
        n_retries: u32,
        /// Failed-attempt totals for this call.
        counts: ErrorCounts,
        /// The full attempt log, synthetic entries included.
        attempts: Vec<Attempt>,
    },
}

// Hosts with these names short-circuit to their bucket without touching
// the network; used to exercise failure paths deterministically.
const SIMULATED_UNREACHABLE: &str = "unreachable";
const SIMULATED_IGNORANT: &str = "ignorant";
const SIMULATED_MISIDENTIFIED: &str = "misidentified";

struct Merged {
    timeout: Duration,
    retry_delay: Duration,
    conn: ConnOpts,
    add_missing: bool,
}

impl Merged {
    fn new(base: &SentinelOpts, req: &ResolveOpts) -> Self {
        Merged {
            timeout: req.timeout.unwrap_or(base.timeout),
            retry_delay: req.retry_delay.unwrap_or(base.retry_delay),
            conn: req.conn.clone().unwrap_or_else(|| base.conn.clone()),
            add_missing: req
                .add_missing_sentinels
                .unwrap_or(base.add_missing_sentinels),
        }
    }
}

enum Examined {
    /// The sentinel reported this master address.
    Candidate(Addr),
    Failure(AttemptKind),
}

impl SentinelSpec {
    /// Resolves and confirms the current master address for `master`.
    ///
    /// Walks the sentinel list in order, `ROLE`-checks the first reported
    /// candidate, and on success promotes the reporting sentinel to the
    /// head of the list, merges gossiped sentinels, updates the resolved
    /// cache, and fires `ResolveSuccess`. Rounds repeat with a
    /// `retry_delay` pause until the `timeout` budget would be exceeded.
    pub async fn resolve_master_addr<C: Connector>(
        &self,
        connector: &C,
        master: &str,
        req: &ResolveOpts,
    ) -> Result<Addr, ResolveError> {
        let merged = Merged::new(self.opts(), req);
        let req_cbs = req.cbs.as_ref();
        self.resolve_stats_for(master).bump_requests();

        let t0 = Instant::now();
        let mut n_attempts: u32 = 0;
        let mut n_retries: u32 = 0;
        let mut counts = ErrorCounts::default();
        let mut attempts: Vec<Attempt> = Vec::new();
        let mut reported: Vec<Addr> = Vec::new();

        loop {
            let list = self.sentinel_addrs_for(master);
            if list.is_empty() {
                return Err(self.resolve_failed(
                    master,
                    req_cbs,
                    ResolveError::NoSentinelAddrs {
                        master: master.to_string(),
                    },
                ));
            }

            let mut candidate = None;
            for sentinel in &list {
                n_attempts += 1;
                self.resolve_stats_for(master).bump_attempts();
                let stats = self.sentinel_stats_for(sentinel);
                stats.bump_attempts();

                let started = Instant::now();
                match examine_sentinel(connector, sentinel, master, &merged, &mut reported).await
                {
                    Examined::Candidate(addr) => {
                        tracing::debug!(%sentinel, master, candidate = %addr, "sentinel reported master");
                        candidate = Some((sentinel.clone(), addr));
                        break;
                    }
                    Examined::Failure(kind) => {
                        tracing::debug!(%sentinel, master, outcome = kind.as_str(), "sentinel attempt failed");
                        stats.bump_errors();
                        match kind {
                            AttemptKind::Unreachable => {
                                stats.bump_unreachable();
                                counts.unreachable += 1;
                            }
                            AttemptKind::Ignorant => {
                                stats.bump_ignorant();
                                counts.ignorant += 1;
                            }
                            AttemptKind::Misidentified => {
                                stats.bump_misidentified();
                                counts.misidentified += 1;
                            }
                            _ => {
                                stats.bump_other_errors();
                                counts.other += 1;
                            }
                        }
                        attempts.push(Attempt {
                            index: n_attempts,
                            addr: Some(sentinel.clone()),
                            kind,
                            elapsed: started.elapsed(),
                            detail: None,
                        });
                    }
                }
            }

            if let Some((sentinel, addr)) = candidate {
                let started = Instant::now();
                match confirm_role(connector, &addr, &merged).await {
                    Ok(()) => {
                        // Sentinels that know the master move up; gossiped
                        // peers join at the back.
                        self.add_front(master, sentinel.clone(), req_cbs);
                        if merged.add_missing && !reported.is_empty() {
                            self.add_back(master, std::mem::take(&mut reported), req_cbs);
                        }
                        self.sentinel_stats_for(&sentinel).bump_successes();
                        self.resolve_stats_for(master).bump_successes();

                        let elapsed = t0.elapsed();
                        tracing::debug!(master, addr = %addr, ?elapsed, "master resolved");
                        self.layers(req_cbs).fire(EventKind::ResolveSuccess, || {
                            let mut event = Event::new(EventKind::ResolveSuccess, master);
                            event.addr = Some(&addr);
                            event.elapsed = Some(elapsed);
                            event
                        });
                        self.reset_master_addr(master, addr.clone(), req_cbs);
                        return Ok(addr);
                    }
                    Err(role) => {
                        tracing::debug!(%sentinel, master, role = %role, "candidate misidentified");
                        let stats = self.sentinel_stats_for(&sentinel);
                        stats.bump_errors();
                        stats.bump_misidentified();
                        counts.misidentified += 1;
                        attempts.push(Attempt {
                            index: n_attempts,
                            addr: Some(sentinel),
                            kind: AttemptKind::Misidentified,
                            elapsed: started.elapsed(),
                            detail: Some(role),
                        });
                    }
                }
            }

            // No confirmed candidate this round: sleep and retry, unless
            // the next round could not finish inside the budget.
            let elapsed = t0.elapsed();
            if elapsed + merged.retry_delay > merged.timeout {
                attempts.push(Attempt {
                    index: n_attempts,
                    addr: None,
                    kind: AttemptKind::Timeout,
                    elapsed,
                    detail: None,
                });
                return Err(self.resolve_failed(
                    master,
                    req_cbs,
                    ResolveError::Timeout {
                        master: master.to_string(),
                        n_attempts,
                        n_retries,
                        counts,
                        attempts,
                    },
                ));
            }
            tokio::time::sleep(merged.retry_delay).await;
            n_retries += 1;
            attempts.push(Attempt {
                index: n_attempts,
                addr: None,
                kind: AttemptKind::RetryAfterSleep,
                elapsed: t0.elapsed(),
                detail: None,
            });
        }
    }

    fn resolve_failed(
        &self,
        master: &str,
        req_cbs: Option<&CallbackTable>,
        err: ResolveError,
    ) -> ResolveError {
        self.resolve_stats_for(master).bump_errors();
        let summary = err.to_string();
        tracing::warn!(master, error = %summary, "resolve failed");
        self.layers(req_cbs).fire(EventKind::ResolveError, || {
            let mut event = Event::new(EventKind::ResolveError, master);
            event.error = Some(&summary);
            event
        });
        err
    }
}

async fn examine_sentinel<C: Connector>(
    connector: &C,
    sentinel: &Addr,
    master: &str,
    merged: &Merged,
    reported: &mut Vec<Addr>,
) -> Examined {
    match sentinel.host() {
        SIMULATED_UNREACHABLE => return Examined::Failure(AttemptKind::Unreachable),
        SIMULATED_IGNORANT => return Examined::Failure(AttemptKind::Ignorant),
        SIMULATED_MISIDENTIFIED => return Examined::Failure(AttemptKind::Misidentified),
        _ => {}
    }

    let mut conn = match SentinelConn::open(connector, sentinel, &merged.conn).await {
        Ok(conn) => conn,
        Err(_) => return Examined::Failure(AttemptKind::Unreachable),
    };

    let get_master: Vec<Arg> = vec![
        "SENTINEL".into(),
        "get-master-addr-by-name".into(),
        master.into(),
    ];
    let gossip: Vec<Arg> = vec!["SENTINEL".into(), "sentinels".into(), master.into()];
    let requests: Vec<&[Arg]> = if merged.add_missing {
        vec![&get_master, &gossip]
    } else {
        vec![&get_master]
    };

    let replies = match conn.exchange(&requests).await {
        Ok(replies) => replies,
        Err(ConnError::Encode(_)) | Err(ConnError::Reply(_)) => {
            return Examined::Failure(AttemptKind::OtherError)
        }
        Err(_) => return Examined::Failure(AttemptKind::Unreachable),
    };

    // Gossip first: even a sentinel that has lost the master can still
    // tell us about its peers.
    if let Some(reply) = replies.get(1) {
        collect_reported(reply, reported);
    }

    match replies.first() {
        Some(Reply::Null) => Examined::Failure(AttemptKind::Ignorant),
        Some(Reply::Array(items)) if items.len() >= 2 => {
            match (items[0].as_str(), items[1].as_str()) {
                (Some(host), Some(port)) => match Addr::from_parts(host, port) {
                    Ok(addr) => Examined::Candidate(addr),
                    Err(_) => Examined::Failure(AttemptKind::OtherError),
                },
                _ => Examined::Failure(AttemptKind::OtherError),
            }
        }
        _ => Examined::Failure(AttemptKind::OtherError),
    }
}

// A sentinel descriptor is a map in RESP3 or an alternating key/value
// array in RESP2; either way, `ip` and `port` identify the peer.
fn collect_reported(reply: &Reply, reported: &mut Vec<Addr>) {
    let Reply::Array(descriptors) = reply else {
        return;
    };
    for descriptor in descriptors {
        let mut ip = None;
        let mut port = None;
        let mut visit = |key: &Reply, value: &Reply| match key.as_str() {
            Some("ip") => ip = value.as_str().map(str::to_owned),
            Some("port") => port = value.as_str().map(str::to_owned),
            _ => {}
        };
        match descriptor {
            Reply::Map(pairs) => {
                for (key, value) in pairs {
                    visit(key, value);
                }
            }
            Reply::Array(items) => {
                for pair in items.chunks_exact(2) {
                    visit(&pair[0], &pair[1]);
                }
            }
            _ => continue,
        }
        if let (Some(ip), Some(port)) = (ip, port) {
            if let Ok(addr) = Addr::from_parts(&ip, &port) {
                if !reported.contains(&addr) {
                    reported.push(addr);
                }
            }
        }
    }
}

// Any outcome other than a first element of "master" — nil, an error
// reply, a malformed reply, or a transport failure mid-check — counts as
// misidentification, so the round retries instead of aborting.
async fn confirm_role<C: Connector>(
    connector: &C,
    candidate: &Addr,
    merged: &Merged,
) -> Result<(), String> {
    let mut conn = SentinelConn::open(connector, candidate, &merged.conn)
        .await
        .map_err(|err| format!("role check connection failed: {err}"))?;

    let role: Vec<Arg> = vec!["ROLE".into()];
    let replies = conn
        .exchange(&[&role])
        .await
        .map_err(|err| format!("role check failed: {err}"))?;

    match replies.first() {
        Some(Reply::Array(items)) => match items.first().and_then(Reply::as_str) {
            Some("master") => Ok(()),
            Some(role) => Err(role.to_string()),
            None => Err("unknown".to_string()),
        },
        _ => Err("unknown".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gossip_descriptors_in_both_wire_forms() {
        let mut reported = Vec::new();

        // RESP2: alternating key/value bulks
        let flat = Reply::Array(vec![Reply::Array(vec![
            Reply::Bulk(b"name".to_vec()),
            Reply::Bulk(b"s1".to_vec()),
            Reply::Bulk(b"ip".to_vec()),
            Reply::Bulk(b"10.0.0.1".to_vec()),
            Reply::Bulk(b"port".to_vec()),
            Reply::Bulk(b"26379".to_vec()),
        ])]);
        collect_reported(&flat, &mut reported);

        // RESP3: map form
        let map = Reply::Array(vec![Reply::Map(vec![
            (
                Reply::Bulk(b"ip".to_vec()),
                Reply::Bulk(b"10.0.0.2".to_vec()),
            ),
            (
                Reply::Bulk(b"port".to_vec()),
                Reply::Bulk(b"26380".to_vec()),
            ),
        ])]);
        collect_reported(&map, &mut reported);

        assert_eq!(
            reported,
            vec![Addr::new("10.0.0.1", 26379), Addr::new("10.0.0.2", 26380)]
        );
    }

    #[test]
    fn gossip_ignores_incomplete_descriptors() {
        let mut reported = Vec::new();
        let incomplete = Reply::Array(vec![
            Reply::Array(vec![
                Reply::Bulk(b"ip".to_vec()),
                Reply::Bulk(b"10.0.0.1".to_vec()),
            ]),
            Reply::Bulk(b"not a descriptor".to_vec()),
            Reply::Null,
        ]);
        collect_reported(&incomplete, &mut reported);
        assert!(reported.is_empty());
    }

    #[test]
    fn gossip_dedupes_across_sentinels() {
        let mut reported = vec![Addr::new("10.0.0.1", 26379)];
        let repeat = Reply::Array(vec![Reply::Array(vec![
            Reply::Bulk(b"ip".to_vec()),
            Reply::Bulk(b"10.0.0.1".to_vec()),
            Reply::Bulk(b"port".to_vec()),
            Reply::Bulk(b"26379".to_vec()),
        ])]);
        collect_reported(&repeat, &mut reported);
        assert_eq!(reported.len(), 1);
    }
}
