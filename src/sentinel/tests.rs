use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use helper::{spawn_role_server, MockSentinel};

use crate::addr::Addr;
use crate::connector::TcpConnector;
use crate::events::{CallbackTable, EventKind};

use super::{ResolveError, ResolveOpts, SentinelOpts, SentinelSpec};

fn spec_for(master: &str, sentinels: Vec<Addr>) -> SentinelSpec {
    let mut map = HashMap::new();
    map.insert(master.to_string(), sentinels);
    SentinelSpec::new(map, SentinelOpts::default())
}

fn counting(kind: EventKind) -> (CallbackTable, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let table = {
        let count = Arc::clone(&count);
        CallbackTable::new().on(kind, move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    };
    (table, count)
}

#[tokio::test]
async fn resolves_after_an_ignorant_sentinel() {
    let master_srv = spawn_role_server("master").await;
    let sentinel_srv = MockSentinel::reporting(&master_srv.host(), master_srv.port())
        .spawn()
        .await;

    let ignorant = Addr::new("ignorant", 0);
    let reporting = Addr::new(sentinel_srv.host(), sentinel_srv.port());
    let spec = spec_for("mymaster", vec![ignorant.clone(), reporting.clone()]);

    let events = Arc::new(Mutex::new(Vec::new()));
    let cbs = {
        let events = Arc::clone(&events);
        let push = move |kind: EventKind| {
            let events = Arc::clone(&events);
            move |_: &crate::events::Event<'_>| events.lock().unwrap().push(kind)
        };
        CallbackTable::new()
            .on(EventKind::ResolveSuccess, push(EventKind::ResolveSuccess))
            .on(EventKind::ResolveChange, push(EventKind::ResolveChange))
    };
    let opts = ResolveOpts {
        cbs: Some(cbs),
        ..ResolveOpts::default()
    };

    let resolved = spec
        .resolve_master_addr(&TcpConnector, "mymaster", &opts)
        .await
        .unwrap();

    let expected = Addr::new(master_srv.host(), master_srv.port());
    assert_eq!(resolved, expected);
    assert_eq!(spec.master_addr("mymaster"), Some(expected));

    // the sentinel that knew the answer moved to the head
    assert_eq!(
        spec.sentinel_addrs_for("mymaster"),
        vec![reporting.clone(), ignorant.clone()]
    );

    let fired = events.lock().unwrap().clone();
    assert_eq!(
        fired,
        vec![EventKind::ResolveSuccess, EventKind::ResolveChange]
    );

    assert_eq!(spec.resolve_stats_for("mymaster").n_requests(), 1);
    assert_eq!(spec.resolve_stats_for("mymaster").n_successes(), 1);
    assert_eq!(spec.resolve_stats_for("mymaster").n_changes(), 1);
    assert_eq!(spec.sentinel_stats_for(&ignorant).n_ignorant(), 1);
    assert_eq!(spec.sentinel_stats_for(&reporting).n_successes(), 1);
}

#[tokio::test]
async fn repeated_resolution_to_the_same_master_changes_nothing() {
    let master_srv = spawn_role_server("master").await;
    let sentinel_srv = MockSentinel::reporting(&master_srv.host(), master_srv.port())
        .spawn()
        .await;

    let spec = spec_for(
        "mymaster",
        vec![Addr::new(sentinel_srv.host(), sentinel_srv.port())],
    );
    let (cbs, changes) = counting(EventKind::ResolveChange);
    let opts = ResolveOpts {
        cbs: Some(cbs),
        ..ResolveOpts::default()
    };

    for _ in 0..2 {
        spec.resolve_master_addr(&TcpConnector, "mymaster", &opts)
            .await
            .unwrap();
    }

    assert_eq!(changes.load(Ordering::SeqCst), 1);
    assert_eq!(spec.resolve_stats_for("mymaster").n_changes(), 1);
    assert_eq!(spec.resolve_stats_for("mymaster").n_successes(), 2);
}

#[tokio::test]
async fn gossiped_sentinels_join_the_list() {
    let master_srv = spawn_role_server("master").await;
    let mut reporting = MockSentinel::reporting(&master_srv.host(), master_srv.port());
    reporting.sentinels = vec![
        ("10.0.0.8".to_string(), 26379),
        ("10.0.0.9".to_string(), 26380),
    ];
    let sentinel_srv = reporting.spawn().await;

    let configured = Addr::new(sentinel_srv.host(), sentinel_srv.port());
    let spec = spec_for("mymaster", vec![configured.clone()]);

    spec.resolve_master_addr(&TcpConnector, "mymaster", &ResolveOpts::default())
        .await
        .unwrap();

    assert_eq!(
        spec.sentinel_addrs_for("mymaster"),
        vec![
            configured,
            Addr::new("10.0.0.8", 26379),
            Addr::new("10.0.0.9", 26380),
        ]
    );
}

#[tokio::test]
async fn gossip_is_skipped_when_disabled() {
    let master_srv = spawn_role_server("master").await;
    let mut reporting = MockSentinel::reporting(&master_srv.host(), master_srv.port());
    reporting.sentinels = vec![("10.0.0.8".to_string(), 26379)];
    let sentinel_srv = reporting.spawn().await;

    let configured = Addr::new(sentinel_srv.host(), sentinel_srv.port());
    let spec = spec_for("mymaster", vec![configured.clone()]);
    let opts = ResolveOpts {
        add_missing_sentinels: Some(false),
        ..ResolveOpts::default()
    };

    spec.resolve_master_addr(&TcpConnector, "mymaster", &opts)
        .await
        .unwrap();

    assert_eq!(spec.sentinel_addrs_for("mymaster"), vec![configured]);
}

#[tokio::test]
async fn gossip_in_map_form_is_understood() {
    let master_srv = spawn_role_server("master").await;
    let mut reporting = MockSentinel::reporting(&master_srv.host(), master_srv.port());
    reporting.sentinels = vec![("10.0.0.8".to_string(), 26379)];
    reporting.map_form = true;
    let sentinel_srv = reporting.spawn().await;

    let spec = spec_for(
        "mymaster",
        vec![Addr::new(sentinel_srv.host(), sentinel_srv.port())],
    );

    spec.resolve_master_addr(&TcpConnector, "mymaster", &ResolveOpts::default())
        .await
        .unwrap();

    assert!(spec
        .sentinel_addrs_for("mymaster")
        .contains(&Addr::new("10.0.0.8", 26379)));
}

#[tokio::test]
async fn empty_spec_fails_without_io() {
    let spec = spec_for("mymaster", vec![]);
    let (cbs, errors) = counting(EventKind::ResolveError);
    let opts = ResolveOpts {
        cbs: Some(cbs),
        ..ResolveOpts::default()
    };

    let err = spec
        .resolve_master_addr(&TcpConnector, "mymaster", &opts)
        .await
        .unwrap_err();

    assert!(matches!(err, ResolveError::NoSentinelAddrs { master } if master == "mymaster"));
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(spec.resolve_stats_for("mymaster").n_errors(), 1);
}

#[tokio::test(start_paused = true)]
async fn unreachable_sentinels_time_out_after_retries() {
    let sentinels = vec![Addr::new("unreachable", 0), Addr::new("unreachable", 1)];
    let spec = spec_for("mymaster", sentinels.clone());
    let (cbs, errors) = counting(EventKind::ResolveError);
    let opts = ResolveOpts {
        timeout: Some(Duration::from_millis(100)),
        retry_delay: Some(Duration::from_millis(40)),
        cbs: Some(cbs),
        ..ResolveOpts::default()
    };

    let err = spec
        .resolve_master_addr(&TcpConnector, "mymaster", &opts)
        .await
        .unwrap_err();

    match err {
        ResolveError::Timeout {
            n_attempts,
            n_retries,
            counts,
            attempts,
            ..
        } => {
            assert!(n_retries >= 2, "expected at least two retries");
            let rounds = u64::from(n_retries) + 1;
            assert_eq!(counts.unreachable, sentinels.len() as u64 * rounds);
            assert_eq!(u64::from(n_attempts), counts.unreachable);
            // synthetic entries: one per sleep plus the final timeout
            use super::AttemptKind;
            assert_eq!(
                attempts
                    .iter()
                    .filter(|a| a.kind == AttemptKind::RetryAfterSleep)
                    .count() as u32,
                n_retries
            );
            assert_eq!(attempts.last().unwrap().kind, AttemptKind::Timeout);
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    for sentinel in &sentinels {
        assert!(spec.sentinel_stats_for(sentinel).n_unreachable() >= 1);
        assert_eq!(
            spec.sentinel_stats_for(sentinel).n_errors(),
            spec.sentinel_stats_for(sentinel).n_unreachable()
        );
    }
}

#[tokio::test(start_paused = true)]
async fn simulated_failure_hosts_fill_their_buckets() {
    let sentinels = vec![
        Addr::new("unreachable", 0),
        Addr::new("ignorant", 0),
        Addr::new("misidentified", 0),
    ];
    let spec = spec_for("mymaster", sentinels.clone());
    let opts = ResolveOpts {
        timeout: Some(Duration::from_millis(10)),
        retry_delay: Some(Duration::from_millis(40)),
        ..ResolveOpts::default()
    };

    let err = spec
        .resolve_master_addr(&TcpConnector, "mymaster", &opts)
        .await
        .unwrap_err();

    match err {
        ResolveError::Timeout { counts, .. } => {
            assert_eq!(counts.unreachable, 1);
            assert_eq!(counts.ignorant, 1);
            assert_eq!(counts.misidentified, 1);
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_eq!(
        spec.sentinel_stats_for(&Addr::new("ignorant", 0)).n_ignorant(),
        1
    );
    assert_eq!(
        spec.sentinel_stats_for(&Addr::new("misidentified", 0))
            .n_misidentified(),
        1
    );
}

#[tokio::test]
async fn misidentified_master_fails_the_round() {
    // the sentinel points at a server that answers ROLE with "slave"
    let impostor = spawn_role_server("slave").await;
    let sentinel_srv = MockSentinel::reporting(&impostor.host(), impostor.port())
        .spawn()
        .await;

    let reporting = Addr::new(sentinel_srv.host(), sentinel_srv.port());
    let spec = spec_for("mymaster", vec![reporting.clone()]);
    let opts = ResolveOpts {
        timeout: Some(Duration::from_millis(150)),
        retry_delay: Some(Duration::from_millis(120)),
        ..ResolveOpts::default()
    };

    let err = spec
        .resolve_master_addr(&TcpConnector, "mymaster", &opts)
        .await
        .unwrap_err();

    match err {
        ResolveError::Timeout {
            counts, attempts, ..
        } => {
            assert!(counts.misidentified >= 1);
            let entry = attempts
                .iter()
                .find(|a| a.kind == super::AttemptKind::Misidentified)
                .expect("misidentified attempt logged");
            assert_eq!(entry.addr.as_ref(), Some(&reporting));
            assert_eq!(entry.detail.as_deref(), Some("slave"));
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(spec.sentinel_stats_for(&reporting).n_misidentified() >= 1);
    // the unconfirmed candidate never reaches the resolved cache
    assert_eq!(spec.master_addr("mymaster"), None);
}
