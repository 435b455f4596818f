//! The resolver's stateful entity: per-master sentinel lists, the resolved
//! master cache, and both statistics tables.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::addr::{self, Addr};
use crate::connection::ConnOpts;
use crate::events::{CallbackTable, Event, EventKind, Layers};

/// Base options a [`SentinelSpec`] is constructed with.
///
/// Per-request [`ResolveOpts`](crate::sentinel::ResolveOpts) override these
/// field by field; the defaults here are the process-wide bottom layer.
#[derive(Debug, Clone)]
pub struct SentinelOpts {
    /// Transient-connection options used for sentinel and role-check
    /// conversations.
    pub conn: ConnOpts,
    /// Total budget for one resolution, retries included.
    pub timeout: Duration,
    /// Pause between attempt rounds.
    pub retry_delay: Duration,
    /// Merge sentinels gossiped by `SENTINEL sentinels` into the list.
    pub add_missing_sentinels: bool,
    /// Spec-scope observers.
    pub cbs: CallbackTable,
}

impl Default for SentinelOpts {
    fn default() -> Self {
        SentinelOpts {
            conn: ConnOpts::default(),
            timeout: Duration::from_secs(2),
            retry_delay: Duration::from_millis(250),
            add_missing_sentinels: true,
            cbs: CallbackTable::new(),
        }
    }
}

macro_rules! counters {
    ($(#[$meta:meta])* $name:ident { $($field:ident => $bump:ident / $get:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Default)]
        pub struct $name {
            $($field: AtomicU64,)+
        }

        impl $name {
            $(
                /// Current counter value. Monotonically non-decreasing.
                pub fn $get(&self) -> u64 {
                    self.$field.load(Ordering::Relaxed)
                }

                pub(crate) fn $bump(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )+
        }
    };
}

counters! {
    /// Per-master resolution counters.
    ResolveStats {
        requests => bump_requests / n_requests,
        attempts => bump_attempts / n_attempts,
        successes => bump_successes / n_successes,
        errors => bump_errors / n_errors,
        changes => bump_changes / n_changes,
    }
}

counters! {
    /// Per-sentinel conversation counters. `errors` totals the failed
    /// attempts; the last four break it down by kind.
    SentinelStats {
        attempts => bump_attempts / n_attempts,
        successes => bump_successes / n_successes,
        errors => bump_errors / n_errors,
        ignorant => bump_ignorant / n_ignorant,
        unreachable => bump_unreachable / n_unreachable,
        misidentified => bump_misidentified / n_misidentified,
        other_errors => bump_other_errors / n_other_errors,
    }
}

/// Tracks the sentinels for a set of named master services and resolves
/// masters through them.
///
/// A spec is created once with an initial sentinel address map and lives
/// for the lifetime of the client. All state cells are swapped whole:
/// readers take cheap snapshots, writers compute replacements outside the
/// lock and retry if another writer got there first. Change observers fire
/// only when a swap actually changed the value.
#[derive(Debug)]
pub struct SentinelSpec {
    opts: SentinelOpts,
    global_cbs: CallbackTable,
    sentinel_addrs: RwLock<Arc<HashMap<String, Vec<Addr>>>>,
    resolved: RwLock<Arc<HashMap<String, Addr>>>,
    resolve_stats: RwLock<HashMap<String, Arc<ResolveStats>>>,
    sentinel_stats: RwLock<HashMap<Addr, Arc<SentinelStats>>>,
}

impl SentinelSpec {
    /// Constructs a spec from an initial sentinel address map.
    ///
    /// The map is normalized on the way in: value lists are deduplicated
    /// with first-occurrence metadata preserved.
    pub fn new(sentinel_addrs: HashMap<String, Vec<Addr>>, opts: SentinelOpts) -> Self {
        SentinelSpec {
            opts,
            global_cbs: CallbackTable::new(),
            sentinel_addrs: RwLock::new(Arc::new(addr::clean(sentinel_addrs))),
            resolved: RwLock::new(Arc::new(HashMap::new())),
            resolve_stats: RwLock::new(HashMap::new()),
            sentinel_stats: RwLock::new(HashMap::new()),
        }
    }

    /// Installs the process-wide observer table, consulted before the
    /// spec-scope and per-request tables.
    pub fn with_global_cbs(mut self, cbs: CallbackTable) -> Self {
        self.global_cbs = cbs;
        self
    }

    /// The base options.
    pub fn opts(&self) -> &SentinelOpts {
        &self.opts
    }

    /// Snapshot of the full sentinel address map.
    pub fn sentinel_addrs(&self) -> HashMap<String, Vec<Addr>> {
        let map = self.sentinel_addrs.read().unwrap();
        (**map).clone()
    }

    /// Snapshot of one master's sentinel list; empty when unknown.
    pub fn sentinel_addrs_for(&self, master: &str) -> Vec<Addr> {
        let map = self.sentinel_addrs.read().unwrap();
        map.get(master).cloned().unwrap_or_default()
    }

    /// The last confirmed master address, if any. No I/O.
    pub fn master_addr(&self, master: &str) -> Option<Addr> {
        let map = self.resolved.read().unwrap();
        map.get(master).cloned()
    }

    /// Per-master resolution counters, created on first use.
    pub fn resolve_stats_for(&self, master: &str) -> Arc<ResolveStats> {
        if let Some(stats) = self.resolve_stats.read().unwrap().get(master) {
            return Arc::clone(stats);
        }
        let mut table = self.resolve_stats.write().unwrap();
        Arc::clone(
            table
                .entry(master.to_string())
                .or_insert_with(|| Arc::new(ResolveStats::default())),
        )
    }

    /// Per-sentinel conversation counters, created on first use.
    pub fn sentinel_stats_for(&self, sentinel: &Addr) -> Arc<SentinelStats> {
        if let Some(stats) = self.sentinel_stats.read().unwrap().get(sentinel) {
            return Arc::clone(stats);
        }
        let mut table = self.sentinel_stats.write().unwrap();
        Arc::clone(
            table
                .entry(sentinel.clone())
                .or_insert_with(|| Arc::new(SentinelStats::default())),
        )
    }

    /// Appends `addrs` not already present to `master`'s sentinel list.
    pub fn add_back(&self, master: &str, addrs: Vec<Addr>, req_cbs: Option<&CallbackTable>) {
        self.update_addrs(master, req_cbs, |list| addr::add_back(list, addrs.clone()));
    }

    /// Moves (or inserts) `addr` to the head of `master`'s sentinel list.
    pub fn add_front(&self, master: &str, addr: Addr, req_cbs: Option<&CallbackTable>) {
        self.update_addrs(master, req_cbs, |list| addr::add_front(list, addr.clone()));
    }

    /// Drops `addr` from `master`'s sentinel list.
    pub fn remove(&self, master: &str, addr: &Addr, req_cbs: Option<&CallbackTable>) {
        self.update_addrs(master, req_cbs, |list| addr::remove(list, addr));
    }

    /// Replaces the resolved master address.
    ///
    /// When the value actually changes, bumps the master's `changes`
    /// counter and fires [`EventKind::ResolveChange`] with both values.
    pub fn reset_master_addr(&self, master: &str, addr: Addr, req_cbs: Option<&CallbackTable>) {
        let prev = loop {
            let cur = Arc::clone(&self.resolved.read().unwrap());
            let prev = cur.get(master).cloned();
            if prev.as_ref() == Some(&addr) {
                return;
            }
            let mut next = (*cur).clone();
            next.insert(master.to_string(), addr.clone());

            let mut guard = self.resolved.write().unwrap();
            if Arc::ptr_eq(&guard, &cur) {
                *guard = Arc::new(next);
                break prev;
            }
            // another writer swapped first; recompute from the new value
        };

        self.resolve_stats_for(master).bump_changes();
        self.layers(req_cbs).fire(EventKind::ResolveChange, || {
            let mut event = Event::new(EventKind::ResolveChange, master);
            event.addr = Some(&addr);
            event.prev_addr = prev.as_ref();
            event
        });
    }

    /// The observer scopes in firing order: process, spec, request.
    pub(crate) fn layers<'a>(&'a self, req_cbs: Option<&'a CallbackTable>) -> Layers<'a> {
        Layers::new(Some(&self.global_cbs), Some(&self.opts.cbs), req_cbs)
    }

    fn update_addrs(
        &self,
        master: &str,
        req_cbs: Option<&CallbackTable>,
        f: impl Fn(&[Addr]) -> Vec<Addr>,
    ) {
        let (old_list, new_list) = loop {
            let cur = Arc::clone(&self.sentinel_addrs.read().unwrap());
            let old_list = cur.get(master).cloned().unwrap_or_default();
            let new_list = addr::dedupe(f(&old_list));
            if new_list == old_list {
                return;
            }
            let mut next = (*cur).clone();
            next.insert(master.to_string(), new_list.clone());

            let mut guard = self.sentinel_addrs.write().unwrap();
            if Arc::ptr_eq(&guard, &cur) {
                *guard = Arc::new(next);
                break (old_list, new_list);
            }
            // lost the swap race; retry against the winner's value
        };

        self.layers(req_cbs).fire(EventKind::SentinelsChange, || {
            let mut event = Event::new(EventKind::SentinelsChange, master);
            event.sentinels = Some(&new_list);
            event.prev_sentinels = Some(&old_list);
            event
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn a(host: &str, port: u16) -> Addr {
        Addr::new(host, port)
    }

    fn spec_with(master: &str, addrs: Vec<Addr>) -> SentinelSpec {
        let mut map = HashMap::new();
        map.insert(master.to_string(), addrs);
        SentinelSpec::new(map, SentinelOpts::default())
    }

    #[test]
    fn construction_cleans_the_map() {
        let spec = spec_with("m", vec![a("ip1", 1), a("ip1", 1), a("ip2", 2)]);
        assert_eq!(spec.sentinel_addrs_for("m"), vec![a("ip1", 1), a("ip2", 2)]);
    }

    #[test]
    fn unknown_master_reads_as_empty() {
        let spec = spec_with("m", vec![a("ip1", 1)]);
        assert!(spec.sentinel_addrs_for("other").is_empty());
        assert_eq!(spec.master_addr("other"), None);
    }

    #[test]
    fn mutators_maintain_order_and_uniqueness() {
        let spec = spec_with("m", vec![]);
        spec.add_back(
            "m",
            vec![a("ip1", 1), a("ip2", 2), a("ip3", 3)],
            None,
        );
        spec.add_front("m", a("ip2", 2), None);
        spec.add_back("m", vec![a("ip3", 3), a("ip6", 6)], None);
        assert_eq!(
            spec.sentinel_addrs_for("m"),
            vec![a("ip2", 2), a("ip1", 1), a("ip3", 3), a("ip6", 6)]
        );
        spec.remove("m", &a("ip1", 1), None);
        assert_eq!(
            spec.sentinel_addrs_for("m"),
            vec![a("ip2", 2), a("ip3", 3), a("ip6", 6)]
        );
    }

    #[test]
    fn sentinels_change_fires_only_on_actual_change() {
        let fired = Arc::new(AtomicUsize::new(0));
        let cbs = {
            let fired = Arc::clone(&fired);
            CallbackTable::new().on(EventKind::SentinelsChange, move |event| {
                assert_eq!(event.master, "m");
                assert!(event.sentinels.is_some());
                fired.fetch_add(1, Ordering::SeqCst);
            })
        };
        let spec = spec_with("m", vec![a("ip1", 1)]);

        spec.add_back("m", vec![a("ip2", 2)], Some(&cbs));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // already present: no change, no event
        spec.add_back("m", vec![a("ip2", 2)], Some(&cbs));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // already at the head: no change, no event
        spec.add_front("m", a("ip1", 1), Some(&cbs));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reset_master_addr_changes_once_per_value() {
        let fired = Arc::new(AtomicUsize::new(0));
        let cbs = {
            let fired = Arc::clone(&fired);
            CallbackTable::new().on(EventKind::ResolveChange, move |event| {
                assert!(event.addr.is_some());
                fired.fetch_add(1, Ordering::SeqCst);
            })
        };
        let spec = spec_with("m", vec![a("ip1", 1)]);

        spec.reset_master_addr("m", a("10.0.0.5", 6379), Some(&cbs));
        spec.reset_master_addr("m", a("10.0.0.5", 6379), Some(&cbs));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(spec.master_addr("m"), Some(a("10.0.0.5", 6379)));
        assert_eq!(spec.resolve_stats_for("m").n_changes(), 1);

        spec.reset_master_addr("m", a("10.0.0.6", 6379), Some(&cbs));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(spec.resolve_stats_for("m").n_changes(), 2);
    }

    #[test]
    fn stats_are_created_on_first_use_and_shared() {
        let spec = spec_with("m", vec![a("ip1", 1)]);
        let stats = spec.resolve_stats_for("m");
        stats.bump_requests();
        assert_eq!(spec.resolve_stats_for("m").n_requests(), 1);

        let sstats = spec.sentinel_stats_for(&a("ip1", 1));
        sstats.bump_unreachable();
        assert_eq!(spec.sentinel_stats_for(&a("ip1", 1)).n_unreachable(), 1);
    }
}
