//! Observer callbacks fired at resolver state transitions.
//!
//! Observers live in [`CallbackTable`]s keyed by [`EventKind`]. An event
//! consults up to three tables in order — process-wide, spec-scope, then
//! per-request — and the event value is only constructed when some table
//! actually subscribes to its kind. A panicking handler is logged and
//! dropped; observers can never interrupt a resolution.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::addr::Addr;

/// The resolver's observable state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A resolution confirmed a master address.
    ResolveSuccess,
    /// A resolution failed (no sentinels configured, or timeout).
    ResolveError,
    /// The cached resolved master address actually changed.
    ResolveChange,
    /// A master's sentinel address list actually changed.
    SentinelsChange,
}

/// What a handler sees when its event fires.
#[derive(Debug, Clone)]
pub struct Event<'a> {
    /// Which transition fired.
    pub kind: EventKind,
    /// The master service name the event concerns.
    pub master: &'a str,
    /// The relevant address: the resolved master for the resolve events,
    /// absent for list changes.
    pub addr: Option<&'a Addr>,
    /// The previously resolved master, for [`EventKind::ResolveChange`].
    pub prev_addr: Option<&'a Addr>,
    /// The sentinel list after the change, for
    /// [`EventKind::SentinelsChange`].
    pub sentinels: Option<&'a [Addr]>,
    /// The sentinel list before the change.
    pub prev_sentinels: Option<&'a [Addr]>,
    /// Time the resolution took, for [`EventKind::ResolveSuccess`].
    pub elapsed: Option<Duration>,
    /// Error summary, for [`EventKind::ResolveError`].
    pub error: Option<&'a str>,
}

impl<'a> Event<'a> {
    pub(crate) fn new(kind: EventKind, master: &'a str) -> Self {
        Event {
            kind,
            master,
            addr: None,
            prev_addr: None,
            sentinels: None,
            prev_sentinels: None,
            elapsed: None,
            error: None,
        }
    }
}

/// A handler for one event kind.
pub type Handler = Arc<dyn Fn(&Event<'_>) + Send + Sync>;

/// A mapping from event kind to handler. One observer scope.
#[derive(Default, Clone)]
pub struct CallbackTable {
    handlers: HashMap<EventKind, Handler>,
}

impl CallbackTable {
    /// An empty table.
    pub fn new() -> Self {
        CallbackTable::default()
    }

    /// Registers `handler` for `kind`, replacing any previous one.
    pub fn on(mut self, kind: EventKind, handler: impl Fn(&Event<'_>) + Send + Sync + 'static) -> Self {
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    /// Whether any handler is registered for `kind`.
    pub fn subscribes(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    fn get(&self, kind: EventKind) -> Option<&Handler> {
        self.handlers.get(&kind)
    }
}

impl fmt::Debug for CallbackTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

/// The observer scopes consulted, in firing order.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Layers<'a> {
    tables: [Option<&'a CallbackTable>; 3],
}

impl<'a> Layers<'a> {
    /// Process-wide, spec-scope, per-request.
    pub(crate) fn new(
        global: Option<&'a CallbackTable>,
        spec: Option<&'a CallbackTable>,
        request: Option<&'a CallbackTable>,
    ) -> Self {
        Layers {
            tables: [global, spec, request],
        }
    }

    /// Fires `kind`, building the event value only if someone subscribes.
    pub(crate) fn fire(&self, kind: EventKind, build: impl FnOnce() -> Event<'a>) {
        if !self
            .tables
            .iter()
            .flatten()
            .any(|t| t.subscribes(kind))
        {
            return;
        }
        let event = build();
        for table in self.tables.iter().flatten() {
            if let Some(handler) = table.get(kind) {
                if panic::catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                    tracing::warn!(?kind, master = event.master, "observer panicked; ignored");
                }
            }
        }
    }
}
