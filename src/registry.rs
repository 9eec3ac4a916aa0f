//! The Subscriptions Registry: process-wide state tracking per-handler
//! progress, used to implement read-your-writes ("strong" consistency)
//! waits across process managers.
//!
//! Shared global state with internal serialization: callers never see
//! partial updates, and waiters are woken on every ack rather than polling —
//! a condition-style park instead of a busy spin.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::time::timeout;

use crate::event::{EventNumber, RecordedEvent, StreamVersion};
use crate::error::RegistryError;

/// Whether a command dispatcher must wait for a handler's ack before
/// returning (`Strong`), or the handler is merely tracked for diagnostics
/// (`Eventual`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Consistency {
    /// Participates in [`SubscriptionsRegistry::handled`]/`wait_for` quorums.
    Strong,
    /// Tracked, but excluded from quorums.
    Eventual,
}

#[derive(Debug, Clone)]
struct Entry {
    name: String,
    holder: String,
    consistency: Consistency,
    streams: HashMap<String, (StreamVersion, Instant)>,
    global: Option<EventNumber>,
}

impl Entry {
    fn new(name: String, holder: String, consistency: Consistency) -> Self {
        Self {
            name,
            holder,
            consistency,
            streams: HashMap::new(),
            global: None,
        }
    }

    fn stream_version(&self, stream: &str) -> Option<StreamVersion> {
        self.streams.get(stream).map(|(v, _)| *v)
    }
}

/// Key a registration is stored under: a handler may be registered under
/// more than one consistency level simultaneously, and acks for a given
/// level update only that registration's view.
type EntryKey = (String, Consistency);

#[derive(Default)]
struct State {
    entries: HashMap<EntryKey, Entry>,
}

/// Options narrowing a [`SubscriptionsRegistry::handled`] or
/// [`SubscriptionsRegistry::wait_for`] query.
#[derive(Debug, Clone, Default)]
pub struct WaitOpts {
    /// Holder identities to exclude from the quorum (e.g. the dispatcher
    /// waiting on *other* handlers only).
    pub exclude: Vec<String>,
    /// If set, only require the named handlers; handlers named here but not
    /// registered are treated as vacuously satisfied. If unset, every
    /// registered `Strong` handler must satisfy the predicate.
    pub consistency: Option<Vec<String>>,
}

/// Process-wide table mapping handler name to registration state, answering
/// "has handler H processed up to (stream S, version V)?" and blocking
/// waiters until a quorum of named handlers has.
///
/// Cheaply cloneable: internally an `Arc`, so every clone shares the same
/// underlying state.
#[derive(Clone)]
pub struct SubscriptionsRegistry {
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
    stale_ttl: Duration,
}

impl SubscriptionsRegistry {
    /// Creates an empty registry. `stale_ttl` is the default age threshold
    /// used by `purge_expired_streams` when called without override.
    pub fn new(stale_ttl: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            notify: Arc::new(Notify::new()),
            stale_ttl,
        }
    }

    /// Records `(handler_name, holder, consistency)`. Only `Strong`
    /// handlers participate in [`SubscriptionsRegistry::all`] and wait
    /// quorums.
    pub fn register(&self, handler_name: &str, holder: impl Into<String>, consistency: Consistency) {
        let mut state = self.state.lock().expect("registry mutex poisoned");
        state
            .entries
            .entry((handler_name.to_string(), consistency))
            .or_insert_with(|| Entry::new(handler_name.to_string(), holder.into(), consistency));
    }

    /// Advances `handler`'s per-stream max-acked version (keyed by
    /// `event.stream_id`) and global max-acked event_number. Acks only ever
    /// move forward.
    pub fn ack_event(&self, handler: &str, consistency: Consistency, event: &RecordedEvent) {
        let mut state = self.state.lock().expect("registry mutex poisoned");
        let entry = state
            .entries
            .entry((handler.to_string(), consistency))
            .or_insert_with(|| Entry::new(handler.to_string(), handler.to_string(), consistency));

        let now = Instant::now();
        let slot = entry
            .streams
            .entry(event.stream_id.clone())
            .or_insert((0, now));
        slot.0 = slot.0.max(event.stream_version);
        slot.1 = now;

        entry.global = Some(entry.global.map_or(event.event_number, |g| g.max(event.event_number)));

        drop(state);
        self.notify.notify_waiters();
    }

    /// True iff every non-excluded, applicable `Strong` handler has acked
    /// `stream` at or beyond `version`. Handlers named in
    /// `opts.consistency` but not registered are vacuously satisfied.
    pub fn handled(&self, stream: &str, version: StreamVersion, opts: &WaitOpts) -> bool {
        let state = self.state.lock().expect("registry mutex poisoned");
        let strong_entries = || {
            state
                .entries
                .values()
                .filter(|e| e.consistency == Consistency::Strong)
        };

        let satisfies = |e: &Entry| {
            opts.exclude.contains(&e.holder) || e.stream_version(stream).unwrap_or(0) >= version
        };

        match &opts.consistency {
            Some(named) => named
                .iter()
                .all(|name| strong_entries().filter(|e| &e.name == name).all(satisfies)),
            None => strong_entries().all(satisfies),
        }
    }

    /// Returns `ok` immediately if [`SubscriptionsRegistry::handled`] already
    /// holds (including the no-registered-strong-handlers case); otherwise
    /// parks until it does or `timeout_duration` elapses.
    pub async fn wait_for(
        &self,
        stream: &str,
        version: StreamVersion,
        opts: WaitOpts,
        timeout_duration: Duration,
    ) -> Result<(), RegistryError> {
        if self.handled(stream, version, &opts) {
            return Ok(());
        }

        let wait_loop = async {
            loop {
                let notified = self.notify.notified();
                if self.handled(stream, version, &opts) {
                    return;
                }
                notified.await;
                if self.handled(stream, version, &opts) {
                    return;
                }
            }
        };

        timeout(timeout_duration, wait_loop)
            .await
            .map_err(|_| RegistryError::Timeout)
    }

    /// Lists `(handler_name, holder)` over `Strong` handlers only.
    pub fn all(&self) -> Vec<(String, String)> {
        let state = self.state.lock().expect("registry mutex poisoned");
        state
            .entries
            .iter()
            .filter(|((_, consistency), _)| *consistency == Consistency::Strong)
            .map(|((name, _), entry)| (name.clone(), entry.holder.clone()))
            .collect()
    }

    /// Clears all registry state. Test hook.
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("registry mutex poisoned");
        state.entries.clear();
        drop(state);
        self.notify.notify_waiters();
    }

    /// Removes per-stream ack entries whose last update is older than
    /// `now - ttl`. Global event_number acks are unaffected.
    pub fn purge_expired_streams(&self, ttl: Duration) {
        let mut state = self.state.lock().expect("registry mutex poisoned");
        let now = Instant::now();
        for entry in state.entries.values_mut() {
            entry
                .streams
                .retain(|_, (_, last_updated)| now.duration_since(*last_updated) < ttl);
        }
        drop(state);
        self.notify.notify_waiters();
    }

    /// Runs [`SubscriptionsRegistry::purge_expired_streams`] using the
    /// registry's configured default TTL. Intended to be called from a
    /// periodic background tick owned by the embedding application.
    pub fn purge_expired_streams_default(&self) {
        self.purge_expired_streams(self.stale_ttl);
    }
}
