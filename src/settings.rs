//! Typed configuration surface for the runtime.
//!
//! This crate owns only the typed `Settings` struct and its defaults — not
//! file or environment parsing, which is the embedding application's
//! concern. Builder-style `with_*` methods mirror the convention used for
//! small, composable configuration structs (e.g. a republish-strategy
//! builder).

use std::time::Duration;

use crate::event::StartFrom;
use crate::registry::Consistency;

/// Runtime-wide knobs threaded into [`router::start`](crate::router::start)
/// and [`SubscriptionsRegistry::new`](crate::registry::SubscriptionsRegistry::new).
#[derive(Debug, Clone)]
pub struct Settings {
    /// Consistency level a router registers under when the caller does not
    /// specify one explicitly.
    pub default_consistency: Consistency,
    /// Subscription starting point a router uses when the caller does not
    /// specify one explicitly.
    pub default_start_from: StartFrom,
    /// Age after which a per-stream registry ack entry is eligible for
    /// [`SubscriptionsRegistry::purge_expired_streams`](crate::registry::SubscriptionsRegistry::purge_expired_streams).
    pub registry_stale_ttl: Duration,
    /// Soft cap on the router's `pending_events` queue and each
    /// `pending_acks` set; crossing it logs a warning and
    /// pauses pulling further batches from the subscription until the head
    /// of the queue drains back under the mark.
    pub pending_queue_high_water_mark: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_consistency: Consistency::Eventual,
            default_start_from: StartFrom::Current,
            registry_stale_ttl: Duration::from_secs(5 * 60),
            pending_queue_high_water_mark: 10_000,
        }
    }
}

impl Settings {
    /// Starts from the crate defaults; chain `with_*` calls to override.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides [`Settings::default_consistency`].
    pub fn with_default_consistency(mut self, consistency: Consistency) -> Self {
        self.default_consistency = consistency;
        self
    }

    /// Overrides [`Settings::default_start_from`].
    pub fn with_default_start_from(mut self, start_from: StartFrom) -> Self {
        self.default_start_from = start_from;
        self
    }

    /// Overrides [`Settings::registry_stale_ttl`].
    pub fn with_registry_stale_ttl(mut self, ttl: Duration) -> Self {
        self.registry_stale_ttl = ttl;
        self
    }

    /// Overrides [`Settings::pending_queue_high_water_mark`].
    pub fn with_pending_queue_high_water_mark(mut self, mark: usize) -> Self {
        self.pending_queue_high_water_mark = mark;
        self
    }
}
