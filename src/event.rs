//! The Event Store Facade: the external collaborator this crate subscribes
//! to, acknowledges events against, and persists snapshots through.
//!
//! Only the interface is in scope here — no concrete backend. Check
//! [`testing::InMemoryEventStore`](crate::testing::InMemoryEventStore) for a
//! test double implementing this trait.

use async_trait::async_trait;
use futures::stream::BoxStream;

/// Global, monotone position of a [`RecordedEvent`] in the "all events"
/// stream. Never reused, never decreasing for events in commit order.
pub type EventNumber = u64;

/// Version of an event within its own stream (`stream_id`), distinct from
/// the global [`EventNumber`].
pub type StreamVersion = u64;

/// One durably stored event, as read back from the event store.
///
/// Immutable once created. `data` and `metadata` are left opaque to this
/// crate: decoding them is the responsibility of the
/// [`ProcessManager`](crate::process_manager::ProcessManager) implementation
/// that receives them.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    /// Monotone, global position in the "all events" stream.
    pub event_number: EventNumber,
    /// Unique identifier of this event, used as `causation_id` for any
    /// command produced while handling it.
    pub event_id: uuid::Uuid,
    /// Identifies the workflow instance this event correlates to.
    pub correlation_id: String,
    /// Identifies the stream (typically an aggregate id) this event belongs
    /// to.
    pub stream_id: String,
    /// Version of this event within `stream_id`.
    pub stream_version: StreamVersion,
    /// Opaque event payload.
    pub data: Vec<u8>,
    /// Opaque event metadata.
    pub metadata: Vec<u8>,
}

/// Materialized [`ProcessManager`](crate::process_manager::ProcessManager)
/// state at a given event, used to avoid replaying the full event stream on
/// instance restart.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SnapshotData {
    /// The snapshot's storage key, conventionally built by
    /// [`SnapshotData::key`] from the owning process manager's name and its
    /// process_uuid — not the bare process_uuid, so two different
    /// definitions never collide on the same correlation id in a shared
    /// store.
    pub source_uuid: String,
    /// The `event_number` of the last interesting event folded into `data`.
    pub source_version: EventNumber,
    /// Fully-qualified name of the process manager module that produced
    /// this snapshot, used to detect stale snapshots across deployments.
    pub source_type: String,
    /// Opaque, serialized process state.
    pub data: Vec<u8>,
}

impl SnapshotData {
    /// Builds the conventional snapshot key `"{process_manager_name}-{process_uuid}"`.
    pub fn key(process_manager_name: &str, process_uuid: &str) -> String {
        format!("{process_manager_name}-{process_uuid}")
    }
}

/// Starting point for a new subscription to the "all events" stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFrom {
    /// Start from `event_number` 0.
    Origin,
    /// Start from whatever the store considers "now" at subscribe time.
    Current,
    /// Start immediately after the given global position.
    Position(EventNumber),
}

/// Confirms that a subscription has been established; the first message a
/// [`EventStream`] yields.
#[derive(Debug, Clone)]
pub struct Subscribed {
    /// Opaque token identifying this subscription, passed back on
    /// [`EventStore::ack_event`].
    pub subscription: String,
}

/// One item produced by an [`EventStream`]: either the initial subscription
/// confirmation, or a batch of newly-available events.
#[derive(Debug, Clone)]
pub enum SubscriptionMessage {
    /// Emitted exactly once, before any event batch.
    Subscribed(Subscribed),
    /// A batch of events, in commit order.
    Events(Vec<RecordedEvent>),
}

/// Stream of [`SubscriptionMessage`]s returned by
/// [`EventStore::subscribe_to_all`].
pub type EventStream<'a> = BoxStream<'a, Result<SubscriptionMessage, EventStoreError>>;

/// Errors surfaced by an [`EventStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    /// The "all events" subscription was dropped by the store; fatal to the
    /// router that owns it.
    #[error("subscription to the event store was dropped: {0}")]
    SubscriptionDropped(#[source] anyhow::Error),
    /// The requested snapshot does not exist. Benign: instances fall back to
    /// their zero state.
    #[error("snapshot not found")]
    SnapshotNotFound,
    /// Any other failure acknowledging an event or persisting/deleting a
    /// snapshot.
    #[error("event store operation failed: {0}")]
    Internal(#[source] anyhow::Error),
}

/// Abstracts the event store operations this crate needs: subscribing to
/// the "all events" stream, acknowledging processed events, and managing
/// per-instance snapshots.
///
/// Out of scope: how events get appended in the first place (that's the
/// command dispatcher's and the aggregate's concern), and transactional
/// coupling between command dispatch and event ack (there is none — see the
/// crate-level Non-goals).
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Subscribes to all new events persisted in the store, starting from
    /// `from`. The returned stream yields a [`Subscribed`] confirmation
    /// before any event batch; no events are buffered before that
    /// confirmation arrives.
    async fn subscribe_to_all(
        &self,
        subscriber_name: &str,
        from: StartFrom,
    ) -> Result<EventStream<'_>, EventStoreError>;

    /// Acknowledges that `event` has been fully processed by every instance
    /// it was delegated to, advancing the subscription cursor.
    async fn ack_event(
        &self,
        subscription: &str,
        event: &RecordedEvent,
    ) -> Result<(), EventStoreError>;

    /// Reads the latest snapshot keyed by `source_uuid` (see
    /// [`SnapshotData::key`]), if any.
    async fn read_snapshot(
        &self,
        source_uuid: &str,
    ) -> Result<Option<SnapshotData>, EventStoreError>;

    /// Persists a snapshot, replacing any previous one under the same
    /// [`SnapshotData::source_uuid`] key.
    async fn record_snapshot(&self, snapshot: SnapshotData) -> Result<(), EventStoreError>;

    /// Deletes the snapshot keyed by `source_uuid`, if any. Called when an
    /// instance stops.
    async fn delete_snapshot(&self, source_uuid: &str) -> Result<(), EventStoreError>;
}
