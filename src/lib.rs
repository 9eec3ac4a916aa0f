//! Process-manager runtime for an event-sourced CQRS platform.
//!
//! This crate implements the two-layer concurrent state machine that drives
//! long-lived, event-correlated workflows ("sagas") from a totally-ordered
//! event log and emits commands that produce new events:
//!
//! - [`router`] owns a durable subscription to the "all events" stream,
//!   routes each event to zero or more per-correlation [`instance`]s, tracks
//!   outstanding acknowledgements, and advances the subscription cursor in
//!   strict order.
//! - [`instance`] maintains per-correlation persistent state via snapshots,
//!   invokes user decision code (the [`process_manager::ProcessManager`]
//!   trait), dispatches resulting commands through a [`dispatcher`] with
//!   retry/skip/stop policies, and acknowledges events back to the router.
//! - [`registry`] tracks per-handler progress to implement read-your-writes
//!   ("strong" consistency) waits across process managers.
//!
//! The event store itself, command dispatch routing, and aggregate execution
//! are external collaborators, referenced only through the traits in
//! [`event`] and [`dispatcher`].

pub mod dispatcher;
pub mod error;
pub mod event;
pub mod instance;
pub mod process_manager;
pub mod registry;
pub mod router;
pub mod settings;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::{CommandDispatcher, DispatchOpts};
pub use error::{InstanceError, RegistryError, RouterError};
pub use event::{EventStore, RecordedEvent, SnapshotData, StartFrom};
pub use instance::{InstanceHandle, StopReason};
pub use process_manager::{ErrorResponse, FailureContext, Interest, ProcessManager};
pub use registry::{Consistency, SubscriptionsRegistry};
pub use router::{RouterHandle, RouterState};
pub use settings::Settings;
