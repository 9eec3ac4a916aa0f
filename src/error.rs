//! Crate-wide error types, one enum per component boundary: a `thiserror`
//! derive with `#[source]`/`#[from]` wiring to the underlying cause rather
//! than a single flattened error type.

use crate::event::EventStoreError;

/// Errors surfaced by a [`RouterHandle`](crate::router::RouterHandle).
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// The event store subscription could not be established or was
    /// dropped mid-flight. Fatal to the router — re-subscription is the
    /// caller's concern.
    #[error("event store subscription failed: {0}")]
    Subscription(#[from] EventStoreError),

    /// A monitored instance exited with a non-normal reason. Fatal to the
    /// router: it halts the whole process-manager definition to prevent
    /// skipped events.
    #[error("process manager instance {uuid} exited abnormally: {reason}")]
    InstanceDown {
        /// `process_uuid` of the instance that went down.
        uuid: String,
        /// The instance's `StopReason`, rendered as a string.
        reason: String,
    },

    /// The router's mailbox actor is no longer running (it has already
    /// stopped), so the request could not be serviced.
    #[error("router is no longer running")]
    Stopped,
}

/// Errors surfaced while driving a single
/// [`InstanceHandle`](crate::instance::InstanceHandle).
#[derive(Debug, thiserror::Error)]
pub enum InstanceError {
    /// A read or write against the event store's snapshot facade failed.
    #[error("event store operation failed: {0}")]
    Store(#[from] EventStoreError),

    /// The instance's mailbox actor is no longer running.
    #[error("instance is no longer running")]
    Stopped,
}

/// Errors surfaced by the [`SubscriptionsRegistry`](crate::registry::SubscriptionsRegistry).
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// [`SubscriptionsRegistry::wait_for`](crate::registry::SubscriptionsRegistry::wait_for)
    /// timed out before every non-excluded strong handler acknowledged the
    /// requested version.
    #[error("wait_for timed out before handler quorum was reached")]
    Timeout,
}
