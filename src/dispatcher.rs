//! The Command Dispatcher: the external collaborator that routes a command
//! to its target aggregate. How that routing happens — command router DSLs,
//! aggregate execution — is out of scope for this crate.

use async_trait::async_trait;

/// Metadata attached to every command dispatched on behalf of a process
/// manager instance.
#[derive(Debug, Clone)]
pub struct DispatchOpts {
    /// `event_id` of the event that produced this command.
    pub causation_id: uuid::Uuid,
    /// `correlation_id` shared by every event and command in this workflow.
    pub correlation_id: String,
}

/// Error returned by [`CommandDispatcher::dispatch`]. Left opaque: this
/// crate only needs to know dispatch failed, and passes the reason through
/// to [`ProcessManager::error`](crate::process_manager::ProcessManager::error)
/// unchanged.
#[derive(Debug, thiserror::Error)]
#[error("command dispatch failed: {reason}")]
pub struct DispatchError {
    /// Human-readable (or opaque, domain-specific) failure reason.
    pub reason: String,
    /// Underlying cause, if any.
    #[source]
    pub source: Option<anyhow::Error>,
}

impl DispatchError {
    /// Builds a dispatch error carrying only a reason, with no further
    /// cause.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            source: None,
        }
    }
}

/// Routes a single command produced by a process manager instance to its
/// target aggregate.
///
/// Implementations must tolerate retries: this crate provides no
/// exactly-once delivery guarantee for commands (see crate-level
/// Non-goals), so a dispatched command may be attempted more than once.
#[async_trait]
pub trait CommandDispatcher<Command>: Send + Sync
where
    Command: Send + Sync,
{
    /// Dispatches `command`, tagged with `opts`, to its target aggregate.
    async fn dispatch(&self, command: &Command, opts: &DispatchOpts) -> Result<(), DispatchError>;
}
