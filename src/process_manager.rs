//! The user-authored Process-Manager Module contract: pure decision logic
//! plus the state it closes over.
//!
//! Modeled as a trait with associated types, following the same shape as
//! an `Aggregate`: the runtime can invoke `interested`/`handle`/`apply`/`error`
//! without ever knowing the concrete `State` or `Command` type.

use std::time::Duration;

use crate::dispatcher::DispatchError;
use crate::event::RecordedEvent;

/// Decision returned by [`ProcessManager::interested`] for one event.
///
/// A classifier may address zero, one, or many process instances; an empty
/// `Vec` in [`Interest::Start`] or [`Interest::Continue`] is equivalent to
/// [`Interest::None`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interest {
    /// This event does not concern any instance of this process manager.
    None,
    /// Start (or, if already running, continue) the named instances.
    Start(Vec<String>),
    /// Continue the named instances; unlike `Start`, spawns them if needed
    /// but carries no "this begins a workflow" connotation.
    Continue(Vec<String>),
    /// Stop the named instances after this event, without delegating it.
    Stop(Vec<String>),
}

/// Context passed to [`ProcessManager::error`] when a command dispatch
/// fails partway through handling `last_event`.
#[derive(Debug, Clone)]
pub struct FailureContext<State, Command, Ctx> {
    /// Commands still to be attempted after `failed_command`.
    pub pending_commands: Vec<Command>,
    /// The *prospective* state after `last_event` is applied — computed via
    /// [`ProcessManager::apply`] even though the event has not been
    /// acknowledged yet, so the user can decide with full knowledge of what
    /// the state would become.
    pub process_manager_state: State,
    /// The event being handled when dispatch failed.
    pub last_event: RecordedEvent,
    /// Opaque value carried across consecutive `error` invocations for the
    /// same command.
    pub context: Ctx,
}

/// Response returned by [`ProcessManager::error`], selecting how the
/// instance should proceed after a failed command dispatch.
///
/// Unlike the dynamically-typed source this crate is modeled on, this is an
/// exhaustive Rust enum: there is no "anything else" arm, because the type
/// system rules out malformed responses by construction (see DESIGN.md).
#[derive(Debug, Clone)]
pub enum ErrorResponse<Command, Ctx> {
    /// Replace the remaining work with `new_commands` and resume the
    /// dispatch loop carrying `context`.
    Continue { commands: Vec<Command>, context: Ctx },
    /// Immediately re-attempt the failed command, then continue with the
    /// original tail, carrying `context`.
    Retry { context: Ctx },
    /// Sleep `delay` (instance-local; does not block the router or other
    /// instances) then retry as [`ErrorResponse::Retry`].
    RetryAfter { delay: Duration, context: Ctx },
    /// Abandon the failed command and its tail. The event is still applied,
    /// snapshotted, and acknowledged.
    SkipDiscardPending,
    /// Abandon only the failed command; continue with the tail.
    SkipContinuePending,
    /// Abort: the event is neither applied nor acknowledged, and the
    /// instance terminates with `reason`.
    Stop { reason: String },
}

/// Pure decision logic plus the state it closes over, driving one named
/// process manager definition.
///
/// `handle` and `apply` are pure functions of their inputs: no I/O, no
/// hidden state. `error` may be impure (e.g. logging) but must not block
/// indefinitely.
pub trait ProcessManager: Send + Sync {
    /// Per-correlation state folded from interesting events. Must have a
    /// well-defined zero value — the state of a workflow that has not yet
    /// observed any event.
    type State: Default + Clone + Send + Sync;

    /// Commands produced while handling an event.
    type Command: Send + Sync + Clone;

    /// Opaque value carried between retries of the same command, round-tripped
    /// through [`ErrorResponse`] and [`FailureContext`] unchanged.
    type Context: Default + Send + Sync + Clone;

    /// Failures [`ProcessManager::handle`] can report. Fatal: the instance
    /// terminates and the event is neither applied nor acknowledged.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Registry key for this process manager definition.
    fn name(&self) -> &str;

    /// Classifies an event, deciding whether (and which) instances it
    /// concerns. Must be a pure function of `event_data`.
    fn interested(&self, event_data: &[u8]) -> Interest;

    /// Produces the commands to dispatch in response to `event_data`, given
    /// the instance's current state. Must be a pure function of its inputs.
    fn handle(
        &self,
        state: &Self::State,
        event_data: &[u8],
    ) -> Result<Vec<Self::Command>, Self::Error>;

    /// Folds `event_data` into `state`, producing the new state. Must be
    /// total over every event this process manager declares interest in.
    fn apply(&self, state: Self::State, event_data: &[u8]) -> Self::State;

    /// Decides how to proceed after `dispatcher.dispatch` fails for
    /// `failed_command`. May log, but must return promptly.
    fn error(
        &self,
        error: &DispatchError,
        failed_command: &Self::Command,
        context: FailureContext<Self::State, Self::Command, Self::Context>,
    ) -> ErrorResponse<Self::Command, Self::Context>;

    /// Serializes `state` for persistence as a [`SnapshotData`](crate::event::SnapshotData).
    ///
    /// The runtime treats `process_state` as opaque; this hook is where the
    /// process manager module owns its own wire format, the same way a
    /// user-authored aggregate owns its own event encoding.
    fn serialize_state(&self, state: &Self::State) -> Vec<u8>;

    /// Deserializes a snapshot payload previously produced by
    /// [`ProcessManager::serialize_state`].
    fn deserialize_state(&self, bytes: &[u8]) -> Self::State;
}

/// JSON-backed [`ProcessManager::serialize_state`]/`deserialize_state`
/// bodies for any `State` that derives `serde::Serialize`/`Deserialize`,
/// sparing most implementations from hand-rolling a wire format.
#[cfg(feature = "serde")]
pub mod json {
    /// Serializes `state` to JSON. Panics if `S`'s `Serialize` impl fails,
    /// which should not happen for any type without custom, fallible
    /// serialization logic.
    pub fn serialize_state<S: serde::Serialize>(state: &S) -> Vec<u8> {
        serde_json::to_vec(state).expect("state failed to serialize to JSON")
    }

    /// Deserializes `state` from a payload previously produced by
    /// [`serialize_state`]. Panics on malformed input, since a snapshot only
    /// ever comes back from a store this same process manager wrote to.
    pub fn deserialize_state<S: serde::de::DeserializeOwned>(bytes: &[u8]) -> S {
        serde_json::from_slice(bytes).expect("snapshot payload was not valid JSON for this state")
    }
}
