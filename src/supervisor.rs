//! The Instance Supervisor: a thin factory that spawns instance actors on
//! demand and isolates their failures from each other.
//!
//! Restart strategy is **transient**: an abnormal exit is never retried
//! here. It propagates to the owning router via [`RouterLink::instance_down`],
//! and the router decides whether to halt the whole process-manager
//! definition (see crate-level error handling design) — this module does
//! not second-guess that decision by restarting on its own.

use std::sync::Arc;

use crate::dispatcher::CommandDispatcher;
use crate::event::EventStore;
use crate::instance::{self, InstanceHandle, RouterLink};
use crate::process_manager::ProcessManager;

/// Spawns a new instance actor for `process_uuid`, reporting acks and
/// abnormal exits back through `link`.
///
/// This is the only operation the supervisor needs: tracking which
/// instances exist for a given correlation is the router's job (it owns
/// the `instances` map), not the supervisor's.
pub fn start_instance<PM, Dispatcher>(
    process_manager: Arc<PM>,
    process_uuid: String,
    store: Arc<dyn EventStore>,
    dispatcher: Arc<Dispatcher>,
    link: Arc<dyn RouterLink>,
) -> InstanceHandle<PM>
where
    PM: ProcessManager + 'static,
    Dispatcher: CommandDispatcher<PM::Command> + 'static,
{
    instance::spawn(process_manager, process_uuid, store, dispatcher, link)
}
