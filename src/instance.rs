//! The Process Manager Instance: one actor per (process-manager-name,
//! process-uuid), owning `process_state` and `last_seen_event` exclusively
//! and serviced by its own mailbox — a single worker task behind a
//! cloneable handle.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::dispatcher::{CommandDispatcher, DispatchOpts};
use crate::error::InstanceError;
use crate::event::{EventStore, RecordedEvent};
use crate::process_manager::{ErrorResponse, FailureContext, ProcessManager};

/// Reason an instance's worker task exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Stopped via an explicit [`InstanceHandle::stop`] call.
    Normal,
    /// Terminated by [`ProcessManager::handle`] returning an error, or by
    /// the command-dispatch failure policy resolving to
    /// [`ErrorResponse::Stop`].
    Abnormal(String),
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Normal => write!(f, "normal"),
            StopReason::Abnormal(reason) => write!(f, "abnormal: {reason}"),
        }
    }
}

/// The owning router's half of the instance/router relationship: how an
/// instance reports an ack or its own abnormal exit back upstream, without
/// depending on the router's generic parameters.
///
/// `tokio` tasks have no built-in linking/monitoring the way an actor
/// runtime might; this trait is the explicit substitute, kept on the same
/// message-passing path as everything else rather than reaching for
/// `JoinHandle` polling.
#[async_trait]
pub trait RouterLink: Send + Sync {
    /// Reports that `instance_uuid` has finished processing the event at
    /// `event_number`.
    async fn ack_event(&self, event_number: u64, instance_uuid: &str);

    /// Reports that `instance_uuid`'s worker task is exiting with `reason`.
    /// Only ever called for non-normal exits; a normal stop is already known
    /// to whichever caller requested it.
    async fn instance_down(&self, instance_uuid: &str, reason: StopReason);
}

enum Message<PM: ProcessManager> {
    ProcessEvent(RecordedEvent),
    Stop(oneshot::Sender<()>),
    State(oneshot::Sender<PM::State>),
}

/// Cheaply-cloneable handle to a running instance. Every method sends a
/// message to the instance's mailbox; the instance itself is never touched
/// from outside its worker task.
pub struct InstanceHandle<PM: ProcessManager> {
    sender: mpsc::UnboundedSender<Message<PM>>,
    uuid: String,
}

impl<PM: ProcessManager> Clone for InstanceHandle<PM> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            uuid: self.uuid.clone(),
        }
    }
}

impl<PM: ProcessManager> InstanceHandle<PM> {
    /// The `process_uuid` this instance was started for.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Enqueues `event` for processing. Asynchronous: the instance acks
    /// back to its [`RouterLink`] once done, it does not reply here.
    pub fn process_event(&self, event: RecordedEvent) -> Result<(), InstanceError> {
        self.sender
            .send(Message::ProcessEvent(event))
            .map_err(|_| InstanceError::Stopped)
    }

    /// Deletes the instance's snapshot and terminates its worker task with
    /// [`StopReason::Normal`], waiting for it to fully exit.
    pub async fn stop(&self) -> Result<(), InstanceError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Message::Stop(tx))
            .map_err(|_| InstanceError::Stopped)?;
        rx.await.map_err(|_| InstanceError::Stopped)
    }

    /// Reads the instance's current `process_state`.
    pub async fn process_state(&self) -> Result<PM::State, InstanceError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Message::State(tx))
            .map_err(|_| InstanceError::Stopped)?;
        rx.await.map_err(|_| InstanceError::Stopped)
    }
}

/// Outcome of processing one event, deciding whether the worker loop
/// continues or the instance terminates.
enum Outcome {
    Continue,
    Stop(StopReason),
}

struct Worker<PM, Dispatcher> {
    uuid: String,
    process_manager: Arc<PM>,
    store: Arc<dyn EventStore>,
    dispatcher: Arc<Dispatcher>,
    link: Arc<dyn RouterLink>,
    process_state: PM::State,
    last_seen_event: u64,
}

impl<PM, Dispatcher> Worker<PM, Dispatcher>
where
    PM: ProcessManager + 'static,
    Dispatcher: CommandDispatcher<PM::Command> + 'static,
{
    fn snapshot_key(&self) -> String {
        crate::event::SnapshotData::key(self.process_manager.name(), &self.uuid)
    }

    async fn load_snapshot(&mut self) {
        use crate::event::EventStoreError;

        match self.store.read_snapshot(&self.snapshot_key()).await {
            Ok(Some(snapshot)) => {
                self.process_state = self.process_manager.deserialize_state(&snapshot.data);
                self.last_seen_event = snapshot.source_version;
            }
            Ok(None) => {}
            Err(EventStoreError::SnapshotNotFound) => {}
            Err(err) => {
                tracing::warn!(uuid = %self.uuid, error = %err, "snapshot read failed, starting from zero state");
            }
        }
    }

    async fn persist_snapshot(&self, event_number: u64) -> Result<(), InstanceError> {
        use crate::event::SnapshotData;

        let snapshot = SnapshotData {
            source_uuid: self.snapshot_key(),
            source_version: event_number,
            source_type: self.process_manager.name().to_string(),
            data: self.process_manager.serialize_state(&self.process_state),
        };
        self.store.record_snapshot(snapshot).await?;
        Ok(())
    }

    async fn process_event(&mut self, event: RecordedEvent) -> Outcome {
        if event.event_number <= self.last_seen_event {
            self.link.ack_event(event.event_number, &self.uuid).await;
            return Outcome::Continue;
        }

        let commands = match self
            .process_manager
            .handle(&self.process_state, &event.data)
        {
            Ok(commands) => commands,
            Err(err) => {
                return Outcome::Stop(StopReason::Abnormal(format!(
                    "process manager handle() failed: {err}"
                )));
            }
        };

        match self.dispatch_commands(commands, &event).await {
            DispatchOutcome::Success => {
                self.process_state = self
                    .process_manager
                    .apply(self.process_state.clone(), &event.data);
                self.last_seen_event = event.event_number;

                if let Err(err) = self.persist_snapshot(event.event_number).await {
                    return Outcome::Stop(StopReason::Abnormal(format!(
                        "snapshot persist failed: {err}"
                    )));
                }

                self.link.ack_event(event.event_number, &self.uuid).await;
                Outcome::Continue
            }
            DispatchOutcome::Stop(reason) => Outcome::Stop(StopReason::Abnormal(reason)),
        }
    }

    /// Drives the command-dispatch failure policy for one event's commands.
    async fn dispatch_commands(
        &self,
        mut commands: Vec<PM::Command>,
        event: &RecordedEvent,
    ) -> DispatchOutcome {
        let opts = DispatchOpts {
            causation_id: event.event_id,
            correlation_id: event.correlation_id.clone(),
        };
        let mut context = PM::Context::default();
        let mut idx = 0;

        while idx < commands.len() {
            let command = commands[idx].clone();
            match self.dispatcher.dispatch(&command, &opts).await {
                Ok(()) => idx += 1,
                Err(error) => {
                    let prospective_state = self
                        .process_manager
                        .apply(self.process_state.clone(), &event.data);
                    let failure_context = FailureContext {
                        pending_commands: commands[idx + 1..].to_vec(),
                        process_manager_state: prospective_state,
                        last_event: event.clone(),
                        context: context.clone(),
                    };

                    match self
                        .process_manager
                        .error(&error, &command, failure_context)
                    {
                        ErrorResponse::Continue {
                            commands: new_commands,
                            context: new_context,
                        } => {
                            commands.truncate(idx);
                            commands.extend(new_commands);
                            context = new_context;
                        }
                        ErrorResponse::Retry { context: new_context } => {
                            context = new_context;
                        }
                        ErrorResponse::RetryAfter {
                            delay,
                            context: new_context,
                        } => {
                            tokio::time::sleep(delay).await;
                            context = new_context;
                        }
                        ErrorResponse::SkipDiscardPending => {
                            return DispatchOutcome::Success;
                        }
                        ErrorResponse::SkipContinuePending => {
                            idx += 1;
                        }
                        ErrorResponse::Stop { reason } => {
                            return DispatchOutcome::Stop(reason);
                        }
                    }
                }
            }
        }

        DispatchOutcome::Success
    }
}

enum DispatchOutcome {
    Success,
    Stop(String),
}

/// Spawns a new instance worker task and returns a handle to it.
///
/// `process_state` starts at `PM::State::default()`; if a snapshot exists
/// for `uuid` it is loaded before the instance accepts its first message —
/// any events sent concurrently simply queue in the mailbox (Loading/Ready
/// per the instance state machine).
pub fn spawn<PM, Dispatcher>(
    process_manager: Arc<PM>,
    uuid: String,
    store: Arc<dyn EventStore>,
    dispatcher: Arc<Dispatcher>,
    link: Arc<dyn RouterLink>,
) -> InstanceHandle<PM>
where
    PM: ProcessManager + 'static,
    Dispatcher: CommandDispatcher<PM::Command> + 'static,
{
    let (sender, receiver) = mpsc::unbounded_channel();
    let handle = InstanceHandle {
        sender,
        uuid: uuid.clone(),
    };

    tokio::spawn(run(
        Worker {
            uuid,
            process_manager,
            store,
            dispatcher,
            link,
            process_state: PM::State::default(),
            last_seen_event: 0,
        },
        receiver,
    ));

    handle
}

async fn run<PM, Dispatcher>(
    mut worker: Worker<PM, Dispatcher>,
    mut receiver: mpsc::UnboundedReceiver<Message<PM>>,
) where
    PM: ProcessManager + 'static,
    Dispatcher: CommandDispatcher<PM::Command> + 'static,
{
    worker.load_snapshot().await;

    while let Some(message) = receiver.recv().await {
        match message {
            Message::ProcessEvent(event) => match worker.process_event(event).await {
                Outcome::Continue => {}
                Outcome::Stop(reason) => {
                    tracing::warn!(uuid = %worker.uuid, %reason, "instance stopping abnormally");
                    worker.link.instance_down(&worker.uuid, reason).await;
                    return;
                }
            },
            Message::Stop(reply) => {
                if let Err(err) = worker.store.delete_snapshot(&worker.snapshot_key()).await {
                    tracing::warn!(uuid = %worker.uuid, error = %err, "snapshot delete failed on stop");
                }
                let _ = reply.send(());
                return;
            }
            Message::State(reply) => {
                let _ = reply.send(worker.process_state.clone());
            }
        }
    }
}
