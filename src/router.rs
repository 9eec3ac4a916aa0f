//! The Process Router: one actor per process-manager definition, owning a
//! durable subscription to the "all events" stream, routing each event to
//! zero or more per-correlation [`instance`](crate::instance)s, and
//! advancing the subscription cursor only once every addressee has acked.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::StreamExt;
use tokio::sync::{mpsc, oneshot};

use crate::dispatcher::CommandDispatcher;
use crate::error::RouterError;
use crate::event::{EventStore, EventStoreError, RecordedEvent, StartFrom, SubscriptionMessage};
use crate::instance::{InstanceHandle, RouterLink, StopReason};
use crate::process_manager::{Interest, ProcessManager};
use crate::registry::{Consistency, SubscriptionsRegistry};
use crate::settings::Settings;
use crate::supervisor;

enum Message<PM: ProcessManager> {
    Ack {
        event_number: u64,
        instance_uuid: String,
    },
    InstanceDown {
        instance_uuid: String,
        reason: StopReason,
    },
    ProcessInstance {
        uuid: String,
        reply: oneshot::Sender<Option<InstanceHandle<PM>>>,
    },
    ProcessInstances {
        reply: oneshot::Sender<Vec<(String, InstanceHandle<PM>)>>,
    },
    State {
        reply: oneshot::Sender<RouterState>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Read-only snapshot of a router's runtime state, for diagnostics.
#[derive(Debug, Clone)]
pub struct RouterState {
    /// Registry key this router was started under.
    pub process_manager_name: String,
    /// Highest `event_number` the router has fully acknowledged upstream,
    /// or `None` if it hasn't advanced past its starting position yet.
    pub last_seen_event: Option<u64>,
    /// Number of live process-manager instances.
    pub instance_count: usize,
    /// Number of events queued but not yet dispatched.
    pub pending_event_count: usize,
}

/// Cheaply-cloneable handle to a running router. Every method sends a
/// message to the router's mailbox; router state is only ever touched from
/// within its own worker task.
pub struct RouterHandle<PM: ProcessManager> {
    sender: mpsc::UnboundedSender<Message<PM>>,
    name: String,
}

impl<PM: ProcessManager> Clone for RouterHandle<PM> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            name: self.name.clone(),
        }
    }
}

impl<PM: ProcessManager> RouterHandle<PM> {
    /// The process-manager definition name this router was started for.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up a single instance by `process_uuid`.
    pub async fn process_instance(
        &self,
        uuid: impl Into<String>,
    ) -> Result<Option<InstanceHandle<PM>>, RouterError> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(Message::ProcessInstance {
                uuid: uuid.into(),
                reply,
            })
            .map_err(|_| RouterError::Stopped)?;
        rx.await.map_err(|_| RouterError::Stopped)
    }

    /// Lists every live `(process_uuid, handle)` pair.
    pub async fn process_instances(
        &self,
    ) -> Result<Vec<(String, InstanceHandle<PM>)>, RouterError> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(Message::ProcessInstances { reply })
            .map_err(|_| RouterError::Stopped)?;
        rx.await.map_err(|_| RouterError::Stopped)
    }

    /// Reads a diagnostic snapshot of the router's runtime state.
    pub async fn state(&self) -> Result<RouterState, RouterError> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(Message::State { reply })
            .map_err(|_| RouterError::Stopped)?;
        rx.await.map_err(|_| RouterError::Stopped)
    }

    /// Stops every live instance (normal reason) and terminates the router,
    /// awaiting full shutdown.
    pub async fn stop(&self) -> Result<(), RouterError> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(Message::Stop { reply })
            .map_err(|_| RouterError::Stopped)?;
        rx.await.map_err(|_| RouterError::Stopped)
    }
}

#[async_trait]
impl<PM> RouterLink for RouterHandle<PM>
where
    PM: ProcessManager + 'static,
{
    async fn ack_event(&self, event_number: u64, instance_uuid: &str) {
        let _ = self.sender.send(Message::Ack {
            event_number,
            instance_uuid: instance_uuid.to_string(),
        });
    }

    async fn instance_down(&self, instance_uuid: &str, reason: StopReason) {
        let _ = self.sender.send(Message::InstanceDown {
            instance_uuid: instance_uuid.to_string(),
            reason,
        });
    }
}

/// Starts a router for `process_manager`, subscribing to the event store
/// from `start_from` (or `settings.default_start_from`) and registering
/// with `registry` under `consistency` (or `settings.default_consistency`).
///
/// Returns once the subscription confirmation has been received
/// (Initializing → Running), mirroring the router's own state machine.
pub async fn start<PM, Dispatcher>(
    process_manager: Arc<PM>,
    store: Arc<dyn EventStore>,
    dispatcher: Arc<Dispatcher>,
    registry: SubscriptionsRegistry,
    settings: Settings,
    consistency: Option<Consistency>,
    start_from: Option<StartFrom>,
) -> Result<RouterHandle<PM>, RouterError>
where
    PM: ProcessManager + 'static,
    Dispatcher: CommandDispatcher<PM::Command> + 'static,
{
    let name = process_manager.name().to_string();
    let consistency = consistency.unwrap_or(settings.default_consistency);
    let start_from = start_from.unwrap_or(settings.default_start_from);

    let (sender, receiver) = mpsc::unbounded_channel();
    let handle = RouterHandle {
        sender,
        name: name.clone(),
    };

    let (ready_tx, ready_rx) = oneshot::channel();

    tokio::spawn(run(
        Router {
            name: name.clone(),
            process_manager,
            store,
            dispatcher,
            registry,
            consistency,
            settings,
            self_handle: handle.clone(),
            last_seen_event: None,
            instances: HashMap::new(),
            pending_events: VecDeque::new(),
            in_flight: None,
            subscription_token: String::new(),
            paused: false,
        },
        receiver,
        start_from,
        ready_tx,
    ));

    ready_rx.await.map_err(|_| RouterError::Stopped)??;

    registry.register(&name, &name, consistency);

    Ok(handle)
}

struct Router<PM, Dispatcher>
where
    PM: ProcessManager,
{
    name: String,
    process_manager: Arc<PM>,
    store: Arc<dyn EventStore>,
    dispatcher: Arc<Dispatcher>,
    registry: SubscriptionsRegistry,
    consistency: Consistency,
    settings: Settings,
    self_handle: RouterHandle<PM>,
    last_seen_event: Option<u64>,
    instances: HashMap<String, InstanceHandle<PM>>,
    pending_events: VecDeque<RecordedEvent>,
    in_flight: Option<(RecordedEvent, HashSet<String>)>,
    subscription_token: String,
    paused: bool,
}

impl<PM, Dispatcher> Router<PM, Dispatcher>
where
    PM: ProcessManager + 'static,
    Dispatcher: CommandDispatcher<PM::Command> + 'static,
{
    fn instance_for(&mut self, uuid: String) -> InstanceHandle<PM> {
        if let Some(existing) = self.instances.get(&uuid) {
            return existing.clone();
        }

        let link: Arc<dyn RouterLink> = Arc::new(self.self_handle.clone());
        let handle = supervisor::start_instance(
            self.process_manager.clone(),
            uuid.clone(),
            self.store.clone(),
            self.dispatcher.clone(),
            link,
        );
        self.instances.insert(uuid, handle.clone());
        handle
    }

    /// Passes `event` through `interested?` and either delegates it to
    /// instances (setting `in_flight`) or acks-and-advances immediately.
    async fn dispatch_event(&mut self, event: RecordedEvent) {
        match self.process_manager.interested(&event.data) {
            Interest::None => self.complete_event(event).await,
            Interest::Start(uuids) | Interest::Continue(uuids) => {
                if uuids.is_empty() {
                    self.complete_event(event).await;
                    return;
                }

                let mut outstanding = HashSet::with_capacity(uuids.len());
                for uuid in uuids {
                    let instance = self.instance_for(uuid.clone());
                    if instance.process_event(event.clone()).is_ok() {
                        outstanding.insert(uuid);
                    }
                }

                if outstanding.is_empty() {
                    self.complete_event(event).await;
                } else {
                    self.in_flight = Some((event, outstanding));
                }
            }
            Interest::Stop(uuids) => {
                for uuid in uuids {
                    if let Some(instance) = self.instances.remove(&uuid) {
                        if let Err(err) = instance.stop().await {
                            tracing::warn!(name = %self.name, uuid = %uuid, error = %err, "stop on already-stopped instance");
                        }
                    }
                }
                self.complete_event(event).await;
            }
        }
    }

    /// Advances the cursor past `event`, acking it upstream and against the
    /// registry, and clears `in_flight`.
    async fn complete_event(&mut self, event: RecordedEvent) {
        self.last_seen_event = Some(event.event_number);

        if let Err(err) = self.store.ack_event(&self.subscription_token, &event).await {
            tracing::error!(name = %self.name, error = %err, "ack_event against the event store failed");
        }

        self.registry.ack_event(&self.name, self.consistency, &event);
        self.in_flight = None;

        if self.paused && self.pending_events.len() < self.settings.pending_queue_high_water_mark {
            self.paused = false;
            tracing::info!(name = %self.name, "pending_events drained below high-water mark, resuming subscription pull");
        }
    }

    /// Drains `pending_events` head-first while nothing is in flight.
    async fn try_drain(&mut self) {
        while self.in_flight.is_none() {
            let Some(event) = self.pending_events.pop_front() else {
                break;
            };
            self.dispatch_event(event).await;
        }
    }

    fn ingest_batch(&mut self, events: Vec<RecordedEvent>) {
        let last_seen = self.last_seen_event.unwrap_or(0);
        let fresh = events
            .into_iter()
            .filter(|event| event.event_number > last_seen);
        self.pending_events.extend(fresh);

        if !self.paused && self.pending_events.len() >= self.settings.pending_queue_high_water_mark {
            self.paused = true;
            tracing::warn!(
                name = %self.name,
                queued = self.pending_events.len(),
                mark = self.settings.pending_queue_high_water_mark,
                "pending_events crossed the high-water mark; pausing subscription pull"
            );
        }
    }

    async fn handle_ack(&mut self, event_number: u64, instance_uuid: String) {
        let Some((event, outstanding)) = &mut self.in_flight else {
            return;
        };
        if event.event_number != event_number {
            return;
        }

        outstanding.remove(&instance_uuid);
        if outstanding.is_empty() {
            let event = event.clone();
            self.complete_event(event).await;
            self.try_drain().await;
        }
    }

    async fn stop_all_instances(&mut self) {
        for (_, instance) in self.instances.drain() {
            if let Err(err) = instance.stop().await {
                tracing::warn!(name = %self.name, error = %err, "instance stop failed during router shutdown");
            }
        }
    }

    fn state_snapshot(&self) -> RouterState {
        RouterState {
            process_manager_name: self.name.clone(),
            last_seen_event: self.last_seen_event,
            instance_count: self.instances.len(),
            pending_event_count: self.pending_events.len(),
        }
    }
}

async fn run<PM, Dispatcher>(
    mut router: Router<PM, Dispatcher>,
    mut receiver: mpsc::UnboundedReceiver<Message<PM>>,
    start_from: StartFrom,
    ready_tx: oneshot::Sender<Result<(), RouterError>>,
) where
    PM: ProcessManager + 'static,
    Dispatcher: CommandDispatcher<PM::Command> + 'static,
{
    // Subscribing through a separate clone of the store (rather than
    // `router.store` directly) keeps the returned stream's borrow from
    // tying up all of `router` for the rest of this function — the two
    // `Arc`s point at the same store, but are distinct borrow-checker
    // places.
    let store_for_stream = router.store.clone();
    let mut stream = match store_for_stream
        .subscribe_to_all(&router.name, start_from)
        .await
    {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready_tx.send(Err(RouterError::from(err)));
            return;
        }
    };

    match stream.next().await {
        Some(Ok(SubscriptionMessage::Subscribed(subscribed))) => {
            router.subscription_token = subscribed.subscription;
        }
        Some(Ok(SubscriptionMessage::Events(_))) => {
            let _ = ready_tx.send(Err(RouterError::Subscription(EventStoreError::Internal(
                anyhow::anyhow!("event store sent events before the Subscribed confirmation"),
            ))));
            return;
        }
        Some(Err(err)) => {
            let _ = ready_tx.send(Err(RouterError::from(err)));
            return;
        }
        None => {
            let _ = ready_tx.send(Err(RouterError::Subscription(
                EventStoreError::SubscriptionDropped(anyhow::anyhow!(
                    "subscription stream closed before confirmation"
                )),
            )));
            return;
        }
    }

    if ready_tx.send(Ok(())).is_err() {
        // The caller of start() gave up; nothing left to serve.
        return;
    }

    loop {
        tokio::select! {
            biased;

            message = receiver.recv() => {
                let Some(message) = message else { break };
                match message {
                    Message::Ack { event_number, instance_uuid } => {
                        router.handle_ack(event_number, instance_uuid).await;
                    }
                    Message::InstanceDown { instance_uuid, reason } => {
                        tracing::error!(name = %router.name, uuid = %instance_uuid, %reason, "process manager instance down, stopping router");
                        router.instances.remove(&instance_uuid);
                        router.stop_all_instances().await;
                        return;
                    }
                    Message::ProcessInstance { uuid, reply } => {
                        let _ = reply.send(router.instances.get(&uuid).cloned());
                    }
                    Message::ProcessInstances { reply } => {
                        let all = router.instances.iter().map(|(u, h)| (u.clone(), h.clone())).collect();
                        let _ = reply.send(all);
                    }
                    Message::State { reply } => {
                        let _ = reply.send(router.state_snapshot());
                    }
                    Message::Stop { reply } => {
                        router.stop_all_instances().await;
                        let _ = reply.send(());
                        return;
                    }
                }
            }

            item = stream.next(), if !router.paused => {
                match item {
                    Some(Ok(SubscriptionMessage::Events(events))) => {
                        router.ingest_batch(events);
                        router.try_drain().await;
                    }
                    Some(Ok(SubscriptionMessage::Subscribed(_))) => {
                        tracing::warn!(name = %router.name, "ignoring unexpected duplicate Subscribed confirmation");
                    }
                    Some(Err(err)) => {
                        tracing::error!(name = %router.name, error = %err, "event store subscription failed, stopping router");
                        router.stop_all_instances().await;
                        return;
                    }
                    None => {
                        tracing::error!(name = %router.name, "event store subscription stream closed, stopping router");
                        router.stop_all_instances().await;
                        return;
                    }
                }
            }
        }
    }

    router.stop_all_instances().await;
}
