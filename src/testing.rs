//! Crate-internal test doubles: an in-memory [`EventStore`] and a recording
//! [`CommandDispatcher`]: an `Arc<Mutex<_>>`-backed facade standing in for a
//! real backend.
//!
//! Not a public testing SDK for downstream users — just the fixtures this
//! crate's own end-to-end scenario tests are built on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;

use crate::dispatcher::{CommandDispatcher, DispatchError, DispatchOpts};
use crate::event::{
    EventStore, EventStoreError, EventStream, RecordedEvent, SnapshotData, StartFrom, Subscribed,
    SubscriptionMessage,
};

struct State {
    events: Vec<RecordedEvent>,
    snapshots: HashMap<String, SnapshotData>,
}

/// A single-process, in-memory [`EventStore`]. Events pushed via
/// [`InMemoryEventStore::push_event`] are both recorded (so a subscriber
/// starting from [`StartFrom::Origin`] sees the backlog) and broadcast live
/// to every open subscription.
pub struct InMemoryEventStore {
    state: Arc<Mutex<State>>,
    events_tx: broadcast::Sender<RecordedEvent>,
}

impl InMemoryEventStore {
    /// Builds an empty store.
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(1024);
        Self {
            state: Arc::new(Mutex::new(State {
                events: Vec::new(),
                snapshots: HashMap::new(),
            })),
            events_tx,
        }
    }

    /// Appends `event`, making it visible to the backlog of future
    /// subscribers and to any subscription already live.
    pub fn push_event(&self, event: RecordedEvent) {
        self.state.lock().expect("store mutex poisoned").events.push(event.clone());
        // No receivers is not an error here: nothing is subscribed yet.
        let _ = self.events_tx.send(event);
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn subscribe_to_all(
        &self,
        _subscriber_name: &str,
        from: StartFrom,
    ) -> Result<EventStream<'_>, EventStoreError> {
        let backlog: Vec<RecordedEvent> = {
            let state = self.state.lock().expect("store mutex poisoned");
            let start_after = match from {
                StartFrom::Origin => 0,
                StartFrom::Current => state.events.len() as u64,
                StartFrom::Position(n) => n,
            };
            state
                .events
                .iter()
                .filter(|e| e.event_number > start_after)
                .cloned()
                .collect()
        };

        let receiver = self.events_tx.subscribe();
        let head = stream::iter(vec![
            Ok(SubscriptionMessage::Subscribed(Subscribed {
                subscription: "in-memory".to_string(),
            })),
            Ok(SubscriptionMessage::Events(backlog)),
        ]);

        let live = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((Ok(SubscriptionMessage::Events(vec![event])), receiver)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(head.chain(live).boxed())
    }

    async fn ack_event(
        &self,
        _subscription: &str,
        _event: &RecordedEvent,
    ) -> Result<(), EventStoreError> {
        Ok(())
    }

    async fn read_snapshot(
        &self,
        source_uuid: &str,
    ) -> Result<Option<SnapshotData>, EventStoreError> {
        Ok(self
            .state
            .lock()
            .expect("store mutex poisoned")
            .snapshots
            .get(source_uuid)
            .cloned())
    }

    async fn record_snapshot(&self, snapshot: SnapshotData) -> Result<(), EventStoreError> {
        self.state
            .lock()
            .expect("store mutex poisoned")
            .snapshots
            .insert(snapshot.source_uuid.clone(), snapshot);
        Ok(())
    }

    async fn delete_snapshot(&self, source_uuid: &str) -> Result<(), EventStoreError> {
        self.state
            .lock()
            .expect("store mutex poisoned")
            .snapshots
            .remove(source_uuid);
        Ok(())
    }
}

/// A [`CommandDispatcher`] that records every `(command, opts)` pair it
/// receives and always succeeds. Useful where a test cares not just about
/// what was dispatched but about the `causation_id`/`correlation_id` it
/// carried.
pub struct RecordingDispatcher<Command> {
    dispatched: Mutex<Vec<(Command, DispatchOpts)>>,
}

impl<Command> RecordingDispatcher<Command> {
    /// Builds a dispatcher with no recorded commands yet.
    pub fn new() -> Self {
        Self {
            dispatched: Mutex::new(Vec::new()),
        }
    }
}

impl<Command: Clone> RecordingDispatcher<Command> {
    /// Snapshots the `(command, opts)` pairs dispatched so far, in dispatch
    /// order.
    pub fn dispatched(&self) -> Vec<(Command, DispatchOpts)> {
        self.dispatched.lock().expect("dispatcher mutex poisoned").clone()
    }
}

impl<Command> Default for RecordingDispatcher<Command> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<Command: Send + Sync + Clone> CommandDispatcher<Command> for RecordingDispatcher<Command> {
    async fn dispatch(&self, command: &Command, opts: &DispatchOpts) -> Result<(), DispatchError> {
        self.dispatched
            .lock()
            .expect("dispatcher mutex poisoned")
            .push((command.clone(), opts.clone()));
        Ok(())
    }
}

/// A [`CommandDispatcher`] that fails the first `fail_count` dispatches of
/// any command, then succeeds, recording every attempt. Used to exercise
/// the retry branch of the command-dispatch failure policy.
pub struct FlakyDispatcher<Command> {
    fail_count: usize,
    attempts: Mutex<usize>,
    dispatched: Mutex<Vec<Command>>,
}

impl<Command> FlakyDispatcher<Command> {
    /// Builds a dispatcher that fails the first `fail_count` attempts.
    pub fn new(fail_count: usize) -> Self {
        Self {
            fail_count,
            attempts: Mutex::new(0),
            dispatched: Mutex::new(Vec::new()),
        }
    }

    /// Total dispatch attempts observed so far, including failed ones.
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().expect("dispatcher mutex poisoned")
    }
}

#[async_trait]
impl<Command: Send + Sync + Clone> CommandDispatcher<Command> for FlakyDispatcher<Command> {
    async fn dispatch(&self, command: &Command, _opts: &DispatchOpts) -> Result<(), DispatchError> {
        let mut attempts = self.attempts.lock().expect("dispatcher mutex poisoned");
        *attempts += 1;
        let this_attempt = *attempts;
        drop(attempts);

        if this_attempt <= self.fail_count {
            return Err(DispatchError::new(format!(
                "attempt {this_attempt} of {} configured failures",
                self.fail_count
            )));
        }

        self.dispatched
            .lock()
            .expect("dispatcher mutex poisoned")
            .push(command.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventNumber;

    fn event(event_number: EventNumber) -> RecordedEvent {
        RecordedEvent {
            event_number,
            event_id: uuid::Uuid::new_v4(),
            correlation_id: "corr".into(),
            stream_id: "stream".into(),
            stream_version: event_number,
            data: vec![],
            metadata: vec![],
        }
    }

    #[tokio::test]
    async fn subscribe_from_origin_replays_backlog_then_live_events() {
        let store = InMemoryEventStore::new();
        store.push_event(event(1));

        let mut stream = store.subscribe_to_all("sub", StartFrom::Origin).await.unwrap();

        match stream.next().await.unwrap().unwrap() {
            SubscriptionMessage::Subscribed(_) => {}
            other => panic!("expected Subscribed first, got {other:?}"),
        }
        match stream.next().await.unwrap().unwrap() {
            SubscriptionMessage::Events(events) => assert_eq!(events.len(), 1),
            other => panic!("expected backlog batch, got {other:?}"),
        }

        store.push_event(event(2));
        match stream.next().await.unwrap().unwrap() {
            SubscriptionMessage::Events(events) => assert_eq!(events[0].event_number, 2),
            other => panic!("expected live batch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn snapshot_round_trips() {
        let store = InMemoryEventStore::new();
        assert!(store.read_snapshot("u1").await.unwrap().is_none());

        store
            .record_snapshot(SnapshotData {
                source_uuid: "u1".into(),
                source_version: 5,
                source_type: "counter".into(),
                data: vec![1, 2, 3],
            })
            .await
            .unwrap();

        let snapshot = store.read_snapshot("u1").await.unwrap().unwrap();
        assert_eq!(snapshot.source_version, 5);

        store.delete_snapshot("u1").await.unwrap();
        assert!(store.read_snapshot("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn flaky_dispatcher_fails_then_succeeds() {
        let dispatcher = FlakyDispatcher::<&str>::new(2);
        let opts = DispatchOpts {
            causation_id: uuid::Uuid::new_v4(),
            correlation_id: "corr".into(),
        };

        assert!(dispatcher.dispatch(&"c1", &opts).await.is_err());
        assert!(dispatcher.dispatch(&"c1", &opts).await.is_err());
        assert!(dispatcher.dispatch(&"c1", &opts).await.is_ok());
        assert_eq!(dispatcher.attempts(), 3);
    }
}
