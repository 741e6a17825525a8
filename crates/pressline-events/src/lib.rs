//! Lifecycle event bus for the pressline server.
//!
//! Pipelines publish what they admit, spawn, and finish; the server publishes
//! its own state transitions. Subscribers receive events through a bounded
//! `tokio::broadcast` channel and may ask for a replay of recent history kept
//! in a ring of the same size. Slow subscribers lose the oldest events.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use pressline_protocol::Transformation;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Sequential identifier assigned to each published event.
pub type EventId = u64;

const DEFAULT_CAPACITY: usize = 1_024;

/// Typed events describing pipeline and server lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A request was decoded and handed to a pipeline task.
    RequestAccepted {
        task_id: Uuid,
        sender: i32,
        kind: String,
    },
    /// A stage obtained its admission slot.
    StageAdmitted {
        task_id: Uuid,
        stage: usize,
        transformation: Transformation,
    },
    /// A stage process terminated.
    StageExited {
        task_id: Uuid,
        stage: usize,
        transformation: Transformation,
        success: bool,
    },
    /// Every stage of a pipeline succeeded.
    PipelineCompleted {
        task_id: Uuid,
        bytes_input: u64,
        bytes_output: u64,
    },
    /// A pipeline failed.
    PipelineFailed { task_id: Uuid, message: String },
    /// The server loop moved to a new state.
    ServerStateChanged { state: String },
}

impl Event {
    /// Machine-friendly discriminator.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RequestAccepted { .. } => "request_accepted",
            Self::StageAdmitted { .. } => "stage_admitted",
            Self::StageExited { .. } => "stage_exited",
            Self::PipelineCompleted { .. } => "pipeline_completed",
            Self::PipelineFailed { .. } => "pipeline_failed",
            Self::ServerStateChanged { .. } => "server_state_changed",
        }
    }

    /// Pipeline the event belongs to, if any.
    #[must_use]
    pub const fn task_id(&self) -> Option<Uuid> {
        match self {
            Self::RequestAccepted { task_id, .. }
            | Self::StageAdmitted { task_id, .. }
            | Self::StageExited { task_id, .. }
            | Self::PipelineCompleted { task_id, .. }
            | Self::PipelineFailed { task_id, .. } => Some(*task_id),
            Self::ServerStateChanged { .. } => None,
        }
    }
}

/// Event plus its sequence number and emission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub event: Event,
}

/// Cloneable handle to the shared bus.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
    history: Arc<Mutex<VecDeque<EventEnvelope>>>,
    next_id: Arc<AtomicU64>,
    capacity: usize,
}

impl EventBus {
    /// Bus whose channel and replay ring hold `capacity` events.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "event bus capacity must be positive");
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            history: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            next_id: Arc::new(AtomicU64::new(1)),
            capacity,
        }
    }

    /// Bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Publish an event and return its identifier.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };
        {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            if history.len() == self.capacity {
                history.pop_front();
            }
            history.push_back(envelope.clone());
        }
        // No subscribers is not an error.
        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe, first replaying retained events newer than `since`.
    #[must_use]
    pub fn subscribe(&self, since: Option<EventId>) -> EventStream {
        let receiver = self.sender.subscribe();
        let backlog = since.map_or_else(VecDeque::new, |since| {
            self.history
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|envelope| envelope.id > since)
                .cloned()
                .collect()
        });
        EventStream { backlog, receiver }
    }

    /// Identifier of the most recent retained event.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .back()
            .map(|envelope| envelope.id)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver side of a subscription.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: broadcast::Receiver<EventEnvelope>,
}

impl EventStream {
    /// Next event, draining the replay backlog first. `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(envelope) = self.backlog.pop_front() {
            return Some(envelope);
        }
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn admitted(stage: usize) -> Event {
        Event::StageAdmitted {
            task_id: Uuid::from_u128(1),
            stage,
            transformation: Transformation::Encrypt,
        }
    }

    #[tokio::test]
    async fn ids_are_sequential_and_replayable() {
        let bus = EventBus::with_capacity(8);
        let mut last = 0;
        for stage in 0..4 {
            last = bus.publish(admitted(stage));
        }
        assert_eq!(last, 4);
        assert_eq!(bus.last_event_id(), Some(4));

        let mut stream = bus.subscribe(Some(2));
        let third = stream.next().await.expect("replayed event");
        let fourth = stream.next().await.expect("replayed event");
        assert_eq!((third.id, fourth.id), (3, 4));
    }

    #[tokio::test]
    async fn replay_ring_drops_oldest() {
        let bus = EventBus::with_capacity(2);
        for stage in 0..5 {
            bus.publish(admitted(stage));
        }
        let mut stream = bus.subscribe(Some(0));
        assert_eq!(stream.next().await.map(|e| e.id), Some(4));
        assert_eq!(stream.next().await.map(|e| e.id), Some(5));
    }

    #[tokio::test]
    async fn live_subscribers_receive_new_events() {
        let bus = EventBus::new();
        let mut stream = bus.subscribe(None);
        bus.publish(Event::ServerStateChanged {
            state: "online".into(),
        });
        let envelope = timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("event delivered")
            .expect("bus open");
        assert_eq!(envelope.event.kind(), "server_state_changed");
        assert_eq!(envelope.event.task_id(), None);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(admitted(1)).unwrap();
        assert_eq!(json["type"], "stage_admitted");
        assert_eq!(json["transformation"], "encrypt");
    }
}
