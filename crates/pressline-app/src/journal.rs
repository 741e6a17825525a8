//! Structured log of every lifecycle event published on the bus.
//!
//! Enabled with `RUST_LOG=pressline::events=debug`; each line carries the
//! event id, its kind, the owning task and the JSON payload.

use pressline_events::{Event, EventBus, EventEnvelope};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Follow `events` from now until the server reports `stopped`.
///
/// The task yields how many events it recorded.
#[must_use]
pub fn spawn(events: &EventBus) -> JoinHandle<u64> {
    let mut stream = events.subscribe(None);
    tokio::spawn(async move {
        let mut recorded = 0;
        while let Some(envelope) = stream.next().await {
            record(&envelope);
            recorded += 1;
            if is_final(&envelope.event) {
                break;
            }
        }
        recorded
    })
}

fn record(envelope: &EventEnvelope) {
    let event = &envelope.event;
    match serde_json::to_string(event) {
        Ok(payload) => debug!(
            target: "pressline::events",
            id = envelope.id,
            kind = event.kind(),
            task_id = ?event.task_id(),
            %payload,
            "event"
        ),
        Err(err) => warn!(
            target: "pressline::events",
            id = envelope.id,
            kind = event.kind(),
            error = %err,
            "event could not be serialized"
        ),
    }
}

fn is_final(event: &Event) -> bool {
    matches!(event, Event::ServerStateChanged { state } if state == "stopped")
}
