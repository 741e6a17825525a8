//! Request loop: accept, dispatch, drain.
//!
//! # Design
//! - One accept is outstanding at a time; it is re-armed as soon as its batch
//!   of requests has been handed off, so slow pipelines never delay the next client.
//! - Pipelines and notices run as tasks in a `JoinSet` owned by the loop.
//! - Shutdown stops accepting, closes admission, and waits for in-flight tasks.
//! - Every published event is logged by the journal until the loop stops.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use pressline_events::{Event, EventBus};
use pressline_pipeline::{ClientNotifier, PipelineExecutor};
use pressline_protocol::{CompletionNotice, ProtocolError, ProtocolResult, Request, RequestKind};
use pressline_telemetry::{Metrics, record_mode};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::{Accepted, InboundChannel};
use crate::error::{AppError, AppResult};
use crate::journal;

const WAKE_INTERVAL: Duration = Duration::from_millis(50);

/// Lifecycle of the server loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Loading configuration and creating the inbound channel.
    Starting,
    /// Accepting requests.
    Online,
    /// No longer accepting; waiting for in-flight pipelines.
    Draining,
    /// Every pipeline finished and the inbound channel is gone.
    Stopped,
}

impl ServerState {
    /// Lowercase label used in logs and events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Online => "online",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The request loop and its collaborators.
pub struct Server {
    executor: PipelineExecutor,
    notifier: ClientNotifier,
    events: EventBus,
    metrics: Metrics,
    state: ServerState,
}

impl Server {
    /// Assemble a server in the `Starting` state.
    #[must_use]
    pub const fn new(
        executor: PipelineExecutor,
        notifier: ClientNotifier,
        events: EventBus,
        metrics: Metrics,
    ) -> Self {
        Self {
            executor,
            notifier,
            events,
            metrics,
            state: ServerState::Starting,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ServerState {
        self.state
    }

    /// Executor shared by every dispatched pipeline.
    #[must_use]
    pub const fn executor(&self) -> &PipelineExecutor {
        &self.executor
    }

    /// Event bus the server publishes on.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Serve requests from `channel` until `shutdown` resolves, then drain.
    ///
    /// The channel is unlinked before this returns, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the inbound channel can no longer be opened or the
    /// accept task dies. In-flight pipelines still finish first.
    pub async fn run<F>(mut self, channel: InboundChannel, shutdown: F) -> AppResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        let journal = journal::spawn(&self.events);
        self.transition(ServerState::Online);
        tokio::pin!(shutdown);

        let mut tasks = JoinSet::new();
        let mut accept = channel.accept();
        let mut accept_pending = true;
        let result = loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("shutdown requested");
                    break Ok(());
                }
                joined = &mut accept => {
                    match joined {
                        Ok(Ok(batch)) => self.admit_batch(batch, &mut tasks),
                        Ok(Err(err)) => {
                            accept_pending = false;
                            break Err(err);
                        }
                        Err(source) => {
                            accept_pending = false;
                            break Err(AppError::Task {
                                operation: "inbound.accept",
                                source,
                            });
                        }
                    }
                    accept = channel.accept();
                }
                Some(finished) = tasks.join_next(), if !tasks.is_empty() => {
                    log_task(finished);
                }
            }
        };

        if let Err(err) = &result {
            warn!(error = %err, detail = ?err, "request loop stopped");
        }
        self.transition(ServerState::Draining);
        if accept_pending {
            self.release_accept(&channel, accept, &mut tasks).await;
        }
        self.executor.admission().close();
        info!(in_flight = tasks.len(), "waiting for in-flight pipelines");
        while let Some(finished) = tasks.join_next().await {
            log_task(finished);
        }
        drop(channel);
        self.transition(ServerState::Stopped);
        match journal.await {
            Ok(recorded) => debug!(events = recorded, "event journal closed"),
            Err(err) => warn!(error = %err, "event journal task failed"),
        }
        result
    }

    fn transition(&mut self, next: ServerState) {
        info!(from = %self.state, to = %next, "server state changed");
        self.state = next;
        record_mode(next.as_str());
        self.events.publish(Event::ServerStateChanged {
            state: next.as_str().to_string(),
        });
    }

    fn admit_batch(&self, batch: Vec<ProtocolResult<Request>>, tasks: &mut JoinSet<()>) {
        if batch.is_empty() {
            debug!("inbound writers closed without sending a request");
        }
        for frame in batch {
            match frame {
                Ok(request) => self.dispatch(request, tasks),
                Err(err) => self.discard(&err),
            }
        }
    }

    fn dispatch(&self, request: Request, tasks: &mut JoinSet<()>) {
        let task_id = Uuid::new_v4();
        let kind = request.kind.as_str();
        self.metrics.inc_request(kind);
        self.events.publish(Event::RequestAccepted {
            task_id,
            sender: request.sender,
            kind: kind.to_string(),
        });
        info!(
            task_id = %task_id,
            sender = request.sender,
            kind,
            stages = request.stages.len(),
            "request accepted"
        );

        let notifier = self.notifier.clone();
        match request.kind {
            RequestKind::Status => {
                let notice = CompletionNotice::Status {
                    report: self.status_report(),
                };
                tasks.spawn(async move {
                    notifier.notify(request.sender, &notice).await;
                });
            }
            RequestKind::ProcessFile => {
                let executor = self.executor.clone();
                tasks.spawn(async move {
                    let outcome = executor.execute(task_id, &request).await;
                    notifier.notify(request.sender, &outcome.to_notice()).await;
                });
            }
        }
    }

    fn discard(&self, err: &ProtocolError) {
        if matches!(err, ProtocolError::Empty) {
            debug!("inbound writer closed without sending a request");
            return;
        }
        self.metrics.inc_protocol_error();
        warn!(error = %err, detail = ?err, "discarding undecodable request");
    }

    /// Unblock the outstanding accept; a request that races in is refused.
    async fn release_accept(
        &self,
        channel: &InboundChannel,
        mut accept: JoinHandle<Accepted>,
        tasks: &mut JoinSet<()>,
    ) {
        let joined = loop {
            let _ = channel.wake();
            if let Ok(joined) = tokio::time::timeout(WAKE_INTERVAL, &mut accept).await {
                break joined;
            }
        };
        match joined {
            Ok(Ok(batch)) => {
                for frame in batch {
                    match frame {
                        Ok(request) => self.refuse(request, tasks),
                        Err(err) => self.discard(&err),
                    }
                }
            }
            Ok(Err(err)) => debug!(error = %err, "inbound accept failed during shutdown"),
            Err(err) => warn!(error = %err, "inbound accept task failed during shutdown"),
        }
    }

    fn refuse(&self, request: Request, tasks: &mut JoinSet<()>) {
        warn!(
            sender = request.sender,
            kind = request.kind.as_str(),
            "request arrived during shutdown; refused"
        );
        let notifier = self.notifier.clone();
        tasks.spawn(async move {
            let notice = CompletionNotice::Failed {
                reason: "server shutting down".to_string(),
            };
            notifier.notify(request.sender, &notice).await;
        });
    }

    /// Multi-line report of in-flight pipelines, capacity and totals.
    #[must_use]
    pub fn status_report(&self) -> String {
        let mut lines: Vec<String> = self
            .executor
            .registry()
            .snapshot()
            .iter()
            .map(pressline_pipeline::TaskEntry::describe)
            .collect();
        lines.extend(self.executor.admission().snapshot().into_iter().map(|entry| {
            format!(
                "transf {}: {}/{} (running/max)",
                entry.transformation, entry.in_use, entry.maximum
            )
        }));
        let totals = self.metrics.snapshot();
        lines.push(format!(
            "requests: {}, done: {}, failed: {}, protocol errors: {}, in flight: {}",
            totals.requests_total,
            totals.pipelines_done,
            totals.pipelines_failed,
            totals.protocol_errors_total,
            totals.inflight_pipelines
        ));
        lines.join("\n")
    }
}

fn log_task(finished: Result<(), JoinError>) {
    if let Err(err) = finished {
        warn!(error = %err, "request task aborted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use pressline_events::EventBus;
    use pressline_pipeline::{AdmissionController, Catalog, TaskRegistry};
    use pressline_protocol::Transformation;

    fn server() -> Server {
        let metrics = Metrics::new().expect("metrics registry");
        let events = EventBus::new();
        let admission = Arc::new(AdmissionController::new());
        admission.configure([(Transformation::Encrypt, 2), (Transformation::Nop, 1)]);
        let executor = PipelineExecutor::new(
            Arc::new(Catalog::new(std::env::temp_dir()).expect("temp dir")),
            admission,
            Arc::new(TaskRegistry::new()),
            events.clone(),
            metrics.clone(),
        );
        let notifier = ClientNotifier::new(std::env::temp_dir(), false, metrics.clone());
        Server::new(executor, notifier, events, metrics)
    }

    #[test]
    fn state_labels_are_lowercase() {
        assert_eq!(ServerState::Draining.to_string(), "draining");
        assert_eq!(server().state(), ServerState::Starting);
    }

    #[test]
    fn status_report_lists_capacity_and_totals() {
        let server = server();
        assert!(server.executor().admission().try_admit(Transformation::Encrypt));
        let report = server.status_report();
        assert!(report.contains("transf encrypt: 1/2 (running/max)"));
        assert!(report.contains("transf decrypt: 0/0 (running/max)"));
        assert!(report.ends_with("requests: 0, done: 0, failed: 0, protocol errors: 0, in flight: 0"));
        assert!(!report.contains("\n\n"));
    }

    #[test]
    fn transitions_publish_events() {
        let mut server = server();
        let mut stream = server.events().subscribe(Some(0));
        server.transition(ServerState::Online);
        assert_eq!(server.state(), ServerState::Online);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");
        let envelope = runtime.block_on(stream.next()).expect("event");
        assert_eq!(
            envelope.event,
            Event::ServerStateChanged {
                state: "online".into()
            }
        );
    }

    #[test]
    fn empty_connections_are_not_protocol_errors() {
        let server = server();
        server.discard(&ProtocolError::Empty);
        server.discard(&ProtocolError::Truncated { field: "sender" });
        assert_eq!(server.metrics.snapshot().protocol_errors_total, 1);
    }
}
