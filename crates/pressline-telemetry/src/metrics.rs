//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters and gauges the server loop and pipelines update.

use std::sync::Arc;

use prometheus::{
    IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
    core::Collector,
};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    requests_total: IntCounterVec,
    protocol_errors_total: IntCounter,
    pipelines_total: IntCounterVec,
    stages_running: IntGaugeVec,
    stage_exits_total: IntCounterVec,
    notify_failures_total: IntCounterVec,
    inflight_pipelines: IntGauge,
}

/// Point-in-time view of the headline counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Requests decoded from the inbound channel.
    pub requests_total: u64,
    /// Requests discarded because they could not be decoded.
    pub protocol_errors_total: u64,
    /// Pipelines that finished with every stage successful.
    pub pipelines_done: u64,
    /// Pipelines that failed.
    pub pipelines_failed: u64,
    /// Pipelines currently executing.
    pub inflight_pipelines: i64,
}

fn collector<T>(name: &'static str, built: prometheus::Result<T>) -> Result<T> {
    built.map_err(|source| TelemetryError::collector("build", name, source))
}

fn register<T>(registry: &Registry, name: &'static str, metric: &T) -> Result<()>
where
    T: Collector + Clone + 'static,
{
    registry
        .register(Box::new(metric.clone()))
        .map_err(|source| TelemetryError::collector("register", name, source))
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("pressline".to_string()), None)
            .map_err(|source| TelemetryError::collector("build", "registry", source))?;

        let requests_total = collector(
            "requests_total",
            IntCounterVec::new(
                Opts::new("requests_total", "Requests decoded from the inbound channel"),
                &["kind"],
            ),
        )?;
        let protocol_errors_total = collector(
            "protocol_errors_total",
            IntCounter::with_opts(Opts::new(
                "protocol_errors_total",
                "Requests discarded because they could not be decoded",
            )),
        )?;
        let pipelines_total = collector(
            "pipelines_total",
            IntCounterVec::new(
                Opts::new("pipelines_total", "Finished pipelines by outcome"),
                &["outcome"],
            ),
        )?;
        let stages_running = collector(
            "stages_running",
            IntGaugeVec::new(
                Opts::new("stages_running", "Stage processes currently running"),
                &["transformation"],
            ),
        )?;
        let stage_exits_total = collector(
            "stage_exits_total",
            IntCounterVec::new(
                Opts::new("stage_exits_total", "Stage process exits by status"),
                &["transformation", "status"],
            ),
        )?;
        let notify_failures_total = collector(
            "notify_failures_total",
            IntCounterVec::new(
                Opts::new("notify_failures_total", "Failed client notification steps"),
                &["step"],
            ),
        )?;
        let inflight_pipelines = collector(
            "inflight_pipelines",
            IntGauge::with_opts(Opts::new("inflight_pipelines", "Pipelines executing")),
        )?;

        register(&registry, "requests_total", &requests_total)?;
        register(&registry, "protocol_errors_total", &protocol_errors_total)?;
        register(&registry, "pipelines_total", &pipelines_total)?;
        register(&registry, "stages_running", &stages_running)?;
        register(&registry, "stage_exits_total", &stage_exits_total)?;
        register(&registry, "notify_failures_total", &notify_failures_total)?;
        register(&registry, "inflight_pipelines", &inflight_pipelines)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                requests_total,
                protocol_errors_total,
                pipelines_total,
                stages_running,
                stage_exits_total,
                notify_failures_total,
                inflight_pipelines,
            }),
        })
    }

    /// Count a decoded request of the given kind.
    pub fn inc_request(&self, kind: &str) {
        self.inner.requests_total.with_label_values(&[kind]).inc();
    }

    /// Count a request dropped by the codec.
    pub fn inc_protocol_error(&self) {
        self.inner.protocol_errors_total.inc();
    }

    /// Count a finished pipeline (`done` or `failed`).
    pub fn inc_pipeline(&self, outcome: &str) {
        self.inner
            .pipelines_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Track a stage process starting.
    pub fn stage_started(&self, transformation: &str) {
        self.inner
            .stages_running
            .with_label_values(&[transformation])
            .inc();
    }

    /// Track a stage process exiting with the given status label.
    pub fn stage_exited(&self, transformation: &str, status: &str) {
        self.inner
            .stages_running
            .with_label_values(&[transformation])
            .dec();
        self.inner
            .stage_exits_total
            .with_label_values(&[transformation, status])
            .inc();
    }

    /// Count a failed notification step (`reply` or `signal`).
    pub fn inc_notify_failure(&self, step: &str) {
        self.inner
            .notify_failures_total
            .with_label_values(&[step])
            .inc();
    }

    /// Track a pipeline entering execution.
    pub fn pipeline_started(&self) {
        self.inner.inflight_pipelines.inc();
    }

    /// Track a pipeline leaving execution.
    pub fn pipeline_finished(&self) {
        self.inner.inflight_pipelines.dec();
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the gathered families cannot be encoded.
    pub fn render(&self) -> Result<String> {
        TextEncoder::new()
            .encode_to_string(&self.inner.registry.gather())
            .map_err(|source| TelemetryError::Render { source })
    }

    /// Take a point-in-time snapshot of the headline counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests_total = ["proc-file", "status"]
            .iter()
            .map(|kind| self.inner.requests_total.with_label_values(&[kind]).get())
            .sum();
        MetricsSnapshot {
            requests_total,
            protocol_errors_total: self.inner.protocol_errors_total.get(),
            pipelines_done: self.inner.pipelines_total.with_label_values(&["done"]).get(),
            pipelines_failed: self
                .inner
                .pipelines_total
                .with_label_values(&["failed"])
                .get(),
            inflight_pipelines: self.inner.inflight_pipelines.get(),
        }
    }
}
