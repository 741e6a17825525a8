//! Telemetry primitives shared across the pressline workspace.
//!
//! Layout: `init.rs` (subscriber installation and log format selection),
//! `context.rs` (process-wide application span), `metrics.rs` (Prometheus
//! registry), `error.rs` (telemetry failures).

pub mod context;
pub mod error;
pub mod init;
pub mod metrics;

pub use context::{GlobalContextGuard, record_mode};
pub use error::{Result, TelemetryError};
pub use init::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, build_sha, init_logging};
pub use metrics::{Metrics, MetricsSnapshot};
