//! # Design
//!
//! - Centralize server-level errors for bootstrap and the request loop.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Per-request failures never reach this type; they end as completion notices.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Loading settings or the capacity file failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: pressline_config::ConfigError,
    },
    /// Building pipeline collaborators failed.
    #[error("pipeline setup failed")]
    Pipeline {
        /// Operation identifier.
        operation: &'static str,
        /// Source pipeline error.
        source: pressline_pipeline::PipelineError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: pressline_telemetry::TelemetryError,
    },
    /// Something already occupies the inbound channel path.
    ///
    /// A server killed without draining leaves its FIFO behind; the path is
    /// named so it can be removed.
    #[error(
        "inbound channel path {} already exists; remove it if no server is running",
        path.display()
    )]
    ChannelExists {
        /// Path that was expected to be free.
        path: PathBuf,
    },
    /// IO operations failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Optional path involved in the failure.
        path: Option<PathBuf>,
        /// Source IO error.
        source: io::Error,
    },
    /// A background task panicked or was cancelled.
    #[error("background task failed")]
    Task {
        /// Operation identifier.
        operation: &'static str,
        /// Source join error.
        source: tokio::task::JoinError,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: pressline_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn pipeline(
        operation: &'static str,
        source: pressline_pipeline::PipelineError,
    ) -> Self {
        Self::Pipeline { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: pressline_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) fn io(operation: &'static str, path: Option<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path,
            source,
        }
    }
}
