//! Error types for telemetry operations.

use prometheus::Error as PrometheusError;
use thiserror::Error;

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors raised by telemetry helpers.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global subscriber was already installed.
    #[error("failed to install tracing subscriber")]
    SubscriberInstall {
        /// Underlying tracing subscriber error.
        source: tracing_subscriber::util::TryInitError,
    },
    /// Building or registering a collector failed.
    #[error("metrics collector setup failed")]
    Collector {
        /// `build` or `register`.
        operation: &'static str,
        /// Collector name.
        name: &'static str,
        /// Underlying Prometheus error.
        source: PrometheusError,
    },
    /// Rendering the registry in text exposition format failed.
    #[error("failed to render metrics")]
    Render {
        /// Underlying Prometheus error.
        source: PrometheusError,
    },
}

impl TelemetryError {
    pub(crate) const fn collector(
        operation: &'static str,
        name: &'static str,
        source: PrometheusError,
    ) -> Self {
        Self::Collector {
            operation,
            name,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn collector_errors_keep_their_source() {
        let err = TelemetryError::collector(
            "register",
            "stages_running",
            PrometheusError::AlreadyReg,
        );
        assert_eq!(err.to_string(), "metrics collector setup failed");
        assert!(err.source().is_some());
        assert!(matches!(
            err,
            TelemetryError::Collector {
                operation: "register",
                name: "stages_running",
                ..
            }
        ));

        let render = TelemetryError::Render {
            source: PrometheusError::Msg("encode".into()),
        };
        assert_eq!(render.to_string(), "failed to render metrics");
    }
}
