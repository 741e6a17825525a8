//! Error types for configuration loading.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The capacity file could not be read.
    #[error("configuration file unreadable")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path that failed.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
    /// A line named a transformation that does not exist.
    #[error("unknown transformation in capacity file")]
    UnknownTransformation {
        /// 1-based line number.
        line: usize,
        /// Name found on the line.
        name: String,
    },
    /// A line carried a name but no maximum.
    #[error("missing maximum in capacity file")]
    MissingMaximum {
        /// 1-based line number.
        line: usize,
        /// Transformation named on the line.
        name: String,
    },
    /// The maximum was not a non-negative integer.
    #[error("invalid maximum in capacity file")]
    InvalidMaximum {
        /// 1-based line number.
        line: usize,
        /// Offending token.
        value: String,
    },
    /// The line had more than two tokens.
    #[error("unexpected tokens in capacity file")]
    TrailingTokens {
        /// 1-based line number.
        line: usize,
        /// The extra tokens.
        value: String,
    },
    /// A server setting was invalid.
    #[error("invalid server setting")]
    InvalidSetting {
        /// Setting name.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
}

impl ConfigError {
    /// Line number of the offending capacity-file line, if any.
    #[must_use]
    pub const fn line(&self) -> Option<usize> {
        match self {
            Self::UnknownTransformation { line, .. }
            | Self::MissingMaximum { line, .. }
            | Self::InvalidMaximum { line, .. }
            | Self::TrailingTokens { line, .. } => Some(*line),
            Self::Io { .. } | Self::InvalidSetting { .. } => None,
        }
    }
}
