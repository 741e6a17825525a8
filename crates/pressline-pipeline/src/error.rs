//! # Design
//!
//! - Constant error messages with structured context fields.
//! - `PipelineError::reason` renders the client-facing failure text separately.
//! - Admission and notification failures are their own types; they never abort the server.

use std::io;
use std::path::PathBuf;

use pressline_protocol::Transformation;
use thiserror::Error;

/// Result alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
/// Result alias for admission operations.
pub type AdmissionResult<T> = Result<T, AdmissionError>;
/// Result alias for client notification steps.
pub type NotifyResult<T> = Result<T, NotifyError>;

/// Failures that end one pipeline execution.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The request cannot be executed as given.
    #[error("invalid pipeline")]
    InvalidPipeline {
        /// Static reason for the rejection.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// The bin directory handed to the catalog is unusable.
    #[error("invalid bin directory")]
    BinDir {
        /// Directory that was rejected.
        path: PathBuf,
        /// Static reason for the rejection.
        reason: &'static str,
    },
    /// Opening, sizing or copying the request's files failed.
    #[error("pipeline io failure")]
    Io {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// A stage executable could not be started.
    #[error("stage spawn failed")]
    Spawn {
        /// Zero-based stage index.
        stage: usize,
        /// Transformation the stage runs.
        transformation: Transformation,
        /// Executable that failed to start.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// A stage exited unsuccessfully.
    #[error("stage failed")]
    StageFailed {
        /// Zero-based stage index.
        stage: usize,
        /// Transformation the stage runs.
        transformation: Transformation,
        /// Exit code, when the stage exited normally.
        code: Option<i32>,
        /// Terminating signal, when the stage was killed.
        signal: Option<i32>,
    },
    /// Waiting on a stage process failed.
    #[error("stage wait failed")]
    Wait {
        /// Zero-based stage index.
        stage: usize,
        /// Transformation the stage runs.
        transformation: Transformation,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The task supervising a stage aborted.
    #[error("stage task aborted")]
    StageTask {
        /// Underlying join error.
        source: tokio::task::JoinError,
    },
    /// Shutdown began before the stage could be admitted.
    #[error("admission closed")]
    AdmissionClosed {
        /// Zero-based stage index.
        stage: usize,
        /// Transformation the stage waited for.
        transformation: Transformation,
    },
}

impl PipelineError {
    pub(crate) const fn invalid(reason: &'static str, value: Option<String>) -> Self {
        Self::InvalidPipeline { reason, value }
    }

    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Stage the failure is attributed to, if any.
    #[must_use]
    pub const fn stage(&self) -> Option<usize> {
        match self {
            Self::Spawn { stage, .. }
            | Self::StageFailed { stage, .. }
            | Self::Wait { stage, .. }
            | Self::AdmissionClosed { stage, .. } => Some(*stage),
            Self::InvalidPipeline { .. }
            | Self::BinDir { .. }
            | Self::Io { .. }
            | Self::StageTask { .. } => None,
        }
    }

    /// Whether the failure is a stage dying from a write to a closed pipe.
    ///
    /// Such exits are a consequence of a downstream failure, not a cause.
    #[must_use]
    pub const fn is_broken_pipe(&self) -> bool {
        matches!(
            self,
            Self::StageFailed {
                signal: Some(signal),
                ..
            } if *signal == nix::libc::SIGPIPE
        )
    }

    /// Client-facing description carried in the failure notice.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::InvalidPipeline {
                reason,
                value: Some(value),
            } => format!("invalid pipeline ({reason}): {value}"),
            Self::InvalidPipeline {
                reason,
                value: None,
            } => format!("invalid pipeline ({reason})"),
            Self::BinDir { path, reason } => {
                format!("invalid bin directory {} ({reason})", path.display())
            }
            Self::Io {
                operation,
                path,
                source,
            } => format!("{operation} {}: {source}", path.display()),
            Self::Spawn {
                stage,
                transformation,
                source,
                ..
            } => format!("stage {stage} ({transformation}) could not be started: {source}"),
            Self::StageFailed {
                stage,
                transformation,
                code: Some(code),
                ..
            } => format!("stage {stage} ({transformation}) exited with status {code}"),
            Self::StageFailed {
                stage,
                transformation,
                signal: Some(signal),
                ..
            } => format!("stage {stage} ({transformation}) killed by signal {signal}"),
            Self::StageFailed {
                stage,
                transformation,
                ..
            } => format!("stage {stage} ({transformation}) terminated abnormally"),
            Self::Wait {
                stage,
                transformation,
                source,
            } => format!("stage {stage} ({transformation}) could not be awaited: {source}"),
            Self::StageTask { source } => format!("stage supervisor aborted: {source}"),
            Self::AdmissionClosed {
                stage,
                transformation,
            } => format!("server shut down before stage {stage} ({transformation}) was admitted"),
        }
    }
}

/// Admission failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    /// The controller is shutting down and capacity is not free.
    #[error("admission closed")]
    Closed {
        /// Transformation that could not be admitted.
        transformation: Transformation,
    },
}

/// Failures of one best-effort notification step.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Nobody has the client's reply channel open for reading.
    #[error("reply channel has no reader")]
    NoReader {
        /// Reply channel path.
        path: PathBuf,
    },
    /// The reply channel could not be opened.
    #[error("reply channel open failed")]
    Open {
        /// Reply channel path.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Writing the notice failed.
    #[error("reply channel write failed")]
    Write {
        /// Reply channel path.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The sender identifier cannot address a single process.
    #[error("invalid sender")]
    InvalidSender {
        /// Identifier supplied by the client.
        sender: i32,
    },
    /// Delivering the wake-up signal failed.
    #[error("client signal failed")]
    Signal {
        /// Client process identifier.
        sender: i32,
        /// Underlying errno.
        source: nix::errno::Errno,
    },
}
