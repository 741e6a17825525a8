//! # Design
//!
//! - Keep codec errors constant-message with the offending field attached.
//! - Distinguish an empty connection from a message cut short mid-way.

use std::io;

use thiserror::Error;

/// Result alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding requests and notices.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The writer closed the channel before sending a single byte.
    #[error("channel closed before a request was sent")]
    Empty,
    /// The channel closed part-way through a request.
    #[error("request truncated")]
    Truncated {
        /// Field that could not be read in full.
        field: &'static str,
    },
    /// A field carried a value outside the protocol's domain.
    #[error("malformed request")]
    Malformed {
        /// Field that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// A name did not match any known transformation.
    #[error("unknown transformation")]
    UnknownTransformation {
        /// Name supplied by the caller.
        name: String,
    },
    /// A completion notice could not be parsed.
    #[error("invalid completion notice")]
    InvalidNotice {
        /// Raw notice text.
        value: String,
    },
    /// Reading or writing the underlying stream failed.
    #[error("protocol io failure")]
    Io {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Underlying IO error.
        source: io::Error,
    },
}

impl ProtocolError {
    pub(crate) const fn malformed(
        field: &'static str,
        reason: &'static str,
        value: Option<String>,
    ) -> Self {
        Self::Malformed {
            field,
            reason,
            value,
        }
    }

    pub(crate) const fn io(operation: &'static str, source: io::Error) -> Self {
        Self::Io { operation, source }
    }

    /// Whether the error means the peer hung up rather than sent garbage.
    #[must_use]
    pub const fn is_disconnect(&self) -> bool {
        matches!(self, Self::Empty | Self::Truncated { .. })
    }
}
