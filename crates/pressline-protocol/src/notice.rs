//! Completion notices written to a client's private reply channel.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{ProtocolError, ProtocolResult};

const DONE_PREFIX: &str = "concluded (bytes-input: ";
const DONE_SEPARATOR: &str = ", bytes-output: ";
const FAILED_PREFIX: &str = "failed: ";

/// Reply channel path for a given client process.
#[must_use]
pub fn reply_channel_path(reply_dir: &Path, sender: i32) -> PathBuf {
    reply_dir.join(format!("pressline-{sender}.reply"))
}

/// Final message a client receives for its request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionNotice {
    /// Every stage exited successfully.
    Done {
        /// Size of the source file.
        bytes_input: u64,
        /// Size of the destination file after the pipeline finished.
        bytes_output: u64,
    },
    /// The pipeline did not complete.
    Failed {
        /// Human-readable failure description.
        reason: String,
    },
    /// Answer to a status query.
    Status {
        /// Multi-line status report.
        report: String,
    },
}

impl CompletionNotice {
    /// Whether the notice reports a successful pipeline.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }

    /// Wire form of the notice, always newline-terminated.
    ///
    /// Status reports span several lines and end with an extra empty line.
    #[must_use]
    pub fn to_wire(&self) -> String {
        let mut text = self.to_string();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        if matches!(self, Self::Status { .. }) {
            text.push('\n');
        }
        text
    }

    /// Parse the single-line `Done`/`Failed` forms.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidNotice`] if the line matches neither form.
    pub fn parse(line: &str) -> ProtocolResult<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if let Some(reason) = line.strip_prefix(FAILED_PREFIX) {
            return Ok(Self::Failed {
                reason: reason.to_string(),
            });
        }
        let invalid = || ProtocolError::InvalidNotice {
            value: line.to_string(),
        };
        let body = line
            .strip_prefix(DONE_PREFIX)
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(invalid)?;
        let (input, output) = body.split_once(DONE_SEPARATOR).ok_or_else(invalid)?;
        Ok(Self::Done {
            bytes_input: input.parse().map_err(|_| invalid())?,
            bytes_output: output.parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for CompletionNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done {
                bytes_input,
                bytes_output,
            } => write!(f, "{DONE_PREFIX}{bytes_input}{DONE_SEPARATOR}{bytes_output})"),
            Self::Failed { reason } => write!(f, "{FAILED_PREFIX}{reason}"),
            Self::Status { report } => f.write_str(report),
        }
    }
}
