//! Request model carried over the shared inbound channel.

use std::path::PathBuf;

use crate::error::ProtocolError;
use crate::transformation::Transformation;

/// What a client wants the server to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Run the stages over the input file into the output file.
    ProcessFile,
    /// Report in-flight pipelines and free capacity.
    Status,
}

impl RequestKind {
    /// Wire value of the request type field.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ProcessFile => 0,
            Self::Status => 1,
        }
    }

    /// Short label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProcessFile => "proc-file",
            Self::Status => "status",
        }
    }
}

impl TryFrom<i32> for RequestKind {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::ProcessFile),
            1 => Ok(Self::Status),
            other => Err(ProtocolError::malformed(
                "request_type",
                "unknown",
                Some(other.to_string()),
            )),
        }
    }
}

/// One client job as it travels over the wire.
///
/// Stage codes stay raw so the server can reject unknown codes as an invalid
/// pipeline instead of a protocol failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Process identifier of the client; keys the reply channel.
    pub sender: i32,
    /// Job intent.
    pub kind: RequestKind,
    /// Ordered stage codes; the first reads the input file, the last writes the output.
    pub stages: Vec<i32>,
    /// Source file for process-file requests.
    pub input_path: PathBuf,
    /// Destination file for process-file requests.
    pub output_path: PathBuf,
}

impl Request {
    /// Build a process-file request from typed stages.
    #[must_use]
    pub fn process_file(
        sender: i32,
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        stages: &[Transformation],
    ) -> Self {
        Self {
            sender,
            kind: RequestKind::ProcessFile,
            stages: stages.iter().map(|stage| stage.code()).collect(),
            input_path: input_path.into(),
            output_path: output_path.into(),
        }
    }

    /// Build a status query.
    #[must_use]
    pub fn status(sender: i32) -> Self {
        Self {
            sender,
            kind: RequestKind::Status,
            stages: Vec::new(),
            input_path: PathBuf::new(),
            output_path: PathBuf::new(),
        }
    }
}
