//! Closed set of transformation kinds a pipeline stage may run.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// A byte-stream transformation performed by an external executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transformation {
    /// Copies input to output unchanged.
    Nop,
    /// Byte-oriented compression.
    ByteCompress,
    /// Inverse of [`Transformation::ByteCompress`].
    ByteDecompress,
    /// General-purpose compression.
    GenericCompress,
    /// Inverse of [`Transformation::GenericCompress`].
    GenericDecompress,
    /// Encryption.
    Encrypt,
    /// Inverse of [`Transformation::Encrypt`].
    Decrypt,
}

impl Transformation {
    /// Every transformation, ordered by wire code.
    pub const ALL: [Self; 7] = [
        Self::Nop,
        Self::ByteCompress,
        Self::ByteDecompress,
        Self::GenericCompress,
        Self::GenericDecompress,
        Self::Encrypt,
        Self::Decrypt,
    ];

    /// Wire code used in encoded requests.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Nop => 0,
            Self::ByteCompress => 1,
            Self::ByteDecompress => 2,
            Self::GenericCompress => 3,
            Self::GenericDecompress => 4,
            Self::Encrypt => 5,
            Self::Decrypt => 6,
        }
    }

    /// Resolve a wire code back into a transformation.
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Nop),
            1 => Some(Self::ByteCompress),
            2 => Some(Self::ByteDecompress),
            3 => Some(Self::GenericCompress),
            4 => Some(Self::GenericDecompress),
            5 => Some(Self::Encrypt),
            6 => Some(Self::Decrypt),
            _ => None,
        }
    }

    /// Canonical name, used both as the config key and the executable file name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::ByteCompress => "bcompress",
            Self::ByteDecompress => "bdecompress",
            Self::GenericCompress => "gcompress",
            Self::GenericDecompress => "gdecompress",
            Self::Encrypt => "encrypt",
            Self::Decrypt => "decrypt",
        }
    }
}

impl fmt::Display for Transformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Transformation {
    type Err = ProtocolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.name() == value)
            .ok_or_else(|| ProtocolError::UnknownTransformation {
                name: value.to_string(),
            })
    }
}
