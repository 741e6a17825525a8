//! Per-transformation concurrency caps.
//!
//! The capacity file holds one `<transformation> <maximum>` pair per line.
//! Blank lines and lines starting with `#` are skipped; a later line for the
//! same transformation replaces an earlier one.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use pressline_protocol::Transformation;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Parsed capacity file: the maximum concurrent stages per transformation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapacityConfig {
    maximums: BTreeMap<Transformation, usize>,
}

impl CapacityConfig {
    /// Read and parse the capacity file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or a parse error
    /// for the first malformed line.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            operation: "capacity.read",
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&text)?;
        debug!(
            path = %path.display(),
            entries = config.maximums.len(),
            "loaded capacity file"
        );
        Ok(config)
    }

    /// Parse capacity file contents.
    ///
    /// # Errors
    ///
    /// Returns the error for the first line with an unknown name, a missing or
    /// non-numeric maximum, or extra tokens.
    pub fn parse(text: &str) -> ConfigResult<Self> {
        let mut maximums = BTreeMap::new();
        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let content = raw.trim();
            if content.is_empty() || content.starts_with('#') {
                continue;
            }
            let mut tokens = content.split_whitespace();
            let Some(name) = tokens.next() else {
                continue;
            };
            let transformation = name.parse::<Transformation>().map_err(|_| {
                ConfigError::UnknownTransformation {
                    line,
                    name: name.to_string(),
                }
            })?;
            let value = tokens.next().ok_or_else(|| ConfigError::MissingMaximum {
                line,
                name: name.to_string(),
            })?;
            let maximum = value
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidMaximum {
                    line,
                    value: value.to_string(),
                })?;
            let rest: Vec<&str> = tokens.collect();
            if !rest.is_empty() {
                return Err(ConfigError::TrailingTokens {
                    line,
                    value: rest.join(" "),
                });
            }
            maximums.insert(transformation, maximum);
        }
        Ok(Self { maximums })
    }

    /// Set or replace the maximum for one transformation.
    #[must_use]
    pub fn with(mut self, transformation: Transformation, maximum: usize) -> Self {
        self.maximums.insert(transformation, maximum);
        self
    }

    /// Configured maximum, or `None` when the file never mentioned it.
    #[must_use]
    pub fn maximum(&self, transformation: Transformation) -> Option<usize> {
        self.maximums.get(&transformation).copied()
    }

    /// Iterate over configured entries in wire-code order.
    pub fn iter(&self) -> impl Iterator<Item = (Transformation, usize)> + '_ {
        self.maximums.iter().map(|(key, value)| (*key, *value))
    }

    /// Number of configured transformations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.maximums.len()
    }

    /// Whether no transformation is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.maximums.is_empty()
    }
}
