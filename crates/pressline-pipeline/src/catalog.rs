//! Binding of transformations to executables under the bin directory.
//!
//! Executables are not checked here; a missing or non-executable file
//! surfaces as a spawn failure of the stage that needs it.

use std::path::{Path, PathBuf};

use pressline_protocol::Transformation;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// Resolves transformation names and locates their executables.
#[derive(Debug, Clone)]
pub struct Catalog {
    bin_dir: PathBuf,
}

impl Catalog {
    /// Build a catalog rooted at `bin_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::BinDir`] when the path does not exist or is
    /// not a directory.
    pub fn new(bin_dir: impl Into<PathBuf>) -> PipelineResult<Self> {
        let bin_dir = bin_dir.into();
        let metadata = std::fs::metadata(&bin_dir).map_err(|_| PipelineError::BinDir {
            path: bin_dir.clone(),
            reason: "missing",
        })?;
        if !metadata.is_dir() {
            return Err(PipelineError::BinDir {
                path: bin_dir,
                reason: "not_a_directory",
            });
        }
        debug!(bin_dir = %bin_dir.display(), "transformation catalog ready");
        Ok(Self { bin_dir })
    }

    /// Look up a transformation by its canonical name.
    #[must_use]
    #[allow(clippy::unused_self)]
    pub fn resolve(&self, name: &str) -> Option<Transformation> {
        name.parse().ok()
    }

    /// Executable that performs `transformation`.
    #[must_use]
    pub fn executable_path(&self, transformation: Transformation) -> PathBuf {
        self.bin_dir.join(transformation.name())
    }

    /// Directory the catalog binds executables under.
    #[must_use]
    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }
}
