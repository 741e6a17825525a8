//! Scratch directory layout shared by pipeline and server tests.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::scripts;

/// Temporary bin, config and reply directories for one test.
pub struct PipelineFixture {
    root: TempDir,
    /// Directory holding the transformation scripts.
    pub bin_dir: PathBuf,
    /// Capacity file written from the fixture's limits.
    pub config_path: PathBuf,
    /// Directory for reply channels.
    pub reply_dir: PathBuf,
}

impl PipelineFixture {
    /// Fixture with the standard scripts and the given capacity lines.
    ///
    /// # Errors
    ///
    /// Returns an error if any directory or file cannot be created.
    pub fn new(capacity: &[(&str, usize)]) -> Result<Self> {
        let root = tempfile::Builder::new().prefix("pressline-").tempdir()?;
        let bin_dir = root.path().join("bin");
        let reply_dir = root.path().join("reply");
        fs::create_dir(&bin_dir).context("creating bin dir")?;
        fs::create_dir(&reply_dir).context("creating reply dir")?;
        scripts::install_standard(&bin_dir)?;
        let config_path = root.path().join("pressline.conf");
        write_capacity(&config_path, capacity)?;
        Ok(Self {
            root,
            bin_dir,
            config_path,
            reply_dir,
        })
    }

    /// Root of the scratch tree.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Path under the root for a data file.
    #[must_use]
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }

    /// Write `contents` to a data file under the root.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_input(&self, name: &str, contents: &[u8]) -> Result<PathBuf> {
        let path = self.path(name);
        fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}

/// Write a capacity file with one `<name> <maximum>` line per entry.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_capacity(path: &Path, capacity: &[(&str, usize)]) -> Result<()> {
    let mut text = String::new();
    for (name, maximum) in capacity {
        let _ = writeln!(text, "{name} {maximum}");
    }
    fs::write(path, text).with_context(|| format!("writing {}", path.display()))
}

/// Deterministic pseudo-random bytes for round-trip inputs.
#[must_use]
pub fn sample_bytes(len: usize) -> Vec<u8> {
    let mut state: u32 = 0x9e37_79b9;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state.to_le_bytes()[0]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_lays_out_directories() -> Result<()> {
        let fixture = PipelineFixture::new(&[("encrypt", 2), ("decrypt", 1)])?;
        assert!(fixture.bin_dir.join("nop").is_file());
        assert!(fixture.reply_dir.is_dir());
        let config = fs::read_to_string(&fixture.config_path)?;
        assert_eq!(config, "encrypt 2\ndecrypt 1\n");
        let input = fixture.write_input("in.txt", b"hello")?;
        assert!(input.starts_with(fixture.root()));
        Ok(())
    }

    #[test]
    fn sample_bytes_are_stable() {
        assert_eq!(sample_bytes(64), sample_bytes(64));
        assert_eq!(sample_bytes(10).len(), 10);
    }
}
