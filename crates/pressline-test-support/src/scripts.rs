//! POSIX shell scripts standing in for the transformation executables.
//!
//! Compressors are `base64` and encryption is rot13 through `tr`, so every
//! pair is a real inverse of the other and round trips can be asserted.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const ROT13: &str = "tr 'A-Za-z' 'N-ZA-Mn-za-m'";

/// Canonical script body for each transformation name.
pub const STANDARD: [(&str, &str); 7] = [
    ("nop", "exec cat"),
    ("bcompress", "exec base64"),
    ("bdecompress", "exec base64 -d"),
    ("gcompress", "exec base64 -w 76"),
    ("gdecompress", "exec base64 -d"),
    ("encrypt", "exec tr 'A-Za-z' 'N-ZA-Mn-za-m'"),
    ("decrypt", "exec tr 'A-Za-z' 'N-ZA-Mn-za-m'"),
];

/// Write an executable `#!/bin/sh` script named `name` into `dir`.
///
/// # Errors
///
/// Returns an error if the file cannot be written or made executable.
pub fn write_script(dir: &Path, name: &str, body: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n"))
        .with_context(|| format!("writing script {}", path.display()))?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("marking {} executable", path.display()))?;
    Ok(path)
}

/// Install the seven standard scripts into `dir`.
///
/// # Errors
///
/// Returns an error if any script cannot be written.
pub fn install_standard(dir: &Path) -> Result<()> {
    for (name, body) in STANDARD {
        write_script(dir, name, body)?;
    }
    Ok(())
}

/// Replace `name` with a rot13 filter that sleeps `seconds` first.
///
/// # Errors
///
/// Returns an error if the script cannot be written.
pub fn install_slow_rot13(dir: &Path, name: &str, seconds: f32) -> Result<PathBuf> {
    write_script(dir, name, &format!("sleep {seconds}\nexec {ROT13}"))
}

/// Replace `name` with a pass-through that sleeps `seconds` first.
///
/// # Errors
///
/// Returns an error if the script cannot be written.
pub fn install_slow_cat(dir: &Path, name: &str, seconds: f32) -> Result<PathBuf> {
    write_script(dir, name, &format!("sleep {seconds}\nexec cat"))
}

/// Replace `name` with a script that exits with `code` without reading input.
///
/// # Errors
///
/// Returns an error if the script cannot be written.
pub fn install_failing(dir: &Path, name: &str, code: u8) -> Result<PathBuf> {
    write_script(dir, name, &format!("exit {code}"))
}

/// Remove `name` from `dir` so spawning it fails.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be removed.
pub fn remove_script(dir: &Path, name: &str) -> Result<()> {
    let path = dir.join(name);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("removing {}", path.display())),
    }
}
