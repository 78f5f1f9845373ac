//! Startup checks module for ManageHD
//!
//! Preflight checks run before any job is queued:
//! - HandBrakeCLI availability
//! - Source directory presence, destination directory creation

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Transcoder not available: {0}")]
    TranscoderUnavailable(String),

    #[error("Source directory does not exist: {0}")]
    SourceDirMissing(PathBuf),

    #[error("Failed to create destination directory {path}: {source}")]
    DestinationDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Pull the version banner (`HandBrake 1.6.1`) out of `--version` output
pub fn parse_transcoder_version(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| line.to_lowercase().starts_with("handbrake"))
        .map(String::from)
}

/// Check the transcoder is available by running `<binary> --version`
///
/// Returns the reported version banner when one can be found.
pub fn check_transcoder_available(binary: &str) -> Result<Option<String>, StartupError> {
    let output = Command::new(binary)
        .arg("--version")
        .output()
        .map_err(|e| {
            StartupError::TranscoderUnavailable(format!(
                "{} --version failed; is HandBrakeCLI installed and in PATH? Error: {}",
                binary, e
            ))
        })?;

    if !output.status.success() {
        return Err(StartupError::TranscoderUnavailable(format!(
            "{} --version failed; is HandBrakeCLI installed and in PATH?",
            binary
        )));
    }

    // HandBrakeCLI prints its banner on stderr in some releases
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push('\n');
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(parse_transcoder_version(&text))
}

/// Ensure the source exists and the destination can be written to
pub fn check_directories(source_dir: &Path, destination_dir: &Path) -> Result<(), StartupError> {
    if !source_dir.is_dir() {
        return Err(StartupError::SourceDirMissing(source_dir.to_path_buf()));
    }

    fs::create_dir_all(destination_dir).map_err(|source| StartupError::DestinationDir {
        path: destination_dir.to_path_buf(),
        source,
    })
}

/// Run all startup checks in order
///
/// 1. Transcoder availability
/// 2. Source and destination directories
pub fn run_startup_checks(
    binary: &str,
    source_dir: &Path,
    destination_dir: &Path,
) -> Result<Option<String>, StartupError> {
    let version = check_transcoder_available(binary)?;
    check_directories(source_dir, destination_dir)?;
    Ok(version)
}
