//! HandBrake transcoder module for ManageHD
//!
//! Builds HandBrakeCLI invocations from a fixed option string and a preset,
//! and runs them as child processes.

use super::{TranscodeError, Transcoder};
use crate::config::Preset;
use crate::job_pool::Job;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Fixed HandBrake options after the container flag: 720p width, no crop,
/// decomb, first subtitle track, English native language, chapter markers,
/// x264 at constant quality 19 and AC3 audio
pub const HANDBRAKE_OPTIONS: &str =
    "--width 1280 --crop 0:0:0:0 --decomb -s 1 -N eng -m --large-file --encoder x264 -q 19 -E ffac3";

/// Container format passed to `-f` for a preset
pub fn container_format(preset: Preset) -> &'static str {
    match preset {
        Preset::Standard => "mkv",
        Preset::Alternate => "mp4",
    }
}

/// File extension of the files a preset produces
pub fn output_extension(preset: Preset) -> &'static str {
    container_format(preset)
}

/// Destination file for `source`: same stem, preset extension, inside `destination_dir`
pub fn destination_path(source: &Path, destination_dir: &Path, preset: Preset) -> PathBuf {
    let mut name = source
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(output_extension(preset));
    destination_dir.join(name)
}

/// Whether the file name would break the quoted command line
pub fn has_unquotable_name(path: &Path) -> bool {
    path.to_string_lossy().contains('"')
}

/// A fully specified transcoder call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<OsString>,
}

impl Invocation {
    /// Build a Command ready for execution
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    /// Shell-style rendering with the input and output paths quoted
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        let mut quote_next = false;
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            line.push(' ');
            if quote_next {
                line.push('"');
                line.push_str(&arg);
                line.push('"');
            } else {
                line.push_str(&arg);
            }
            quote_next = arg == "-i" || arg == "-o";
        }
        line
    }
}

/// Build the HandBrake invocation converting `source` into `destination`
///
/// Produces `<program> -i <source> -o <destination> -f <container> <options>`.
pub fn build_invocation(
    program: &str,
    source: &Path,
    destination: &Path,
    preset: Preset,
) -> Invocation {
    let mut args: Vec<OsString> = vec![
        "-i".into(),
        source.as_os_str().to_owned(),
        "-o".into(),
        destination.as_os_str().to_owned(),
        "-f".into(),
        container_format(preset).into(),
    ];
    args.extend(HANDBRAKE_OPTIONS.split_whitespace().map(OsString::from));

    Invocation {
        program: program.to_string(),
        args,
    }
}

/// Runs each job's invocation as a child process
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessTranscoder;

impl Transcoder for ProcessTranscoder {
    fn transcode(&self, job: &Job) -> Result<(), TranscodeError> {
        let status = job.invocation.command().status()?;

        if status.success() {
            Ok(())
        } else {
            match status.code() {
                Some(code) => Err(TranscodeError::Failed(code)),
                None => Err(TranscodeError::Terminated),
            }
        }
    }
}
