//! Transcoder modules for ManageHD

pub mod handbrake;

pub use handbrake::{
    build_invocation, destination_path, has_unquotable_name, output_extension, Invocation,
    ProcessTranscoder, HANDBRAKE_OPTIONS,
};

use crate::job_pool::Job;
use thiserror::Error;

/// Error type for transcoder invocations
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// Transcoder process exited with non-zero status
    #[error("Transcoder failed with exit code: {0}")]
    Failed(i32),

    /// Transcoder process was terminated by signal
    #[error("Transcoder process was terminated by signal")]
    Terminated,

    /// Transcoder task panicked before reporting a status
    #[error("Transcoder task panicked: {0}")]
    Panicked(String),

    /// IO error while starting the transcoder
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs one job to completion, blocking the calling thread
pub trait Transcoder: Send + Sync + 'static {
    fn transcode(&self, job: &Job) -> Result<(), TranscodeError>;
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Transcoder that sleeps instead of encoding and records what it ran
    #[derive(Debug, Default)]
    pub struct FakeTranscoder {
        pub delay: Duration,
        /// Source file names that should report failure
        pub fail_names: Vec<String>,
        /// Write a small output file for every successful job
        pub write_outputs: bool,
        pub ran: Mutex<Vec<String>>,
        pub running: AtomicUsize,
        pub max_running: AtomicUsize,
    }

    impl FakeTranscoder {
        pub fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        pub fn ran(&self) -> Vec<String> {
            self.ran.lock().unwrap().clone()
        }
    }

    impl Transcoder for FakeTranscoder {
        fn transcode(&self, job: &Job) -> Result<(), TranscodeError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.running.fetch_sub(1, Ordering::SeqCst);

            let name = job
                .source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.ran.lock().unwrap().push(name.clone());

            if self.fail_names.contains(&name) {
                return Err(TranscodeError::Failed(3));
            }
            if self.write_outputs {
                std::fs::write(&job.destination, b"converted")?;
            }
            Ok(())
        }
    }
}
