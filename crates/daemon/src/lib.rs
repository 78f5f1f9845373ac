//! ManageHD
//!
//! Batch conversion of HD videos through HandBrakeCLI: a worker pool with
//! shared progress and throughput estimation, followed by archival of the
//! sources that were converted.

pub mod archive;
pub mod batch;
pub mod encode;
pub mod file_stat;
pub mod job_pool;
pub mod platform;
pub mod progress;
pub mod scan;
pub mod startup;
pub mod throughput;

pub use archive::{
    is_superseded, relocate, ArchiveCandidate, ArchiveError, ArchiveOutcome, ArchiveReconciler,
    MoveFailure,
};
pub use batch::{BatchError, BatchPhase, BatchPlan, BatchReport, BatchRequest, BatchRunner};
pub use encode::{
    build_invocation, destination_path, has_unquotable_name, output_extension, Invocation,
    ProcessTranscoder, TranscodeError, Transcoder, HANDBRAKE_OPTIONS,
};
pub use file_stat::{creation_time, size_in_megabytes, FileStat, SystemVolumes, VolumeProbe};
pub use job_pool::{Job, JobPool, PoolError};
pub use managehd_config as config;
pub use managehd_config::{Config, ConfigError, HostPlatform, Preset, Settings};
pub use platform::{Platform, TimestampStrategy, VolumeStrategy};
pub use progress::{ProgressSnapshot, ProgressTracker, SharedProgress};
pub use scan::{enumerate_sources, parse_extensions, DEFAULT_EXTENSIONS};
pub use startup::{
    check_directories, check_transcoder_available, parse_transcoder_version, run_startup_checks,
    StartupError,
};
pub use throughput::{
    project_time_remaining, ThroughputEstimator, TimeRemaining, BOOTSTRAP_GB_PER_HOUR,
};
