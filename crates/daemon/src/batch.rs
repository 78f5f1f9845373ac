//! Batch orchestration for ManageHD
//!
//! Plans one job per source video, runs them through the job pool, waits for
//! the pool to drain and then archives the converted sources.

use crate::archive::{ArchiveError, ArchiveOutcome, ArchiveReconciler, MoveFailure};
use crate::config::{Config, Preset};
use crate::encode::{
    build_invocation, destination_path, has_unquotable_name, ProcessTranscoder, Transcoder,
};
use crate::file_stat::{size_in_megabytes, SystemVolumes, VolumeProbe};
use crate::job_pool::{Job, JobPool, PoolError};
use crate::platform::Platform;
use crate::progress::{ProgressSnapshot, ProgressTracker, SharedProgress};
use crate::scan::enumerate_sources;
use log::{info, warn};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;

/// Error type for batch operations
#[derive(Debug, Error)]
pub enum BatchError {
    /// Job pool error
    #[error("Job pool error: {0}")]
    Pool(#[from] PoolError),

    /// Archive step could not run
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Archive task panicked
    #[error("Archive task failed: {0}")]
    ArchiveTask(#[from] tokio::task::JoinError),
}

/// Where a batch is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
    Idle,
    Running,
    /// Queue is empty, last jobs still converting
    Draining,
    Reconciling,
    Completed,
    /// Archive volume too small; converted outputs kept, sources untouched
    InsufficientSpace,
    /// No archive directory configured
    Skipped,
    /// No source files matched
    Empty,
}

impl BatchPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchPhase::Completed
                | BatchPhase::InsufficientSpace
                | BatchPhase::Skipped
                | BatchPhase::Empty
        )
    }
}

impl fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchPhase::Idle => "idle",
            BatchPhase::Running => "running",
            BatchPhase::Draining => "draining",
            BatchPhase::Reconciling => "reconciling",
            BatchPhase::Completed => "completed",
            BatchPhase::InsufficientSpace => "insufficient_space",
            BatchPhase::Skipped => "skipped",
            BatchPhase::Empty => "empty",
        };
        f.write_str(name)
    }
}

/// Directories and filters for one batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    pub source_dir: PathBuf,
    /// Archive directory; unset or empty skips archival
    pub archive_dir: Option<PathBuf>,
    pub destination_dir: PathBuf,
    /// Maximum number of sources to convert (0 = all)
    pub max_files: usize,
    /// Extensions to pick up, without dots
    pub extensions: Vec<String>,
}

impl BatchRequest {
    fn archive_dir(&self) -> Option<&Path> {
        self.archive_dir
            .as_deref()
            .filter(|dir| !dir.as_os_str().is_empty())
    }
}

/// Jobs derived from a request
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPlan {
    pub jobs: Vec<Job>,
    /// Sources that will be converted, in queue order
    pub sources: Vec<PathBuf>,
    /// Sources left out because their names contain a double quote
    pub rejected: Vec<PathBuf>,
}

/// Summary of a finished batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub id: String,
    pub phase: BatchPhase,
    pub jobs_total: usize,
    pub jobs_completed: usize,
    pub jobs_failed: usize,
    pub total_mb: f64,
    pub processed_mb: f64,
    /// Final throughput estimate in GB/hour
    pub throughput_gb_per_hour: Option<f64>,
    pub elapsed_secs: u64,
    pub rejected: Vec<PathBuf>,
    pub archived: Vec<PathBuf>,
    pub archive_failures: Vec<MoveFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_bytes: Option<u64>,
}

impl BatchReport {
    fn new(id: String, phase: BatchPhase, snapshot: &ProgressSnapshot, rejected: Vec<PathBuf>) -> Self {
        Self {
            id,
            phase,
            jobs_total: snapshot.total_jobs,
            jobs_completed: snapshot.jobs_completed,
            jobs_failed: snapshot.jobs_failed,
            total_mb: snapshot.total_mb,
            processed_mb: snapshot.processed_mb,
            throughput_gb_per_hour: snapshot.throughput_gb_per_hour,
            elapsed_secs: 0,
            rejected,
            archived: Vec::new(),
            archive_failures: Vec::new(),
            required_bytes: None,
            available_bytes: None,
        }
    }

    /// Whether the batch ended without leaving work the user must retry
    pub fn is_success(&self) -> bool {
        self.phase != BatchPhase::InsufficientSpace
    }
}

/// Runs batches end to end and publishes the current phase
pub struct BatchRunner {
    preset: Preset,
    transcoder_binary: String,
    workers: usize,
    speed_seed: Option<f64>,
    transcoder: Arc<dyn Transcoder>,
    reconciler: Arc<ArchiveReconciler>,
    progress: SharedProgress,
    phase_tx: watch::Sender<BatchPhase>,
}

impl BatchRunner {
    /// Runner that spawns the real transcoder and queries real volumes
    pub fn new(platform: &Platform, cfg: &Config, speed_seed: Option<f64>) -> Self {
        Self::with_components(
            platform,
            cfg,
            speed_seed,
            Arc::new(ProcessTranscoder),
            Arc::new(SystemVolumes::new(platform.volume_strategy)),
        )
    }

    pub fn with_components(
        platform: &Platform,
        cfg: &Config,
        speed_seed: Option<f64>,
        transcoder: Arc<dyn Transcoder>,
        volumes: Arc<dyn VolumeProbe>,
    ) -> Self {
        let preset = cfg.transcoder.preset;
        let workers = platform.worker_count(cfg.pool.workers);
        let (phase_tx, _) = watch::channel(BatchPhase::Idle);

        Self {
            preset,
            transcoder_binary: platform.transcoder_binary(cfg),
            workers,
            speed_seed,
            transcoder,
            reconciler: Arc::new(ArchiveReconciler::new(
                volumes,
                preset,
                platform.timestamp_strategy,
            )),
            progress: ProgressTracker::shared(workers, speed_seed),
            phase_tx,
        }
    }

    /// Shared progress of the current batch
    pub fn progress(&self) -> SharedProgress {
        self.progress.clone()
    }

    pub fn phase(&self) -> BatchPhase {
        *self.phase_tx.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<BatchPhase> {
        self.phase_tx.subscribe()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    fn set_phase(&self, phase: BatchPhase) {
        info!("batch phase: {}", phase);
        self.phase_tx.send_replace(phase);
    }

    /// Enumerate sources and build one job per acceptable file
    pub fn plan(&self, request: &BatchRequest) -> BatchPlan {
        let found = enumerate_sources(&request.source_dir, &request.extensions, request.max_files);

        let (rejected, sources): (Vec<PathBuf>, Vec<PathBuf>) =
            found.into_iter().partition(|path| has_unquotable_name(path));
        for path in &rejected {
            warn!("skipping {}: file name contains a double quote", path.display());
        }

        let jobs = sources
            .iter()
            .map(|source| {
                let destination = destination_path(source, &request.destination_dir, self.preset);
                let invocation =
                    build_invocation(&self.transcoder_binary, source, &destination, self.preset);
                Job::new(
                    source.clone(),
                    destination,
                    invocation,
                    size_in_megabytes(source),
                )
            })
            .collect();

        BatchPlan {
            jobs,
            sources,
            rejected,
        }
    }

    /// Convert every planned source, then archive the converted ones
    pub async fn run(&self, request: &BatchRequest) -> Result<BatchReport, BatchError> {
        let started = Instant::now();
        let id = uuid::Uuid::new_v4().to_string();
        let plan = self.plan(request);

        self.set_phase(BatchPhase::Idle);
        self.progress.begin_batch(self.speed_seed).await;

        if plan.jobs.is_empty() {
            info!("no source videos found in {}", request.source_dir.display());
            let snapshot = self.progress.finish().await;
            self.set_phase(BatchPhase::Empty);
            let mut report = BatchReport::new(id, BatchPhase::Empty, &snapshot, plan.rejected);
            report.elapsed_secs = started.elapsed().as_secs();
            return Ok(report);
        }

        info!(
            "batch {}: {} jobs on {} workers",
            id,
            plan.jobs.len(),
            self.workers
        );

        let pool = JobPool::start(self.workers, self.transcoder.clone(), self.progress.clone());
        self.set_phase(BatchPhase::Running);
        pool.run_to_completion(plan.jobs, |_| self.set_phase(BatchPhase::Draining)).await?;
        let snapshot = self.progress.finish().await;

        info!(
            "converted {} of {} sources ({} failed) at {:?} GB/hour",
            snapshot.jobs_completed - snapshot.jobs_failed,
            snapshot.total_jobs,
            snapshot.jobs_failed,
            snapshot.throughput_gb_per_hour
        );

        let mut report = match request.archive_dir() {
            None => BatchReport::new(id, BatchPhase::Skipped, &snapshot, plan.rejected),
            Some(archive_dir) => {
                self.set_phase(BatchPhase::Reconciling);
                let outcome = self
                    .reconcile(
                        archive_dir.to_path_buf(),
                        request.source_dir.clone(),
                        request.destination_dir.clone(),
                        plan.sources,
                    )
                    .await?;
                report_from_outcome(id, outcome, &snapshot, plan.rejected)
            }
        };

        report.elapsed_secs = started.elapsed().as_secs();
        self.set_phase(report.phase);
        Ok(report)
    }

    async fn reconcile(
        &self,
        archive_dir: PathBuf,
        source_dir: PathBuf,
        destination_dir: PathBuf,
        sources: Vec<PathBuf>,
    ) -> Result<ArchiveOutcome, BatchError> {
        let reconciler = self.reconciler.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            reconciler.archive(Some(archive_dir.as_path()), &source_dir, &destination_dir, &sources)
        })
        .await??;
        Ok(outcome)
    }
}

fn report_from_outcome(
    id: String,
    outcome: ArchiveOutcome,
    snapshot: &ProgressSnapshot,
    rejected: Vec<PathBuf>,
) -> BatchReport {
    match outcome {
        ArchiveOutcome::Completed { archived, failures } => {
            let mut report = BatchReport::new(id, BatchPhase::Completed, snapshot, rejected);
            report.archived = archived;
            report.archive_failures = failures;
            report
        }
        ArchiveOutcome::InsufficientSpace {
            required_bytes,
            available_bytes,
        } => {
            let mut report =
                BatchReport::new(id, BatchPhase::InsufficientSpace, snapshot, rejected);
            report.required_bytes = Some(required_bytes);
            report.available_bytes = Some(available_bytes);
            report
        }
        ArchiveOutcome::Skipped => BatchReport::new(id, BatchPhase::Skipped, snapshot, rejected),
    }
}
