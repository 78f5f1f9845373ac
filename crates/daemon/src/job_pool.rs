//! Job pool module for ManageHD
//!
//! A fixed set of worker tasks draining one FIFO job queue. Each worker runs the
//! transcoder on a blocking thread and reports start/finish to the shared progress.

use crate::encode::{Invocation, TranscodeError, Transcoder};
use crate::progress::{ProgressSnapshot, SharedProgress};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Error type for job pool operations
#[derive(Debug, Error)]
pub enum PoolError {
    /// The queue was closed before all jobs were submitted
    #[error("Job queue is closed")]
    QueueClosed,

    /// The progress channel closed while waiting for the batch to drain
    #[error("Progress channel closed while draining")]
    ProgressClosed,

    /// A worker task panicked or was cancelled
    #[error("Worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// One source-file-to-destination-file conversion
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Unique job identifier
    pub id: String,
    /// Path to the source video file
    pub source: PathBuf,
    /// Path the converted file is written to
    pub destination: PathBuf,
    /// Transcoder call producing `destination` from `source`
    pub invocation: Invocation,
    /// Source size in megabytes
    pub size_mb: f64,
}

impl Job {
    /// Create a new job with a fresh id
    pub fn new(source: PathBuf, destination: PathBuf, invocation: Invocation, size_mb: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            destination,
            invocation,
            size_mb,
        }
    }
}

/// Fixed-size worker pool with an explicit start/submit/drain/shutdown lifecycle
pub struct JobPool {
    sender: Option<mpsc::UnboundedSender<Job>>,
    workers: Vec<JoinHandle<()>>,
    progress: SharedProgress,
}

impl JobPool {
    /// Spawn `worker_count` workers (at least one) waiting on an empty queue
    pub fn start(
        worker_count: usize,
        transcoder: Arc<dyn Transcoder>,
        progress: SharedProgress,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..worker_count.max(1))
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    receiver.clone(),
                    transcoder.clone(),
                    progress.clone(),
                ))
            })
            .collect();

        Self {
            sender: Some(sender),
            workers,
            progress,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queue jobs in order; totals are added to progress before any worker sees them
    pub async fn submit(&self, jobs: Vec<Job>) -> Result<(), PoolError> {
        let sender = self.sender.as_ref().ok_or(PoolError::QueueClosed)?;
        let total_mb = jobs.iter().map(|j| j.size_mb).sum();
        self.progress.jobs_queued(jobs.len(), total_mb).await;

        for job in jobs {
            sender.send(job).map_err(|_| PoolError::QueueClosed)?;
        }
        Ok(())
    }

    /// Wait until every queued job has been picked up by a worker
    pub async fn wait_queue_empty(&self) -> Result<ProgressSnapshot, PoolError> {
        self.wait_for(ProgressSnapshot::queue_empty).await
    }

    /// Wait until every submitted job has finished
    pub async fn drain(&self) -> Result<ProgressSnapshot, PoolError> {
        self.wait_for(ProgressSnapshot::drained).await
    }

    async fn wait_for(
        &self,
        condition: impl Fn(&ProgressSnapshot) -> bool,
    ) -> Result<ProgressSnapshot, PoolError> {
        let mut rx = self.progress.subscribe();
        let snapshot = rx
            .wait_for(|s| condition(s))
            .await
            .map_err(|_| PoolError::ProgressClosed)?;
        Ok(snapshot.clone())
    }

    /// Submit `jobs`, wait for all of them to finish, then shut down
    ///
    /// `on_queue_empty` runs once every job has been picked up. Workers are
    /// joined on every path, including when submitting or waiting fails.
    pub async fn run_to_completion(
        self,
        jobs: Vec<Job>,
        on_queue_empty: impl FnOnce(&ProgressSnapshot),
    ) -> Result<ProgressSnapshot, PoolError> {
        let drained = self.submit_and_drain(jobs, on_queue_empty).await;
        let shutdown = self.shutdown().await;
        let snapshot = drained?;
        shutdown?;
        Ok(snapshot)
    }

    async fn submit_and_drain(
        &self,
        jobs: Vec<Job>,
        on_queue_empty: impl FnOnce(&ProgressSnapshot),
    ) -> Result<ProgressSnapshot, PoolError> {
        self.submit(jobs).await?;
        let snapshot = self.wait_queue_empty().await?;
        on_queue_empty(&snapshot);
        self.drain().await
    }

    /// Stop accepting jobs; workers exit once the queue is empty
    pub fn close(&mut self) {
        self.sender.take();
    }

    /// Close the queue and join every worker
    pub async fn shutdown(mut self) -> Result<(), PoolError> {
        self.close();
        for worker in self.workers.drain(..) {
            worker.await?;
        }
        Ok(())
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    transcoder: Arc<dyn Transcoder>,
    progress: SharedProgress,
) {
    loop {
        let job = {
            let mut rx = receiver.lock().await;
            rx.recv().await
        };

        let Some(job) = job else {
            debug!("worker {} stopping: queue closed", worker_id);
            break;
        };

        progress.job_started().await;
        debug!(
            "worker {} started job {}: {}",
            worker_id,
            job.id,
            job.invocation.command_line()
        );

        let id = job.id.clone();
        let size_mb = job.size_mb;
        let source = job.source.clone();
        let started = Instant::now();

        let transcoder = transcoder.clone();
        let result = tokio::task::spawn_blocking(move || transcoder.transcode(&job))
            .await
            .unwrap_or_else(|e| Err(TranscodeError::Panicked(e.to_string())));

        let duration_secs = started.elapsed().as_secs();
        let failed = match result {
            Ok(()) => false,
            Err(e) => {
                warn!("job {} ({}) failed: {}", id, source.display(), e);
                true
            }
        };

        let snapshot = progress.job_finished(size_mb, duration_secs, failed).await;
        info!(
            "finished {} in {}s ({}/{} complete, {} remaining)",
            source.display(),
            duration_secs,
            snapshot.jobs_completed,
            snapshot.total_jobs,
            snapshot.time_remaining
        );
    }
}
