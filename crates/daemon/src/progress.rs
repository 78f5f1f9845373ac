//! Progress tracking for ManageHD
//!
//! One `ProgressTracker` is owned per batch and shared by reference counting
//! between the job pool and any poller. Every mutation happens under a single
//! mutex and publishes a versioned snapshot over a watch channel.

use crate::throughput::{project_time_remaining, ThroughputEstimator, TimeRemaining};
use serde::Serialize;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{watch, Mutex};

/// Point-in-time copy of batch progress
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    /// Incremented on every published change
    pub version: u64,
    pub total_jobs: usize,
    pub jobs_in_flight: usize,
    pub jobs_completed: usize,
    /// Completed jobs whose transcoder reported an error
    pub jobs_failed: usize,
    pub total_mb: f64,
    pub processed_mb: f64,
    pub throughput_gb_per_hour: Option<f64>,
    pub samples: Vec<f64>,
    pub started_at_unix_ms: i64,
    pub time_remaining: TimeRemaining,
}

impl ProgressSnapshot {
    fn empty() -> Self {
        Self {
            version: 0,
            total_jobs: 0,
            jobs_in_flight: 0,
            jobs_completed: 0,
            jobs_failed: 0,
            total_mb: 0.0,
            processed_mb: 0.0,
            throughput_gb_per_hour: None,
            samples: Vec::new(),
            started_at_unix_ms: 0,
            time_remaining: TimeRemaining::Pending,
        }
    }

    /// Every queued job has been picked up by a worker
    pub fn queue_empty(&self) -> bool {
        self.jobs_in_flight + self.jobs_completed >= self.total_jobs
    }

    /// Every queued job has finished
    pub fn drained(&self) -> bool {
        self.jobs_in_flight == 0 && self.jobs_completed >= self.total_jobs
    }
}

#[derive(Debug)]
struct ProgressState {
    version: u64,
    total_jobs: usize,
    jobs_in_flight: usize,
    jobs_completed: usize,
    jobs_failed: usize,
    total_mb: f64,
    processed_mb: f64,
    throughput_gb_per_hour: Option<f64>,
    estimator: ThroughputEstimator,
    started_at: SystemTime,
    time_remaining: TimeRemaining,
}

impl ProgressState {
    fn new(pool_size: usize, seed: Option<f64>) -> Self {
        let estimator = ThroughputEstimator::with_seed(pool_size, seed);
        Self {
            version: 0,
            total_jobs: 0,
            jobs_in_flight: 0,
            jobs_completed: 0,
            jobs_failed: 0,
            total_mb: 0.0,
            processed_mb: 0.0,
            throughput_gb_per_hour: estimator.estimate(),
            estimator,
            started_at: SystemTime::now(),
            time_remaining: TimeRemaining::Pending,
        }
    }

    fn refresh_time_remaining(&mut self) {
        self.time_remaining =
            project_time_remaining(self.total_mb, self.processed_mb, self.throughput_gb_per_hour);
    }

    fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            version: self.version,
            total_jobs: self.total_jobs,
            jobs_in_flight: self.jobs_in_flight,
            jobs_completed: self.jobs_completed,
            jobs_failed: self.jobs_failed,
            total_mb: self.total_mb,
            processed_mb: self.processed_mb,
            throughput_gb_per_hour: self.throughput_gb_per_hour,
            samples: self.estimator.samples().to_vec(),
            started_at_unix_ms: unix_timestamp_ms(self.started_at),
            time_remaining: self.time_remaining,
        }
    }
}

/// Shared progress handle
pub type SharedProgress = Arc<ProgressTracker>;

/// Mutex-guarded batch progress with change notification
#[derive(Debug)]
pub struct ProgressTracker {
    state: Mutex<ProgressState>,
    tx: watch::Sender<ProgressSnapshot>,
}

impl ProgressTracker {
    pub fn new(pool_size: usize, seed: Option<f64>) -> Self {
        let state = ProgressState::new(pool_size, seed);
        let (tx, _rx) = watch::channel(ProgressSnapshot::empty());
        Self {
            state: Mutex::new(state),
            tx,
        }
    }

    /// Creates a new tracker behind an `Arc`
    pub fn shared(pool_size: usize, seed: Option<f64>) -> SharedProgress {
        Arc::new(Self::new(pool_size, seed))
    }

    /// Receiver that is notified of every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tx.subscribe()
    }

    /// Latest published snapshot without taking the state lock
    pub fn latest(&self) -> ProgressSnapshot {
        self.tx.borrow().clone()
    }

    /// Consistent snapshot read under the state lock
    pub async fn snapshot(&self) -> ProgressSnapshot {
        self.state.lock().await.snapshot()
    }

    /// Reset all counters and samples for a new batch
    pub async fn begin_batch(&self, seed: Option<f64>) -> ProgressSnapshot {
        let mut state = self.state.lock().await;
        let version = state.version;
        let pool_size = state.estimator.pool_size();
        *state = ProgressState::new(pool_size, seed);
        state.version = version;
        state.refresh_time_remaining();
        self.publish(&mut state)
    }

    /// Add queued jobs to the batch totals
    pub async fn jobs_queued(&self, count: usize, total_mb: f64) -> ProgressSnapshot {
        let mut state = self.state.lock().await;
        state.total_jobs += count;
        state.total_mb += total_mb;
        state.refresh_time_remaining();
        self.publish(&mut state)
    }

    /// A worker picked up a job
    pub async fn job_started(&self) -> ProgressSnapshot {
        let mut state = self.state.lock().await;
        if state.jobs_in_flight + state.jobs_completed < state.total_jobs {
            state.jobs_in_flight += 1;
        }
        self.publish(&mut state)
    }

    /// A worker finished a job, successfully or not
    ///
    /// Updates counters, records the throughput sample and recomputes the time
    /// remaining in one critical section.
    pub async fn job_finished(
        &self,
        size_mb: f64,
        duration_secs: u64,
        failed: bool,
    ) -> ProgressSnapshot {
        let mut state = self.state.lock().await;
        state.jobs_in_flight = state.jobs_in_flight.saturating_sub(1);
        state.jobs_completed += 1;
        if failed {
            state.jobs_failed += 1;
        }
        state.processed_mb += size_mb;

        let in_flight = state.jobs_in_flight;
        let rate = state
            .estimator
            .record_sample(size_mb, duration_secs, in_flight);
        state.throughput_gb_per_hour = Some(state.estimator.mean().unwrap_or(rate));
        state.refresh_time_remaining();
        self.publish(&mut state)
    }

    /// Mark the batch as drained
    pub async fn finish(&self) -> ProgressSnapshot {
        let mut state = self.state.lock().await;
        state.time_remaining = TimeRemaining::Done;
        self.publish(&mut state)
    }

    /// Current throughput estimate in GB/hour
    pub async fn throughput(&self) -> Option<f64> {
        self.state.lock().await.throughput_gb_per_hour
    }

    fn publish(&self, state: &mut ProgressState) -> ProgressSnapshot {
        state.version += 1;
        let snapshot = state.snapshot();
        self.tx.send_replace(snapshot.clone());
        snapshot
    }
}

/// Milliseconds since the Unix epoch
fn unix_timestamp_ms(time: SystemTime) -> i64 {
    time.duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
