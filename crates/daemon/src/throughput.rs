//! Throughput estimation for ManageHD
//!
//! Keeps the per-job GB/hour samples of the running batch, averages them into a
//! processing-speed estimate, and projects the time left for the data still queued.

use serde::Serialize;
use std::fmt;

/// Estimate returned for jobs that finished in under a second
pub const BOOTSTRAP_GB_PER_HOUR: f64 = 1.5;

const MINUTES_PER_HOUR: f64 = 60.0;
const MINUTES_PER_DAY: f64 = 60.0 * 24.0;

/// Rolling average of per-job throughput samples for one batch
#[derive(Debug, Clone, PartialEq)]
pub struct ThroughputEstimator {
    /// Configured worker-pool size, caps the parallelism multiplier
    pool_size: usize,
    /// Persisted estimate from a previous run, used until the first sample lands
    seed: Option<f64>,
    samples: Vec<f64>,
}

impl ThroughputEstimator {
    pub fn new(pool_size: usize) -> Self {
        Self::with_seed(pool_size, None)
    }

    pub fn with_seed(pool_size: usize, seed: Option<f64>) -> Self {
        Self {
            pool_size: pool_size.max(1),
            seed: seed.filter(|s| *s > 0.0),
            samples: Vec::new(),
        }
    }

    /// Record one finished job and return the updated estimate in GB/hour
    ///
    /// `in_flight` is the number of other jobs still running when this one
    /// finished. A zero duration returns [`BOOTSTRAP_GB_PER_HOUR`] without
    /// recording a sample.
    pub fn record_sample(&mut self, size_mb: f64, duration_secs: u64, in_flight: usize) -> f64 {
        if duration_secs == 0 {
            return BOOTSTRAP_GB_PER_HOUR;
        }

        let gb_per_sec = (size_mb / 1024.0) / duration_secs as f64;
        let scaled = gb_per_sec * parallel_multiplier(in_flight, self.pool_size) as f64;
        self.samples.push(scaled * 60.0 * 60.0);

        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// Mean of the recorded samples, if any
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
        }
    }

    /// Current estimate: the sample mean, or the seed before the first sample
    pub fn estimate(&self) -> Option<f64> {
        self.mean().or(self.seed)
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Drop all samples; the seed is replaced for the next batch
    pub fn reset(&mut self, seed: Option<f64>) {
        self.samples.clear();
        self.seed = seed.filter(|s| *s > 0.0);
    }
}

/// Factor applied to a single job's rate to approximate pool throughput
///
/// One job's serial rate is multiplied by the number of jobs that were running
/// alongside it (itself included), capped at the pool size.
pub fn parallel_multiplier(in_flight: usize, pool_size: usize) -> usize {
    if pool_size > 1 && in_flight > 0 {
        (in_flight + 1).min(pool_size)
    } else {
        1
    }
}

/// Human-readable projection of the time left in a batch
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(into = "String")]
pub enum TimeRemaining {
    /// No throughput estimate yet
    Pending,
    /// Two days or more
    Days(f64),
    /// Between one and two days
    Day(f64),
    /// Between two hours and one day
    Hours(f64),
    /// Between one and two hours; holds the minutes past the first hour
    Hour(f64),
    /// Between one and sixty minutes
    Minutes(f64),
    /// One minute or less
    UnderOneMinute,
    /// The batch has drained
    Done,
}

impl TimeRemaining {
    /// Bucket a remaining-minutes figure into display units
    pub fn from_minutes(minutes: f64) -> Self {
        if minutes >= MINUTES_PER_DAY * 2.0 {
            TimeRemaining::Days(minutes / MINUTES_PER_DAY)
        } else if minutes >= MINUTES_PER_DAY {
            TimeRemaining::Day(minutes / MINUTES_PER_DAY)
        } else if minutes >= MINUTES_PER_HOUR * 2.0 {
            TimeRemaining::Hours(minutes / MINUTES_PER_HOUR)
        } else if minutes >= MINUTES_PER_HOUR {
            TimeRemaining::Hour(minutes - MINUTES_PER_HOUR)
        } else if minutes > 1.0 {
            TimeRemaining::Minutes(minutes)
        } else {
            TimeRemaining::UnderOneMinute
        }
    }
}

impl fmt::Display for TimeRemaining {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeRemaining::Pending => write!(f, "Computed after first job"),
            TimeRemaining::Days(days) => write!(f, "{:.1} Days", days),
            TimeRemaining::Day(days) => write!(f, "{:.1} Day", days),
            TimeRemaining::Hours(hours) => write!(f, "{:.1} Hours", hours),
            TimeRemaining::Hour(minutes) => write!(f, "1 Hour {:.1} Minutes", minutes),
            TimeRemaining::Minutes(minutes) => write!(f, "{:.1} Minutes", minutes),
            TimeRemaining::UnderOneMinute => write!(f, "less than 1 minute"),
            TimeRemaining::Done => write!(f, "Done"),
        }
    }
}

impl From<TimeRemaining> for String {
    fn from(value: TimeRemaining) -> Self {
        value.to_string()
    }
}

/// Minutes needed to process the data still pending at `gb_per_hour`
pub fn remaining_minutes(total_mb: f64, processed_mb: f64, gb_per_hour: f64) -> f64 {
    let pending_mb = total_mb - processed_mb;
    let mb_per_minute = (gb_per_hour * 1024.0) / MINUTES_PER_HOUR;
    pending_mb / mb_per_minute
}

/// Project the time left for a batch from its queued and processed totals
pub fn project_time_remaining(
    total_mb: f64,
    processed_mb: f64,
    gb_per_hour: Option<f64>,
) -> TimeRemaining {
    match gb_per_hour {
        Some(rate) if rate > 0.0 => {
            TimeRemaining::from_minutes(remaining_minutes(total_mb, processed_mb, rate))
        }
        _ => TimeRemaining::Pending,
    }
}
