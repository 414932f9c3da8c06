//! Progress tracking and speed statistics
//!
//! Per-job trackers keep the reported fraction monotonically non-decreasing
//! and smooth the reported speed with an exponential moving average. Workers
//! publish updates here; `list_jobs` and the event stream read snapshots.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, warn};

use crate::core::models::JobId;

/// Point-in-time view of one job's progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Completion fraction in [0, 1]
    pub fraction: f64,
    /// Smoothed download speed in bytes per second
    pub speed: Option<f64>,
    /// Estimated seconds to completion
    pub eta: Option<u64>,
    /// Seconds since tracking started
    pub elapsed_secs: f64,
    /// Number of updates received
    pub update_count: u64,
}

/// Tracker for a single job's progress reports
#[derive(Debug)]
struct JobProgressTracker {
    started_at: Instant,
    fraction: f64,
    smoothed_speed: Option<f64>,
    eta: Option<u64>,
    /// EMA weight for new speed measurements
    ema_alpha: f64,
    update_count: u64,
}

impl JobProgressTracker {
    fn new() -> Self {
        Self {
            started_at: Instant::now(),
            fraction: 0.0,
            smoothed_speed: None,
            eta: None,
            ema_alpha: 0.2,
            update_count: 0,
        }
    }

    /// Apply one progress report. Out-of-range fractions are clamped and a
    /// fraction below the last one is ignored, so the published value never
    /// decreases.
    fn update(&mut self, fraction: f64, speed: Option<f64>, eta: Option<u64>) {
        let fraction = fraction.clamp(0.0, 1.0);
        if fraction > self.fraction {
            self.fraction = fraction;
        }

        if let Some(speed) = speed {
            if speed.is_finite() && speed >= 0.0 {
                self.smoothed_speed = Some(match self.smoothed_speed {
                    Some(prev) => self.ema_alpha * speed + (1.0 - self.ema_alpha) * prev,
                    None => speed,
                });
            }
        }

        if eta.is_some() {
            self.eta = eta;
        }

        self.update_count += 1;
    }

    fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            fraction: self.fraction,
            speed: self.smoothed_speed,
            eta: self.eta,
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
            update_count: self.update_count,
        }
    }
}

/// Shared registry of job progress trackers
#[derive(Debug, Default)]
pub struct ProgressBoard {
    trackers: RwLock<HashMap<JobId, JobProgressTracker>>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin tracking a job. Resets any previous tracker for the same id.
    pub fn start(&self, job_id: JobId) {
        let mut trackers = self.trackers.write();
        trackers.insert(job_id, JobProgressTracker::new());
        debug!("Started progress tracking for job {}", job_id);
    }

    /// Record a progress report and return the clamped snapshot.
    pub fn update(
        &self,
        job_id: JobId,
        fraction: f64,
        speed: Option<f64>,
        eta: Option<u64>,
    ) -> Option<ProgressSnapshot> {
        let mut trackers = self.trackers.write();
        match trackers.get_mut(&job_id) {
            Some(tracker) => {
                tracker.update(fraction, speed, eta);
                Some(tracker.snapshot())
            }
            None => {
                warn!("Progress report for untracked job {}", job_id);
                None
            }
        }
    }

    /// Force the fraction to 1.0 (terminal success).
    pub fn complete(&self, job_id: JobId) -> Option<ProgressSnapshot> {
        self.update(job_id, 1.0, None, Some(0))
    }

    pub fn snapshot(&self, job_id: JobId) -> Option<ProgressSnapshot> {
        self.trackers.read().get(&job_id).map(|t| t.snapshot())
    }

    /// Stop tracking a job, returning its final snapshot.
    pub fn remove(&self, job_id: JobId) -> Option<ProgressSnapshot> {
        self.trackers
            .write()
            .remove(&job_id)
            .map(|t| t.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_is_monotonic() {
        let board = ProgressBoard::new();
        let job_id = JobId::new();
        board.start(job_id);

        board.update(job_id, 0.3, None, None);
        board.update(job_id, 0.6, None, None);
        // A regressing report must not lower the published fraction
        let snapshot = board.update(job_id, 0.4, None, None).unwrap();
        assert_eq!(snapshot.fraction, 0.6);

        let snapshot = board.update(job_id, 0.9, None, None).unwrap();
        assert_eq!(snapshot.fraction, 0.9);
    }

    #[test]
    fn test_fraction_is_clamped() {
        let board = ProgressBoard::new();
        let job_id = JobId::new();
        board.start(job_id);

        let snapshot = board.update(job_id, 1.7, None, None).unwrap();
        assert_eq!(snapshot.fraction, 1.0);

        let other = JobId::new();
        board.start(other);
        let snapshot = board.update(other, -0.5, None, None).unwrap();
        assert_eq!(snapshot.fraction, 0.0);
    }

    #[test]
    fn test_speed_smoothing() {
        let board = ProgressBoard::new();
        let job_id = JobId::new();
        board.start(job_id);

        let first = board.update(job_id, 0.1, Some(1000.0), None).unwrap();
        assert_eq!(first.speed, Some(1000.0));

        // EMA with alpha 0.2: 0.2 * 2000 + 0.8 * 1000 = 1200
        let second = board.update(job_id, 0.2, Some(2000.0), None).unwrap();
        assert!((second.speed.unwrap() - 1200.0).abs() < 1e-6);

        // A report without speed keeps the previous smoothed value
        let third = board.update(job_id, 0.3, None, None).unwrap();
        assert_eq!(third.speed, second.speed);
    }

    #[test]
    fn test_complete_forces_full_fraction() {
        let board = ProgressBoard::new();
        let job_id = JobId::new();
        board.start(job_id);

        board.update(job_id, 0.42, None, None);
        let snapshot = board.complete(job_id).unwrap();
        assert_eq!(snapshot.fraction, 1.0);
        assert_eq!(snapshot.eta, Some(0));
    }

    #[test]
    fn test_untracked_job() {
        let board = ProgressBoard::new();
        assert!(board.update(JobId::new(), 0.5, None, None).is_none());
        assert!(board.snapshot(JobId::new()).is_none());
    }

    #[test]
    fn test_remove_stops_tracking() {
        let board = ProgressBoard::new();
        let job_id = JobId::new();
        board.start(job_id);
        board.update(job_id, 0.5, None, None);

        let last = board.remove(job_id).unwrap();
        assert_eq!(last.fraction, 0.5);
        assert!(board.snapshot(job_id).is_none());
    }
}
