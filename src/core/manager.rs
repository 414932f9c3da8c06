//! Queue manager - core business logic for ordering and dispatching downloads
//!
//! The manager holds every known job, keeps the pending queue in submission
//! order and fills free worker slots whenever the queue or the pool changes.
//! All mutation happens on the runtime router task (see `core::runtime`), so
//! enqueue/cancel are serialized against the pool's read of the next job.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::config::DownloadConfig;
use crate::core::fetcher::MediaFetcher;
use crate::core::models::{
    AppError, AppResult, DownloadRequest, Job, JobId, JobStatus, MediaType, QueueStats,
};
use crate::core::progress::{ProgressBoard, ProgressSnapshot};
use crate::core::worker::{DownloadWorker, TerminalStatus};
use crate::utils::validation::is_valid_media_url;

/// Events emitted by the queue manager for the embedding surface
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum DownloadEvent {
    JobQueued {
        job_id: JobId,
        job: Job,
    },
    JobStarted {
        job_id: JobId,
    },
    JobProgress {
        job_id: JobId,
        progress: ProgressSnapshot,
    },
    JobSucceeded {
        job_id: JobId,
        output_path: String,
    },
    JobFailed {
        job_id: JobId,
        error: String,
    },
    JobCancelled {
        job_id: JobId,
    },
    StatsUpdated {
        stats: QueueStats,
    },
}

/// Channel for communication between the queue and the UI layer
pub type EventSender = mpsc::UnboundedSender<DownloadEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<DownloadEvent>;

/// Terminal report sent by a worker task back to the router
#[derive(Debug)]
pub struct WorkerReport {
    pub job_id: JobId,
    pub status: TerminalStatus,
}

pub type ReportSender = mpsc::UnboundedSender<WorkerReport>;
pub type ReportReceiver = mpsc::UnboundedReceiver<WorkerReport>;

/// Check a quality preference against the vocabulary for its media type.
pub fn validate_quality_preference(media_type: MediaType, preference: &str) -> AppResult<()> {
    match media_type {
        MediaType::Video => {
            if ["best", "720p", "1080p"].contains(&preference) {
                Ok(())
            } else {
                Err(AppError::UnsupportedFormat(format!(
                    "unknown video quality: {} (expected best, 720p or 1080p)",
                    preference
                )))
            }
        }
        MediaType::Audio => {
            if ["mp3", "m4a"].contains(&preference) {
                Ok(())
            } else {
                Err(AppError::UnsupportedFormat(format!(
                    "unknown audio format: {} (expected mp3 or m4a)",
                    preference
                )))
            }
        }
        MediaType::Subtitle => {
            if preference.trim().is_empty() {
                Err(AppError::UnsupportedFormat(
                    "subtitle language must not be empty".to_string(),
                ))
            } else {
                Ok(())
            }
        }
    }
}

/// Orders download requests and dispatches them to a bounded worker pool.
pub struct QueueManager {
    config: DownloadConfig,

    /// Every known job, keyed by id
    jobs: HashMap<JobId, Job>,

    /// Still-queued jobs in submission order
    pending: VecDeque<JobId>,

    /// Currently running jobs and their worker task handles
    active: HashMap<JobId, tokio::task::JoinHandle<()>>,

    /// Running jobs with a delivered interrupt; their terminal report is
    /// folded into a cancellation
    cancel_requested: HashSet<JobId>,

    event_sender: EventSender,

    report_sender: ReportSender,

    /// Limits concurrent downloads to the configured worker slots
    semaphore: Arc<tokio::sync::Semaphore>,

    fetcher: Arc<dyn MediaFetcher>,

    progress: Arc<ProgressBoard>,

    stats: QueueStats,

    next_seq: u64,
}

impl QueueManager {
    pub fn new(
        config: DownloadConfig,
        fetcher: Arc<dyn MediaFetcher>,
        event_sender: EventSender,
        report_sender: ReportSender,
    ) -> Self {
        let worker_slots = config.worker_slots.max(1);
        info!("Queue manager created with {} worker slot(s)", worker_slots);

        Self {
            config,
            jobs: HashMap::new(),
            pending: VecDeque::new(),
            active: HashMap::new(),
            cancel_requested: HashSet::new(),
            event_sender,
            report_sender,
            semaphore: Arc::new(tokio::sync::Semaphore::new(worker_slots)),
            fetcher,
            progress: Arc::new(ProgressBoard::new()),
            stats: QueueStats::default(),
            next_seq: 0,
        }
    }

    /// Append a request to the queue and fill free worker slots.
    pub fn enqueue(&mut self, request: DownloadRequest) -> AppResult<JobId> {
        self.enqueue_with_options(request, self.config.allow_duplicates)
    }

    /// Append a request, optionally allowing a URL that is already queued or
    /// running.
    pub fn enqueue_with_options(
        &mut self,
        request: DownloadRequest,
        allow_duplicates: bool,
    ) -> AppResult<JobId> {
        if !is_valid_media_url(&request.url) {
            return Err(AppError::InvalidUrl(request.url.clone()));
        }
        validate_quality_preference(request.media_type, &request.quality_preference)?;

        if !allow_duplicates && self.has_duplicate_url(&request.url) {
            return Err(AppError::Download(format!(
                "URL already queued or running: {}",
                request.url
            )));
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        let job = Job::new(seq, request);
        let job_id = job.id;

        info!(
            "Queued {} download {} ({})",
            job.request.media_type.as_str(),
            job_id,
            job.request.url
        );

        self.jobs.insert(job_id, job.clone());
        self.pending.push_back(job_id);

        let _ = self.event_sender.send(DownloadEvent::JobQueued { job_id, job });

        self.dispatch_pending();
        self.refresh_stats();
        Ok(job_id)
    }

    /// Whether a URL is already queued or running.
    pub fn has_duplicate_url(&self, url: &str) -> bool {
        self.jobs
            .values()
            .any(|job| !job.status.is_terminal() && job.request.url == url)
    }

    /// Cancel a job.
    ///
    /// A still-queued job is removed before it ever runs. A running job is
    /// signalled through the fetcher's interrupt hook; without one the call
    /// fails with `NotCancelable`. Unknown or terminal jobs return false.
    pub async fn cancel(&mut self, job_id: JobId) -> AppResult<bool> {
        if let Some(pos) = self.pending.iter().position(|id| *id == job_id) {
            self.pending.remove(pos);
            self.jobs.remove(&job_id);
            let _ = self
                .event_sender
                .send(DownloadEvent::JobCancelled { job_id });
            info!("Cancelled queued job {}", job_id);
            self.refresh_stats();
            return Ok(true);
        }

        if self.active.contains_key(&job_id) {
            if !self.fetcher.supports_interrupt() {
                return Err(AppError::NotCancelable(format!(
                    "job {} is already running and the downloader has no interrupt hook",
                    job_id
                )));
            }

            self.cancel_requested.insert(job_id);
            let delivered = self.fetcher.interrupt(job_id).await;
            if !delivered {
                // The fetch already finished; the pending report wins.
                debug!("Interrupt for job {} raced its completion", job_id);
            }
            info!("Requested cancellation of running job {}", job_id);
            return Ok(true);
        }

        Ok(false)
    }

    /// All known jobs in submission order, with live progress merged in.
    pub fn list_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.values().cloned().collect();
        for job in &mut jobs {
            self.merge_live_progress(job);
        }
        jobs.sort_by_key(|job| job.seq);
        jobs
    }

    /// Single-job lookup with live progress merged in.
    pub fn get_job(&self, job_id: JobId) -> Option<Job> {
        let mut job = self.jobs.get(&job_id).cloned()?;
        self.merge_live_progress(&mut job);
        Some(job)
    }

    /// Current aggregate statistics.
    pub fn stats(&self) -> QueueStats {
        self.stats.clone()
    }

    /// Drop succeeded jobs, returning how many were removed.
    pub fn clear_completed(&mut self) -> usize {
        let initial_count = self.jobs.len();
        self.jobs
            .retain(|_id, job| job.status != JobStatus::Succeeded);
        let removed = initial_count - self.jobs.len();
        if removed > 0 {
            info!("Cleared {} completed job(s)", removed);
            self.refresh_stats();
        }
        removed
    }

    /// Re-enqueue failed jobs at the back of the queue (user-initiated; the
    /// queue itself never retries).
    pub fn retry_failed(&mut self) -> usize {
        let mut retried: Vec<(u64, JobId)> = self
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Failed)
            .map(|job| (job.seq, job.id))
            .collect();
        retried.sort_by_key(|(seq, _)| *seq);

        for (_, job_id) in &retried {
            if let Some(job) = self.jobs.get_mut(job_id) {
                job.status = JobStatus::Queued;
                job.progress = 0.0;
                job.speed = None;
                job.eta = None;
                job.error_message = None;
                job.updated_at = chrono::Utc::now();
                self.pending.push_back(*job_id);
            }
        }

        let count = retried.len();
        if count > 0 {
            info!("Re-queued {} failed job(s)", count);
            self.dispatch_pending();
            self.refresh_stats();
        }
        count
    }

    /// Replace the configuration, resizing the worker pool when the slot
    /// count changed.
    pub fn update_config(&mut self, config: DownloadConfig) {
        let old_slots = self.config.worker_slots.max(1);
        let new_slots = config.worker_slots.max(1);
        self.config = config;

        if old_slots != new_slots {
            self.semaphore = Arc::new(tokio::sync::Semaphore::new(new_slots));
            info!("Updated worker slots: {} -> {}", old_slots, new_slots);
            self.dispatch_pending();
            self.refresh_stats();
        }
    }

    /// Abort active downloads and stop dispatching. Running jobs are marked
    /// failed; queued records stay queued but will not start.
    pub fn stop(&mut self) {
        let active: Vec<_> = self.active.drain().collect();
        for (job_id, handle) in active {
            handle.abort();
            self.progress.remove(job_id);
            self.cancel_requested.remove(&job_id);
            if let Some(job) = self.jobs.get_mut(&job_id) {
                job.status = JobStatus::Failed;
                job.error_message = Some("queue stopped before completion".to_string());
                job.updated_at = chrono::Utc::now();
                let _ = self.event_sender.send(DownloadEvent::JobFailed {
                    job_id,
                    error: "queue stopped before completion".to_string(),
                });
            }
        }
        self.pending.clear();
        self.refresh_stats();
        info!("Queue manager stopped");
    }

    /// Fold a worker's terminal report into the job table, then fill the
    /// freed slot.
    pub fn handle_report(&mut self, report: WorkerReport) {
        self.active.remove(&report.job_id);
        let was_cancelled = self.cancel_requested.remove(&report.job_id);
        let final_progress = self.progress.remove(report.job_id);

        match report.status {
            TerminalStatus::Succeeded { output_path, title } => {
                if let Some(job) = self.jobs.get_mut(&report.job_id) {
                    job.status = JobStatus::Succeeded;
                    job.progress = 1.0;
                    job.speed = None;
                    job.eta = None;
                    job.output_path = Some(output_path.clone());
                    if title.is_some() {
                        job.title = title;
                    }
                    job.updated_at = chrono::Utc::now();
                    let _ = self.event_sender.send(DownloadEvent::JobSucceeded {
                        job_id: report.job_id,
                        output_path: output_path.display().to_string(),
                    });
                }
            }
            TerminalStatus::Failed { error } => {
                if was_cancelled {
                    // The interrupt surfaced as a generic failure; honor the
                    // cancellation and drop the record.
                    self.jobs.remove(&report.job_id);
                    let _ = self.event_sender.send(DownloadEvent::JobCancelled {
                        job_id: report.job_id,
                    });
                } else if let Some(job) = self.jobs.get_mut(&report.job_id) {
                    job.status = JobStatus::Failed;
                    if let Some(snapshot) = final_progress {
                        job.progress = job.progress.max(snapshot.fraction);
                    }
                    job.speed = None;
                    job.eta = None;
                    job.error_message = Some(error.clone());
                    job.updated_at = chrono::Utc::now();
                    let _ = self.event_sender.send(DownloadEvent::JobFailed {
                        job_id: report.job_id,
                        error,
                    });
                }
            }
            TerminalStatus::Interrupted => {
                self.jobs.remove(&report.job_id);
                let _ = self.event_sender.send(DownloadEvent::JobCancelled {
                    job_id: report.job_id,
                });
            }
        }

        self.dispatch_pending();
        self.refresh_stats();
    }

    /// Start queued jobs while worker slots are free, in submission order.
    fn dispatch_pending(&mut self) {
        loop {
            let Some(&job_id) = self.pending.front() else {
                break;
            };

            let permit = match Arc::clone(&self.semaphore).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => break,
            };

            self.pending.pop_front();

            let Some(job) = self.jobs.get_mut(&job_id) else {
                continue;
            };

            job.status = JobStatus::Running;
            job.updated_at = chrono::Utc::now();
            let job_snapshot = job.clone();

            let _ = self
                .event_sender
                .send(DownloadEvent::JobStarted { job_id });

            let worker = DownloadWorker::new(
                Arc::clone(&self.fetcher),
                Arc::clone(&self.progress),
                self.event_sender.clone(),
            );
            let reports = self.report_sender.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let status = worker.run(&job_snapshot).await;
                if reports
                    .send(WorkerReport {
                        job_id: job_snapshot.id,
                        status,
                    })
                    .is_err()
                {
                    warn!("Queue router gone, dropping report for {}", job_snapshot.id);
                }
            });

            self.active.insert(job_id, handle);
            debug!("Dispatched job {}", job_id);
        }
    }

    fn merge_live_progress(&self, job: &mut Job) {
        if job.status == JobStatus::Running {
            if let Some(snapshot) = self.progress.snapshot(job.id) {
                job.progress = job.progress.max(snapshot.fraction);
                job.speed = snapshot.speed;
                job.eta = snapshot.eta;
            }
        }
    }

    fn refresh_stats(&mut self) {
        let running_speeds: Vec<f64> = self
            .active
            .keys()
            .filter_map(|job_id| self.progress.snapshot(*job_id))
            .filter_map(|snapshot| snapshot.speed)
            .collect();

        self.stats = QueueStats {
            total_jobs: self.jobs.len(),
            queued_jobs: self.pending.len(),
            active_jobs: self.active.len(),
            succeeded_jobs: self
                .jobs
                .values()
                .filter(|job| job.status == JobStatus::Succeeded)
                .count(),
            failed_jobs: self
                .jobs
                .values()
                .filter(|job| job.status == JobStatus::Failed)
                .count(),
            average_speed: if running_speeds.is_empty() {
                0.0
            } else {
                running_speeds.iter().sum::<f64>() / running_speeds.len() as f64
            },
        };

        let _ = self.event_sender.send(DownloadEvent::StatsUpdated {
            stats: self.stats.clone(),
        });
    }
}
