//! Download worker
//!
//! A worker drives exactly one job through the external download capability,
//! forwarding progress into the shared board and onto the event channel, and
//! reporting a terminal status back to the queue manager. Failures carry the
//! underlying error message; nothing is retried here.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use crate::core::fetcher::{FetchError, MediaFetcher, ProgressCallback, ProgressReport};
use crate::core::manager::{DownloadEvent, EventSender};
use crate::core::models::{Job, JobId};
use crate::core::progress::ProgressBoard;

/// Terminal result of running one job
#[derive(Debug, Clone)]
pub enum TerminalStatus {
    Succeeded {
        output_path: PathBuf,
        title: Option<String>,
    },
    Failed {
        error: String,
    },
    /// The fetch was stopped through the interrupt hook (cancel path).
    Interrupted,
}

/// Executes jobs against a [`MediaFetcher`]
pub struct DownloadWorker {
    fetcher: Arc<dyn MediaFetcher>,
    progress: Arc<ProgressBoard>,
    events: EventSender,
}

impl DownloadWorker {
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        progress: Arc<ProgressBoard>,
        events: EventSender,
    ) -> Self {
        Self {
            fetcher,
            progress,
            events,
        }
    }

    /// Run a job to completion and return its terminal status.
    pub async fn run(&self, job: &Job) -> TerminalStatus {
        self.progress.start(job.id);

        let on_progress = self.progress_callback(job.id);

        match self
            .fetcher
            .fetch(job.id, &job.request, on_progress)
            .await
        {
            Ok(outcome) => {
                if let Some(snapshot) = self.progress.complete(job.id) {
                    let _ = self.events.send(DownloadEvent::JobProgress {
                        job_id: job.id,
                        progress: snapshot,
                    });
                }
                info!(
                    "Download completed: {} -> {}",
                    job.id,
                    outcome.file_path.display()
                );
                TerminalStatus::Succeeded {
                    output_path: outcome.file_path,
                    title: outcome.title,
                }
            }
            Err(FetchError::Interrupted) => {
                info!("Download interrupted: {}", job.id);
                TerminalStatus::Interrupted
            }
            Err(err) => {
                error!("Download failed: {} - {}", job.id, err);
                TerminalStatus::Failed {
                    error: err.to_string(),
                }
            }
        }
    }

    /// Callback that clamps progress on the board and emits progress events.
    fn progress_callback(&self, job_id: JobId) -> ProgressCallback {
        let board = Arc::clone(&self.progress);
        let events = self.events.clone();
        Arc::new(move |report: ProgressReport| {
            if let Some(snapshot) = board.update(job_id, report.fraction, report.speed, report.eta)
            {
                let _ = events.send(DownloadEvent::JobProgress {
                    job_id,
                    progress: snapshot,
                });
            }
        })
    }
}
