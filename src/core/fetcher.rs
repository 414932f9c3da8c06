//! External download capability seam
//!
//! The queue never talks to yt-dlp directly; workers drive a [`MediaFetcher`]
//! trait object so the download capability can be swapped out (and mocked in
//! tests). Interruption is best-effort and only available when the fetcher
//! reports an interrupt hook.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::core::models::{DownloadRequest, JobId};

/// One progress report from the capability, forwarded to the worker.
#[derive(Debug, Clone, Copy)]
pub struct ProgressReport {
    /// Completion fraction in [0, 1]
    pub fraction: f64,
    /// Instantaneous speed in bytes per second, when reported
    pub speed: Option<f64>,
    /// Estimated seconds to completion, when reported
    pub eta: Option<u64>,
}

/// Callback invoked for every progress report
pub type ProgressCallback = Arc<dyn Fn(ProgressReport) + Send + Sync>;

/// Result of a finished fetch
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// Path of the downloaded file
    pub file_path: PathBuf,
    /// Media title, when the capability resolved one
    pub title: Option<String>,
}

/// Errors surfaced by a fetcher
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("network failure: {0}")]
    Network(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    /// The fetch was stopped through the interrupt hook.
    #[error("download interrupted")]
    Interrupted,

    #[error("{0}")]
    Other(String),
}

pub type FetchResult<T> = Result<T, FetchError>;

/// External download capability: URL in, media file out.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Download one request, reporting progress along the way.
    async fn fetch(
        &self,
        job_id: JobId,
        request: &DownloadRequest,
        on_progress: ProgressCallback,
    ) -> FetchResult<FetchOutcome>;

    /// Whether [`MediaFetcher::interrupt`] can stop a running fetch.
    fn supports_interrupt(&self) -> bool {
        false
    }

    /// Signal a running fetch to stop. Returns true if a running fetch for
    /// the job was found and signalled.
    async fn interrupt(&self, job_id: JobId) -> bool {
        let _ = job_id;
        false
    }
}
