//! Core data models for the download queue

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Kind of media a request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Audio,
    Subtitle,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Subtitle => "subtitle",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "video" => Some(MediaType::Video),
            "audio" => Some(MediaType::Audio),
            "subtitle" | "subtitles" => Some(MediaType::Subtitle),
            _ => None,
        }
    }
}

/// One download request as submitted by the user.
///
/// Immutable once enqueued. The quality preference is interpreted per media
/// type: a resolution cap for video (`best`/`720p`/`1080p`), an audio codec
/// for audio (`mp3`/`m4a`), a subtitle language tag for subtitles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    pub media_type: MediaType,
    pub quality_preference: String,
    pub destination_path: String,
}

impl DownloadRequest {
    pub fn new(
        url: impl Into<String>,
        media_type: MediaType,
        quality_preference: impl Into<String>,
        destination_path: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            media_type,
            quality_preference: quality_preference.into(),
            destination_path: destination_path.into(),
        }
    }
}

/// Job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Job status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// Terminal states are immutable once reached.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// A download request tracked through its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Submission order, assigned by the queue manager
    pub seq: u64,
    pub request: DownloadRequest,
    pub status: JobStatus,
    /// Fraction in [0, 1], non-decreasing until terminal
    pub progress: f64,
    /// Download speed in bytes per second, when known
    pub speed: Option<f64>,
    /// Estimated seconds to completion, when known
    pub eta: Option<u64>,
    /// Resolved media title, filled in on success
    pub title: Option<String>,
    /// Final file path, filled in on success
    pub output_path: Option<PathBuf>,
    pub error_message: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Job {
    pub fn new(seq: u64, request: DownloadRequest) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: JobId::new(),
            seq,
            request,
            status: JobStatus::Queued,
            progress: 0.0,
            speed: None,
            eta: None,
            title: None,
            output_path: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Aggregate queue statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub total_jobs: usize,
    pub queued_jobs: usize,
    pub active_jobs: usize,
    pub succeeded_jobs: usize,
    pub failed_jobs: usize,
    /// Mean speed across running jobs, bytes per second
    pub average_speed: f64,
}

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Network failure: {0}")]
    Network(String),

    #[error("Job cannot be cancelled: {0}")]
    NotCancelable(String),

    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Download error: {0}")]
    Download(String),
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_round_trip() {
        for media_type in [MediaType::Video, MediaType::Audio, MediaType::Subtitle] {
            assert_eq!(MediaType::parse(media_type.as_str()), Some(media_type));
        }
        assert_eq!(MediaType::parse("playlist"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_new_job_defaults() {
        let request = DownloadRequest::new(
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            MediaType::Video,
            "best",
            "./downloads",
        );
        let job = Job::new(0, request);

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0.0);
        assert!(job.error_message.is_none());
        assert!(job.output_path.is_none());
    }
}
