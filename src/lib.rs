//! tubedl - Core Library
//!
//! This library provides the core functionality for the YouTube media
//! downloader: queue management, the worker pool, the yt-dlp fetcher and the
//! configuration layer. The CLI in `main.rs` (and any GUI surface) sits on
//! top of the [`QueueHandle`] it exposes.

pub mod core;
pub mod utils;

// Re-export commonly used types
pub use crate::core::{
    config::{AppConfig, DownloadConfig, YoutubeConfig},
    fetcher::{FetchError, FetchOutcome, MediaFetcher, ProgressCallback, ProgressReport},
    manager::{DownloadEvent, EventReceiver, QueueManager},
    models::{
        AppError, AppResult, DownloadRequest, Job, JobId, JobStatus, MediaType, QueueStats,
    },
    progress::ProgressSnapshot,
    runtime::{spawn_queue_runtime, QueueHandle},
    worker::{DownloadWorker, TerminalStatus},
    ytdlp::{YtDlpConfig, YtDlpFetcher},
};

use std::sync::Arc;

/// Application state shared between the CLI and the queue runtime
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub queue: QueueHandle,
}

impl AppState {
    /// Build the full stack from a configuration: a yt-dlp fetcher plus the
    /// queue runtime. Returns the state and the event stream for the surface.
    pub fn with_config(config: AppConfig) -> (Self, EventReceiver) {
        let fetcher = Arc::new(YtDlpFetcher::new(YtDlpConfig::from(&config)));
        let (queue, events) = spawn_queue_runtime(config.download.clone(), fetcher);
        (Self { config, queue }, events)
    }

    /// Build the stack with the configuration loaded from disk, falling back
    /// to defaults when the stored file is missing or invalid.
    pub fn new() -> (Self, EventReceiver) {
        Self::with_config(Self::load_or_initialize_config())
    }

    fn load_or_initialize_config() -> AppConfig {
        match AppConfig::load() {
            Ok(cfg) => {
                if let Err(err) = cfg.validate() {
                    tracing::warn!(
                        "Invalid configuration detected ({}), falling back to defaults",
                        err
                    );
                    let default_cfg = AppConfig::default();
                    if let Err(save_err) = default_cfg.save() {
                        tracing::warn!("Failed to persist default configuration: {}", save_err);
                    }
                    default_cfg
                } else {
                    cfg
                }
            }
            Err(err) => {
                tracing::warn!(
                    "Failed to load configuration from disk: {}. Using defaults",
                    err
                );
                AppConfig::default()
            }
        }
    }
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize the library with default settings
pub fn init() {
    utils::logging::init_tracing();
    tracing::info!("{} v{} initialized", NAME, VERSION);
}
