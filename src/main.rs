//! tubedl command line interface
//!
//! Enqueues one or more YouTube URLs and renders queue events until every
//! submitted job reaches a terminal state.

use std::collections::HashMap;
use std::env;
use std::process::ExitCode;

use tubedl::{AppConfig, AppState, DownloadEvent, DownloadRequest, JobId, MediaType};

struct CliArgs {
    media_type: MediaType,
    urls: Vec<String>,
    quality: Option<String>,
    destination: Option<String>,
    workers: Option<usize>,
}

impl CliArgs {
    fn parse(args: &[String]) -> Result<Self, String> {
        let mut media_type: Option<MediaType> = None;
        let mut urls = Vec::new();
        let mut quality = None;
        let mut destination = None;
        let mut workers = None;

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--quality" => {
                    quality = Some(
                        iter.next()
                            .ok_or("--quality requires a value")?
                            .to_string(),
                    );
                }
                "--dest" => {
                    destination = Some(
                        iter.next().ok_or("--dest requires a value")?.to_string(),
                    );
                }
                "--workers" => {
                    let value = iter.next().ok_or("--workers requires a value")?;
                    workers = Some(
                        value
                            .parse::<usize>()
                            .map_err(|_| format!("invalid worker count: {}", value))?,
                    );
                }
                flag if flag.starts_with("--") => {
                    return Err(format!("unknown flag: {}", flag));
                }
                positional => {
                    if media_type.is_none() {
                        media_type = Some(
                            MediaType::parse(positional)
                                .ok_or_else(|| format!("unknown media type: {}", positional))?,
                        );
                    } else {
                        urls.push(positional.to_string());
                    }
                }
            }
        }

        let media_type = media_type.ok_or("missing media type")?;
        if urls.is_empty() {
            return Err("at least one URL is required".to_string());
        }

        Ok(Self {
            media_type,
            urls,
            quality,
            destination,
            workers,
        })
    }
}

fn print_usage() {
    eprintln!(
        "Usage: tubedl <video|audio|subtitle> <url> [url...] \
         [--quality <best|720p|1080p|mp3|m4a|lang>] [--dest <dir>] [--workers <n>]"
    );
}

fn default_quality(config: &AppConfig, media_type: MediaType) -> String {
    match media_type {
        MediaType::Video => config.youtube.default_video_quality.clone(),
        MediaType::Audio => config.youtube.default_audio_format.clone(),
        MediaType::Subtitle => config.youtube.default_subtitle_language.clone(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tubedl::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let cli = match CliArgs::parse(&args) {
        Ok(cli) => cli,
        Err(message) => {
            eprintln!("Error: {}", message);
            print_usage();
            return ExitCode::from(1);
        }
    };

    let mut config = AppConfig::load().unwrap_or_else(|err| {
        tracing::warn!("Failed to load configuration: {}. Using defaults", err);
        AppConfig::default()
    });
    if let Some(workers) = cli.workers {
        config.download.worker_slots = workers;
    }
    if let Some(destination) = &cli.destination {
        config.download.output_directory = destination.clone();
    }
    if let Err(err) = config.validate() {
        eprintln!("Error: {}", err);
        return ExitCode::from(1);
    }

    let quality = cli
        .quality
        .clone()
        .unwrap_or_else(|| default_quality(&config, cli.media_type));

    let (state, mut events) = AppState::with_config(config.clone());

    let mut labels: HashMap<JobId, String> = HashMap::new();
    let mut enqueue_failures = 0usize;

    for url in &cli.urls {
        let request = DownloadRequest::new(
            url.clone(),
            cli.media_type,
            quality.clone(),
            config.download.output_directory.clone(),
        );
        match state.queue.enqueue(request).await {
            Ok(job_id) => {
                labels.insert(job_id, url.clone());
            }
            Err(err) => {
                eprintln!("Failed to enqueue {}: {}", url, err);
                enqueue_failures += 1;
            }
        }
    }

    if labels.is_empty() {
        return ExitCode::from(1);
    }

    let submitted = labels.len();
    let mut finished = 0usize;
    let mut failed = enqueue_failures;
    // Last printed decile per job, to keep progress output readable
    let mut printed_decile: HashMap<JobId, u8> = HashMap::new();

    while finished < submitted {
        let Some(event) = events.recv().await else {
            break;
        };

        match event {
            DownloadEvent::JobStarted { job_id } => {
                if let Some(url) = labels.get(&job_id) {
                    println!("Downloading {}", url);
                }
            }
            DownloadEvent::JobProgress { job_id, progress } => {
                let decile = (progress.fraction * 10.0) as u8;
                if printed_decile.get(&job_id).copied().unwrap_or(0) < decile {
                    printed_decile.insert(job_id, decile);
                    let speed = progress
                        .speed
                        .map(|s| format!(" at {:.1} MiB/s", s / 1024.0 / 1024.0))
                        .unwrap_or_default();
                    let eta = progress
                        .eta
                        .map(|e| format!(", {}s left", e))
                        .unwrap_or_default();
                    println!("  {:>3.0}%{}{}", progress.fraction * 100.0, speed, eta);
                }
            }
            DownloadEvent::JobSucceeded {
                job_id,
                output_path,
            } => {
                finished += 1;
                if let Some(url) = labels.get(&job_id) {
                    println!("Done: {} -> {}", url, output_path);
                }
            }
            DownloadEvent::JobFailed { job_id, error } => {
                finished += 1;
                failed += 1;
                if let Some(url) = labels.get(&job_id) {
                    eprintln!("Failed: {} ({})", url, error);
                }
            }
            DownloadEvent::JobCancelled { job_id } => {
                if labels.contains_key(&job_id) {
                    finished += 1;
                }
            }
            DownloadEvent::JobQueued { .. } | DownloadEvent::StatsUpdated { .. } => {}
        }
    }

    let _ = state.queue.shutdown().await;

    if failed > 0 {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}
