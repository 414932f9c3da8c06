//! yt-dlp backed media fetcher
//!
//! Drives the external `yt-dlp` binary with `tokio::process`, translating the
//! queue's requests into yt-dlp invocations: format selection per media type,
//! `--newline` progress lines parsed into progress reports, `--dump-json`
//! metadata for subtitle language resolution, and process kill as the
//! interrupt hook.

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::core::config::AppConfig;
use crate::core::fetcher::{
    FetchError, FetchOutcome, FetchResult, MediaFetcher, ProgressCallback, ProgressReport,
};
use crate::core::models::{DownloadRequest, JobId, MediaType};
use crate::utils::file_utils::{ensure_dir_exists, sanitize_filename};

/// Subtitle language codes tried for a Chinese request, in preference order
const CHINESE_SUBTITLE_CODES: [&str; 5] = ["zh", "zh-CN", "zh-Hans", "zh-Hant", "zh-TW"];

/// Fetcher configuration
#[derive(Debug, Clone)]
pub struct YtDlpConfig {
    /// Name or path of the yt-dlp binary
    pub binary_path: String,
    /// Wall-clock limit for one download
    pub download_timeout: Duration,
    /// Wall-clock limit for a metadata query
    pub metadata_timeout: Duration,
    /// Fetch the video thumbnail next to a finished video download
    pub download_thumbnail: bool,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            binary_path: "yt-dlp".to_string(),
            download_timeout: Duration::from_secs(3600),
            metadata_timeout: Duration::from_secs(30),
            download_thumbnail: false,
        }
    }
}

impl From<&AppConfig> for YtDlpConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            binary_path: config.youtube.binary_path.clone(),
            download_timeout: Duration::from_secs(config.download.timeout_seconds),
            metadata_timeout: Duration::from_secs(30),
            download_thumbnail: config.youtube.download_thumbnail,
        }
    }
}

/// Subset of `yt-dlp --dump-json` output the fetcher cares about
#[derive(Debug, Clone, Deserialize)]
pub struct VideoMetadata {
    pub id: Option<String>,
    pub title: Option<String>,
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub subtitles: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub automatic_captions: HashMap<String, serde_json::Value>,
}

impl VideoMetadata {
    /// Manual and automatic subtitle languages, deduplicated and sorted.
    pub fn available_subtitle_languages(&self) -> Vec<String> {
        let mut languages: Vec<String> = self
            .subtitles
            .keys()
            .chain(self.automatic_captions.keys())
            .cloned()
            .collect();
        languages.sort();
        languages.dedup();
        languages
    }
}

/// Validate if URL is a YouTube URL
pub fn is_youtube_url(url: &str) -> bool {
    url.contains("youtube.com") || url.contains("youtu.be") || url.contains("m.youtube.com")
}

/// yt-dlp format spec for a video quality preference
pub fn video_format_spec(preference: &str) -> Option<&'static str> {
    match preference {
        "best" => Some("bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best"),
        "720p" => {
            Some("bestvideo[height<=720][ext=mp4]+bestaudio[ext=m4a]/best[height<=720][ext=mp4]/best")
        }
        "1080p" => Some(
            "bestvideo[height<=1080][ext=mp4]+bestaudio[ext=m4a]/best[height<=1080][ext=mp4]/best",
        ),
        _ => None,
    }
}

/// Output template placing `%(title)s.%(ext)s` in the destination directory
pub fn output_template(destination: &str) -> String {
    Path::new(destination)
        .join("%(title)s.%(ext)s")
        .to_string_lossy()
        .into_owned()
}

/// Build the yt-dlp argument vector for one request.
///
/// `subtitle_language` is the resolved language for subtitle requests; other
/// media types ignore it.
pub fn build_args(
    request: &DownloadRequest,
    subtitle_language: Option<&str>,
) -> FetchResult<Vec<String>> {
    let mut args: Vec<String> = vec!["--newline".to_string(), "--no-warnings".to_string()];

    match request.media_type {
        MediaType::Video => {
            let spec = video_format_spec(&request.quality_preference).ok_or_else(|| {
                FetchError::UnsupportedFormat(format!(
                    "unknown video quality: {}",
                    request.quality_preference
                ))
            })?;
            args.push("-f".to_string());
            args.push(spec.to_string());
        }
        MediaType::Audio => {
            args.extend(
                [
                    "-f",
                    "bestaudio/best",
                    "-x",
                    "--audio-format",
                    request.quality_preference.as_str(),
                    "--audio-quality",
                    "192K",
                ]
                .map(str::to_string),
            );
        }
        MediaType::Subtitle => {
            let language = subtitle_language.unwrap_or(&request.quality_preference);
            args.extend(
                [
                    "--skip-download",
                    "--write-subs",
                    "--write-auto-subs",
                    "--sub-langs",
                    language,
                    "--sub-format",
                    "vtt",
                ]
                .map(str::to_string),
            );
        }
    }

    args.push("-o".to_string());
    args.push(output_template(&request.destination_path));
    args.push(request.url.clone());
    Ok(args)
}

fn progress_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\[download\]\s+(?P<pct>\d+(?:\.\d+)?)%(?:\s+of\s+~?\S+)?(?:\s+at\s+(?P<speed>\S+))?(?:\s+ETA\s+(?P<eta>[\d:]+))?",
        )
        .expect("valid progress regex")
    })
}

/// Parse one `--newline` progress line, e.g.
/// `[download]  45.3% of 10.00MiB at 2.50MiB/s ETA 00:02`.
pub fn parse_progress_line(line: &str) -> Option<ProgressReport> {
    let captures = progress_regex().captures(line)?;
    let percent: f64 = captures.name("pct")?.as_str().parse().ok()?;

    Some(ProgressReport {
        fraction: (percent / 100.0).clamp(0.0, 1.0),
        speed: captures.name("speed").and_then(|m| parse_rate(m.as_str())),
        eta: captures.name("eta").and_then(|m| parse_eta(m.as_str())),
    })
}

/// Parse a yt-dlp rate like `2.50MiB/s` into bytes per second.
pub fn parse_rate(value: &str) -> Option<f64> {
    let value = value.trim().strip_suffix("/s")?;
    let split = value.find(|c: char| c.is_ascii_alphabetic())?;
    let (number, unit) = value.split_at(split);
    let number: f64 = number.parse().ok()?;

    let multiplier = match unit {
        "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        _ => return None,
    };

    Some(number * multiplier)
}

/// Parse a yt-dlp ETA like `00:12` or `1:02:03` into seconds.
pub fn parse_eta(value: &str) -> Option<u64> {
    let mut seconds: u64 = 0;
    for part in value.split(':') {
        let part: u64 = part.parse().ok()?;
        seconds = seconds * 60 + part;
    }
    Some(seconds)
}

/// Extract the output path announced on a yt-dlp stdout line.
pub fn parse_destination_line(line: &str) -> Option<PathBuf> {
    if let Some(rest) = line.strip_prefix("[download] Destination: ") {
        return Some(PathBuf::from(rest.trim()));
    }
    if let Some(rest) = line.strip_prefix("[ExtractAudio] Destination: ") {
        return Some(PathBuf::from(rest.trim()));
    }
    if let Some(rest) = line.strip_prefix("[Merger] Merging formats into \"") {
        return Some(PathBuf::from(rest.trim_end().trim_end_matches('"')));
    }
    if let Some(rest) = line.strip_prefix("[info] Writing video subtitles to: ") {
        return Some(PathBuf::from(rest.trim()));
    }
    if let Some(rest) = line.strip_prefix("[download] ") {
        if let Some(path) = rest.strip_suffix(" has already been downloaded") {
            return Some(PathBuf::from(path.trim()));
        }
    }
    None
}

/// Map yt-dlp stderr output onto the fetch error taxonomy.
pub fn classify_failure(stderr: &str) -> FetchError {
    let lower = stderr.to_lowercase();
    let message = last_error_line(stderr);

    if lower.contains("is not a valid url") {
        return FetchError::InvalidUrl(message);
    }
    if lower.contains("unsupported url") || lower.contains("requested format is not available") {
        return FetchError::UnsupportedFormat(message);
    }
    if [
        "unable to download",
        "connection",
        "timed out",
        "temporary failure in name resolution",
        "getaddrinfo",
        "network",
    ]
    .iter()
    .any(|pattern| lower.contains(pattern))
    {
        return FetchError::Network(message);
    }
    if lower.contains("no space left")
        || lower.contains("permission denied")
        || lower.contains("unable to open for writing")
    {
        return FetchError::Filesystem(message);
    }

    FetchError::Other(message)
}

fn last_error_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("yt-dlp exited with an error")
        .to_string()
}

/// Pick the subtitle language to request, following the original fallback
/// rules: Chinese requests walk the regional variants, anything missing falls
/// back to English.
pub fn resolve_subtitle_language(preferred: &str, available: &[String]) -> Option<String> {
    let has = |code: &str| available.iter().any(|language| language == code);

    if preferred.starts_with("zh") {
        for code in CHINESE_SUBTITLE_CODES {
            if has(code) {
                return Some(code.to_string());
            }
        }
    } else if has(preferred) {
        return Some(preferred.to_string());
    }

    if has("en") {
        return Some("en".to_string());
    }
    None
}

/// [`MediaFetcher`] implementation backed by the yt-dlp binary
pub struct YtDlpFetcher {
    config: YtDlpConfig,
    http: reqwest::Client,
    /// Interrupt handles for in-flight downloads
    interrupts: DashMap<JobId, Arc<Notify>>,
}

impl YtDlpFetcher {
    pub fn new(config: YtDlpConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            interrupts: DashMap::new(),
        }
    }

    /// Query video metadata without downloading anything.
    pub async fn fetch_metadata(&self, url: &str) -> FetchResult<VideoMetadata> {
        debug!("Fetching metadata for {}", url);

        let output = timeout(
            self.config.metadata_timeout,
            Command::new(&self.config.binary_path)
                .args(["--dump-json", "--no-warnings", url])
                .stdin(Stdio::null())
                .output(),
        )
        .await
        .map_err(|_| FetchError::Network(format!("metadata query timed out for {}", url)))?
        .map_err(|e| {
            FetchError::Filesystem(format!(
                "failed to launch {}: {}",
                self.config.binary_path, e
            ))
        })?;

        if !output.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| FetchError::Other("empty metadata output".to_string()))?;

        serde_json::from_str(line)
            .map_err(|e| FetchError::Other(format!("failed to parse yt-dlp metadata: {}", e)))
    }

    /// Run one yt-dlp invocation, streaming progress. Returns the output path
    /// announced on stdout, when any.
    async fn execute(
        &self,
        args: &[String],
        on_progress: &ProgressCallback,
        interrupt: &Notify,
    ) -> FetchResult<Option<PathBuf>> {
        debug!("Launching {} {:?}", self.config.binary_path, args);

        let mut child = Command::new(&self.config.binary_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                FetchError::Filesystem(format!(
                    "failed to launch {}: {}",
                    self.config.binary_path, e
                ))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FetchError::Other("yt-dlp stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| FetchError::Other("yt-dlp stderr unavailable".to_string()))?;

        // Drain stderr concurrently so a chatty process cannot block on a
        // full pipe while we read stdout.
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push_str(&line);
                collected.push('\n');
            }
            collected
        });

        let deadline = tokio::time::sleep(self.config.download_timeout);
        tokio::pin!(deadline);

        let mut lines = BufReader::new(stdout).lines();
        let mut destination: Option<PathBuf> = None;

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(report) = parse_progress_line(&line) {
                            on_progress(report);
                        }
                        if let Some(path) = parse_destination_line(&line) {
                            destination = Some(path);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                        return Err(FetchError::Other(format!(
                            "failed reading yt-dlp output: {}",
                            e
                        )));
                    }
                },
                _ = interrupt.notified() => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return Err(FetchError::Interrupted);
                }
                _ = &mut deadline => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return Err(FetchError::Network(format!(
                        "download timed out after {}s",
                        self.config.download_timeout.as_secs()
                    )));
                }
            }
        }

        let status = tokio::select! {
            status = child.wait() => status
                .map_err(|e| FetchError::Other(format!("failed to await yt-dlp: {}", e)))?,
            _ = interrupt.notified() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(FetchError::Interrupted);
            }
            _ = &mut deadline => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(FetchError::Network(format!(
                    "download timed out after {}s",
                    self.config.download_timeout.as_secs()
                )));
            }
        };

        let stderr_text = stderr_task.await.unwrap_or_default();

        if status.success() {
            Ok(destination)
        } else {
            Err(classify_failure(&stderr_text))
        }
    }

    /// Locate the subtitle file yt-dlp wrote when stdout did not announce it.
    async fn find_subtitle_file(&self, dir: &Path, language: &str) -> FetchResult<PathBuf> {
        let suffix = format!(".{}.vtt", language);
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| FetchError::Filesystem(e.to_string()))?;

        let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FetchError::Filesystem(e.to_string()))?
        {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if !name.ends_with(&suffix) {
                continue;
            }
            let modified = entry
                .metadata()
                .await
                .ok()
                .and_then(|metadata| metadata.modified().ok())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            if newest
                .as_ref()
                .map_or(true, |(time, _)| modified >= *time)
            {
                newest = Some((modified, path));
            }
        }

        newest.map(|(_, path)| path).ok_or_else(|| {
            FetchError::Other(format!(
                "no {} subtitle file found after download",
                language
            ))
        })
    }

    /// Fetch the thumbnail image next to the downloaded media.
    async fn download_thumbnail(
        &self,
        url: &str,
        dest_dir: &Path,
        title: Option<&str>,
    ) -> FetchResult<PathBuf> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::Network(format!(
                "thumbnail request returned {}",
                response.status()
            )));
        }

        let clean_url = url
            .split(|c| c == '?' || c == '#')
            .next()
            .unwrap_or(url);
        let extension = Path::new(clean_url)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("jpg");
        let file_name = format!("{}.{}", sanitize_filename(title.unwrap_or("thumbnail")), extension);
        let path = dest_dir.join(file_name);

        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| FetchError::Filesystem(e.to_string()))?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk: bytes::Bytes = chunk.map_err(|e| FetchError::Network(e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| FetchError::Filesystem(e.to_string()))?;
        }
        file.flush()
            .await
            .map_err(|e| FetchError::Filesystem(e.to_string()))?;

        info!("Saved thumbnail to {}", path.display());
        Ok(path)
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn fetch(
        &self,
        job_id: JobId,
        request: &DownloadRequest,
        on_progress: ProgressCallback,
    ) -> FetchResult<FetchOutcome> {
        if !is_youtube_url(&request.url) {
            return Err(FetchError::InvalidUrl(format!(
                "not a YouTube URL: {}",
                request.url
            )));
        }

        let dest_dir = PathBuf::from(&request.destination_path);
        ensure_dir_exists(&dest_dir).map_err(|e| FetchError::Filesystem(e.to_string()))?;

        let mut metadata: Option<VideoMetadata> = None;
        let mut resolved_language: Option<String> = None;

        match request.media_type {
            MediaType::Subtitle => {
                let meta = self.fetch_metadata(&request.url).await?;
                let available = meta.available_subtitle_languages();
                let language = resolve_subtitle_language(&request.quality_preference, &available)
                    .ok_or_else(|| {
                        FetchError::UnsupportedFormat(format!(
                            "video has neither {} nor en subtitles",
                            request.quality_preference
                        ))
                    })?;
                info!(
                    "Resolved subtitle language {} -> {} for {}",
                    request.quality_preference, language, request.url
                );
                resolved_language = Some(language);
                metadata = Some(meta);
            }
            MediaType::Video if self.config.download_thumbnail => {
                match self.fetch_metadata(&request.url).await {
                    Ok(meta) => metadata = Some(meta),
                    Err(err) => warn!("Metadata query failed, skipping thumbnail: {}", err),
                }
            }
            _ => {}
        }

        let args = build_args(request, resolved_language.as_deref())?;

        let interrupt = Arc::new(Notify::new());
        self.interrupts.insert(job_id, Arc::clone(&interrupt));
        let result = self.execute(&args, &on_progress, &interrupt).await;
        self.interrupts.remove(&job_id);
        let destination = result?;

        let output_path = match request.media_type {
            MediaType::Subtitle => match destination {
                Some(path) => path,
                None => {
                    let language = resolved_language.as_deref().unwrap_or("en");
                    self.find_subtitle_file(&dest_dir, language).await?
                }
            },
            _ => destination.ok_or_else(|| {
                FetchError::Other("yt-dlp did not report an output file".to_string())
            })?,
        };

        if request.media_type == MediaType::Video && self.config.download_thumbnail {
            if let Some(meta) = &metadata {
                if let Some(thumbnail_url) = &meta.thumbnail {
                    if let Err(err) = self
                        .download_thumbnail(thumbnail_url, &dest_dir, meta.title.as_deref())
                        .await
                    {
                        warn!("Thumbnail download failed: {}", err);
                    }
                }
            }
        }

        let title = metadata
            .as_ref()
            .and_then(|meta| meta.title.clone())
            .or_else(|| {
                output_path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
            });

        Ok(FetchOutcome {
            file_path: output_path,
            title,
        })
    }

    fn supports_interrupt(&self) -> bool {
        true
    }

    async fn interrupt(&self, job_id: JobId) -> bool {
        match self.interrupts.get(&job_id) {
            Some(notify) => {
                notify.notify_one();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::DownloadRequest;

    fn video_request(quality: &str) -> DownloadRequest {
        DownloadRequest::new(
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            MediaType::Video,
            quality,
            "downloads",
        )
    }

    #[test]
    fn test_is_youtube_url() {
        assert!(is_youtube_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(is_youtube_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(is_youtube_url("https://m.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(!is_youtube_url("https://example.com/video"));
    }

    #[test]
    fn test_video_format_specs() {
        assert_eq!(
            video_format_spec("best"),
            Some("bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best")
        );
        assert!(video_format_spec("720p").unwrap().contains("height<=720"));
        assert!(video_format_spec("1080p").unwrap().contains("height<=1080"));
        assert_eq!(video_format_spec("480p"), None);
    }

    #[test]
    fn test_build_video_args() {
        let args = build_args(&video_request("720p"), None).unwrap();

        assert!(args.contains(&"--newline".to_string()));
        assert!(args.contains(&"-f".to_string()));
        assert!(args.iter().any(|arg| arg.contains("height<=720")));
        assert_eq!(args.last().unwrap(), "https://www.youtube.com/watch?v=dQw4w9WgXcQ");

        let template_pos = args.iter().position(|arg| arg == "-o").unwrap();
        assert!(args[template_pos + 1].ends_with("%(title)s.%(ext)s"));
    }

    #[test]
    fn test_build_video_args_rejects_unknown_quality() {
        let result = build_args(&video_request("480p"), None);
        assert!(matches!(result, Err(FetchError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_build_audio_args() {
        let request = DownloadRequest::new(
            "https://youtu.be/dQw4w9WgXcQ",
            MediaType::Audio,
            "mp3",
            "downloads",
        );
        let args = build_args(&request, None).unwrap();

        assert!(args.contains(&"-x".to_string()));
        assert!(args.contains(&"--audio-format".to_string()));
        assert!(args.contains(&"mp3".to_string()));
        assert!(args.contains(&"192K".to_string()));
    }

    #[test]
    fn test_build_subtitle_args_use_resolved_language() {
        let request = DownloadRequest::new(
            "https://youtu.be/dQw4w9WgXcQ",
            MediaType::Subtitle,
            "zh-CN",
            "downloads",
        );
        let args = build_args(&request, Some("zh-Hans")).unwrap();

        assert!(args.contains(&"--skip-download".to_string()));
        assert!(args.contains(&"--write-auto-subs".to_string()));
        assert!(args.contains(&"zh-Hans".to_string()));
        assert!(!args.contains(&"zh-CN".to_string()));
    }

    #[test]
    fn test_parse_progress_line() {
        let report =
            parse_progress_line("[download]  45.3% of 10.00MiB at 2.50MiB/s ETA 00:02").unwrap();
        assert!((report.fraction - 0.453).abs() < 1e-9);
        assert!((report.speed.unwrap() - 2.5 * 1024.0 * 1024.0).abs() < 1.0);
        assert_eq!(report.eta, Some(2));

        let report = parse_progress_line("[download] 100% of 10.00MiB in 00:05").unwrap();
        assert_eq!(report.fraction, 1.0);
        assert_eq!(report.speed, None);
        assert_eq!(report.eta, None);

        let report = parse_progress_line(
            "[download]   0.0% of ~119.77MiB at  510.66KiB/s ETA 04:00 (frag 0/241)",
        );
        assert!(report.is_some());

        assert!(parse_progress_line("[info] Downloading format 22").is_none());
        assert!(parse_progress_line("plain text").is_none());
    }

    #[test]
    fn test_parse_progress_line_unknown_speed() {
        let report =
            parse_progress_line("[download]  10.0% of 10.00MiB at Unknown B/s ETA Unknown")
                .unwrap();
        assert!((report.fraction - 0.1).abs() < 1e-9);
        assert_eq!(report.speed, None);
        assert_eq!(report.eta, None);
    }

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate("512B/s"), Some(512.0));
        assert_eq!(parse_rate("1KiB/s"), Some(1024.0));
        assert_eq!(parse_rate("2.5MiB/s"), Some(2.5 * 1024.0 * 1024.0));
        assert_eq!(parse_rate("1MB/s"), Some(1e6));
        assert_eq!(parse_rate("Unknown"), None);
        assert_eq!(parse_rate("12.3"), None);
    }

    #[test]
    fn test_parse_eta() {
        assert_eq!(parse_eta("07"), Some(7));
        assert_eq!(parse_eta("00:12"), Some(12));
        assert_eq!(parse_eta("02:30"), Some(150));
        assert_eq!(parse_eta("1:02:03"), Some(3723));
        assert_eq!(parse_eta("Unknown"), None);
    }

    #[test]
    fn test_parse_destination_line() {
        assert_eq!(
            parse_destination_line("[download] Destination: downloads/video.mp4"),
            Some(PathBuf::from("downloads/video.mp4"))
        );
        assert_eq!(
            parse_destination_line("[ExtractAudio] Destination: downloads/song.mp3"),
            Some(PathBuf::from("downloads/song.mp3"))
        );
        assert_eq!(
            parse_destination_line("[Merger] Merging formats into \"downloads/video.mp4\""),
            Some(PathBuf::from("downloads/video.mp4"))
        );
        assert_eq!(
            parse_destination_line("[info] Writing video subtitles to: downloads/video.en.vtt"),
            Some(PathBuf::from("downloads/video.en.vtt"))
        );
        assert_eq!(
            parse_destination_line("[download] downloads/video.mp4 has already been downloaded"),
            Some(PathBuf::from("downloads/video.mp4"))
        );
        assert_eq!(parse_destination_line("[download]  45.3% of 10MiB"), None);
    }

    #[test]
    fn test_classify_failure() {
        assert!(matches!(
            classify_failure("ERROR: 'not-a-url' is not a valid URL"),
            FetchError::InvalidUrl(_)
        ));
        assert!(matches!(
            classify_failure("ERROR: Unsupported URL: https://example.com"),
            FetchError::UnsupportedFormat(_)
        ));
        assert!(matches!(
            classify_failure("ERROR: Requested format is not available"),
            FetchError::UnsupportedFormat(_)
        ));
        assert!(matches!(
            classify_failure("ERROR: unable to download video data: HTTP Error 403"),
            FetchError::Network(_)
        ));
        assert!(matches!(
            classify_failure("ERROR: [Errno 28] No space left on device"),
            FetchError::Filesystem(_)
        ));
        assert!(matches!(
            classify_failure("ERROR: something unexpected"),
            FetchError::Other(_)
        ));
    }

    #[test]
    fn test_classify_failure_keeps_last_line() {
        let stderr = "WARNING: something minor\nERROR: something unexpected\n";
        match classify_failure(stderr) {
            FetchError::Other(message) => assert_eq!(message, "ERROR: something unexpected"),
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn test_resolve_subtitle_language_exact() {
        let available = vec!["en".to_string(), "fr".to_string()];
        assert_eq!(
            resolve_subtitle_language("fr", &available),
            Some("fr".to_string())
        );
    }

    #[test]
    fn test_resolve_subtitle_language_chinese_variants() {
        let available = vec!["en".to_string(), "zh-Hant".to_string()];
        assert_eq!(
            resolve_subtitle_language("zh-CN", &available),
            Some("zh-Hant".to_string())
        );
    }

    #[test]
    fn test_resolve_subtitle_language_english_fallback() {
        let available = vec!["en".to_string(), "de".to_string()];
        assert_eq!(
            resolve_subtitle_language("ja", &available),
            Some("en".to_string())
        );
    }

    #[test]
    fn test_resolve_subtitle_language_none_available() {
        let available = vec!["de".to_string()];
        assert_eq!(resolve_subtitle_language("ja", &available), None);
    }

    #[test]
    fn test_metadata_deserialization() {
        let json = r#"{
            "id": "dQw4w9WgXcQ",
            "title": "Test Video",
            "duration": 212.0,
            "thumbnail": "https://i.ytimg.com/vi/dQw4w9WgXcQ/maxresdefault.jpg",
            "subtitles": {"en": []},
            "automatic_captions": {"zh-Hans": [], "en": []}
        }"#;

        let metadata: VideoMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(metadata.title.as_deref(), Some("Test Video"));
        assert_eq!(
            metadata.available_subtitle_languages(),
            vec!["en".to_string(), "zh-Hans".to_string()]
        );
    }

    #[test]
    fn test_metadata_deserialization_minimal() {
        let metadata: VideoMetadata = serde_json::from_str(r#"{"id": "x"}"#).unwrap();
        assert!(metadata.available_subtitle_languages().is_empty());
        assert!(metadata.title.is_none());
    }

    #[test]
    fn test_output_template() {
        let template = output_template("downloads");
        assert!(template.starts_with("downloads"));
        assert!(template.ends_with("%(title)s.%(ext)s"));
    }
}
