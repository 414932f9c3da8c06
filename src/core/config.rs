//! Application configuration management

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub download: DownloadConfig,
    pub youtube: YoutubeConfig,
}

/// Queue and worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Number of jobs allowed to run concurrently
    pub worker_slots: usize,
    pub output_directory: String,
    /// Wall-clock limit for a single download
    pub timeout_seconds: u64,
    /// Allow enqueuing a URL that is already queued or running
    pub allow_duplicates: bool,
}

/// yt-dlp specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YoutubeConfig {
    /// Name or path of the yt-dlp binary
    pub binary_path: String,
    pub default_video_quality: String, // "best", "720p", "1080p"
    pub default_audio_format: String,  // "mp3", "m4a"
    pub default_subtitle_language: String,
    /// Also fetch the video thumbnail next to a finished video download
    pub download_thumbnail: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download: DownloadConfig::default(),
            youtube: YoutubeConfig::default(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            worker_slots: 1,
            output_directory: "downloads".to_string(),
            timeout_seconds: 3600,
            allow_duplicates: false,
        }
    }
}

impl Default for YoutubeConfig {
    fn default() -> Self {
        Self {
            binary_path: "yt-dlp".to_string(),
            default_video_quality: "best".to_string(),
            default_audio_format: "mp3".to_string(),
            default_subtitle_language: "en".to_string(),
            download_thumbnail: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from file, creating default if not exists
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

            let config: AppConfig =
                serde_json::from_str(&content).with_context(|| "Failed to parse config file")?;

            tracing::info!("Loaded configuration from: {:?}", config_path);
            Ok(config)
        } else {
            let config = Self::default();
            config.save()?;
            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content =
            serde_json::to_string_pretty(self).with_context(|| "Failed to serialize config")?;

        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        tracing::info!("Saved configuration to: {:?}", config_path);
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn get_config_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("com", "tubedl", "tubedl")
            .with_context(|| "Failed to get project directories")?;

        let config_dir = project_dirs.config_dir();
        Ok(config_dir.join("config.json"))
    }

    /// Reset configuration to defaults
    pub fn reset() -> Result<Self> {
        let config = Self::default();
        config.save()?;
        tracing::info!("Reset configuration to defaults");
        Ok(config)
    }

    /// Export configuration as JSON string
    pub fn export(&self) -> Result<String> {
        serde_json::to_string_pretty(self).with_context(|| "Failed to export configuration")
    }

    /// Import configuration from JSON string
    pub fn import(json: &str) -> Result<Self> {
        let config: AppConfig =
            serde_json::from_str(json).with_context(|| "Failed to parse imported configuration")?;

        config
            .validate()
            .with_context(|| "Imported configuration is invalid")?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.download.worker_slots == 0 {
            anyhow::bail!("Worker slots must be greater than 0");
        }

        if self.download.worker_slots > 20 {
            anyhow::bail!("Worker slots should not exceed 20");
        }

        if self.download.timeout_seconds == 0 || self.download.timeout_seconds > 86400 {
            anyhow::bail!("Timeout should be between 1 second and 24 hours");
        }

        if self.download.output_directory.trim().is_empty() {
            anyhow::bail!("Output directory must not be empty");
        }

        if self.youtube.binary_path.trim().is_empty() {
            anyhow::bail!("yt-dlp binary path must not be empty");
        }

        let valid_qualities = ["best", "720p", "1080p"];
        if !valid_qualities.contains(&self.youtube.default_video_quality.as_str()) {
            anyhow::bail!(
                "Invalid video quality: {} (expected best, 720p or 1080p)",
                self.youtube.default_video_quality
            );
        }

        let valid_audio_formats = ["mp3", "m4a"];
        if !valid_audio_formats.contains(&self.youtube.default_audio_format.as_str()) {
            anyhow::bail!(
                "Invalid audio format: {} (expected mp3 or m4a)",
                self.youtube.default_audio_format
            );
        }

        if self.youtube.default_subtitle_language.trim().is_empty() {
            anyhow::bail!("Default subtitle language must not be empty");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validation() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.download.worker_slots, 1);
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let json = config.export().unwrap();
        let parsed_config = AppConfig::import(&json).unwrap();

        assert_eq!(config.export().unwrap(), parsed_config.export().unwrap());
    }

    #[test]
    fn test_invalid_config_validation() {
        let mut config = AppConfig::default();

        config.download.worker_slots = 0;
        assert!(config.validate().is_err());

        config.download.worker_slots = 25;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.download.timeout_seconds = 0;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.youtube.default_video_quality = "4320p".to_string();
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.youtube.default_audio_format = "flac".to_string();
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.youtube.binary_path = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_import_rejects_invalid() {
        let mut config = AppConfig::default();
        config.download.worker_slots = 0;
        let json = config.export().unwrap();

        assert!(AppConfig::import(&json).is_err());
    }
}
