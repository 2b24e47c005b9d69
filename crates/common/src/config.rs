//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Storage roots and artifact retention.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Render pipeline tuning.
    #[serde(default)]
    pub render: RenderConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where uploads, outputs, and render scratch space live, and for how long.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding `uploads/`, `output/`, and `work/`.
    pub root: PathBuf,

    /// Files older than this are removed by the sweep (seconds).
    pub retention_secs: u64,

    /// Interval between background sweeps (seconds).
    pub sweep_interval_secs: u64,

    /// Largest accepted upload in bytes.
    pub max_upload_bytes: u64,
}

/// Render pipeline parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// ffmpeg binary (name on PATH or absolute path).
    pub ffmpeg_path: String,

    /// ffprobe binary (name on PATH or absolute path).
    pub ffprobe_path: String,

    /// Upper bound on concurrently running normalization encodes.
    pub max_parallel_normalizations: usize,

    /// Subtracted from the shortest clip when clamping the transition length.
    pub duration_margin_secs: f64,

    /// Subtracted from every transition offset. Tuned for the encoder's
    /// duration rounding; adjust if blends land late on another build.
    pub offset_margin_secs: f64,

    /// Effective transitions shorter than this fall back to concatenation.
    pub min_transition_secs: f64,

    /// Sample rate of normalized (and synthesized) audio.
    pub audio_sample_rate: u32,

    /// AAC bitrate for intermediates and mp4-family outputs.
    pub audio_bitrate: String,

    /// x264 preset.
    pub preset: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "clipbee=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            render: RenderConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            retention_secs: 30 * 60,
            sweep_interval_secs: 5 * 60,
            max_upload_bytes: 500 * 1024 * 1024,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            max_parallel_normalizations: 2,
            duration_margin_secs: 0.05,
            offset_margin_secs: 0.02,
            min_transition_secs: 0.01,
            audio_sample_rate: 44_100,
            audio_bitrate: "192k".to_string(),
            preset: "fast".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl StorageConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults,
    /// then apply environment overrides.
    pub fn load() -> Self {
        let config_path = config_file_path();
        let mut config = Self::default();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(parsed) => config = parsed,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }

    /// Apply `CLIPBEE_*` overrides read through `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup("CLIPBEE_STORAGE_ROOT").filter(|v| !v.is_empty()) {
            self.storage.root = PathBuf::from(root);
        }
        if let Some(raw) = lookup("CLIPBEE_RETENTION_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) => self.storage.retention_secs = secs,
                Err(e) => tracing::warn!(value = %raw, "Ignoring CLIPBEE_RETENTION_SECS: {e}"),
            }
        }
        if let Some(ffmpeg) = lookup("CLIPBEE_FFMPEG").filter(|v| !v.is_empty()) {
            self.render.ffmpeg_path = ffmpeg;
        }
        if let Some(ffprobe) = lookup("CLIPBEE_FFPROBE").filter(|v| !v.is_empty()) {
            self.render.ffprobe_path = ffprobe;
        }
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("clipbee").join("config.json")
}

/// Default storage root. Ephemeral deployments keep everything under /tmp.
fn default_storage_root() -> PathBuf {
    if std::env::var("CLIPBEE_EPHEMERAL").as_deref() == Ok("1") {
        return PathBuf::from("/tmp").join("clipbee");
    }
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("clipbee")
}
