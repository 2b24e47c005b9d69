//! Render requests and results.
//!
//! A request is an ordered list of already-materialized clips plus the
//! transition, container, and geometry to render them into.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::segment::TrimRange;

/// One input clip of a render: a file on disk and an optional trim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipInput {
    /// Materialized source file.
    pub file_path: PathBuf,

    /// Trim start (seconds). Defaults to the beginning.
    #[serde(default)]
    pub trim_start: f64,

    /// Trim end (seconds). Defaults to the end of the source.
    #[serde(default)]
    pub trim_end: Option<f64>,
}

impl ClipInput {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            trim_start: 0.0,
            trim_end: None,
        }
    }

    pub fn trimmed(file_path: impl Into<PathBuf>, start: f64, end: Option<f64>) -> Self {
        Self {
            file_path: file_path.into(),
            trim_start: start,
            trim_end: end,
        }
    }

    pub fn trim(&self) -> TrimRange {
        TrimRange::new(self.trim_start, self.trim_end)
    }
}

/// Requested transition between adjacent clips.
///
/// `Named` carries an engine effect name verbatim; whether the engine
/// actually supports it is decided at render time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TransitionKind {
    #[default]
    Fade,
    Dissolve,
    Slide,
    /// Plain concatenation, no blending.
    None,
    Named(String),
}

impl TransitionKind {
    /// The engine effect this kind asks for, or `None` for hard cuts.
    pub fn engine_effect(&self) -> Option<&str> {
        match self {
            Self::Fade => Some("fade"),
            Self::Dissolve => Some("dissolve"),
            Self::Slide => Some("slideleft"),
            Self::None => None,
            Self::Named(name) => Some(name.as_str()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Fade => "fade",
            Self::Dissolve => "dissolve",
            Self::Slide => "slide",
            Self::None => "none",
            Self::Named(name) => name.as_str(),
        }
    }
}

impl From<&str> for TransitionKind {
    fn from(value: &str) -> Self {
        let name = value.trim().to_ascii_lowercase();
        match name.as_str() {
            "fade" => Self::Fade,
            "dissolve" => Self::Dissolve,
            "slide" => Self::Slide,
            "none" | "cut" | "" => Self::None,
            _ => Self::Named(name),
        }
    }
}

impl From<String> for TransitionKind {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<TransitionKind> for String {
    fn from(value: TransitionKind) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Mov,
    Mkv,
    Webm,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 4] = [Self::Mp4, Self::Mov, Self::Mkv, Self::Webm];

    /// Strict lookup by name or extension.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "mp4" => Some(Self::Mp4),
            "mov" | "quicktime" => Some(Self::Mov),
            "mkv" | "matroska" => Some(Self::Mkv),
            "webm" => Some(Self::Webm),
            _ => None,
        }
    }

    /// Lookup that falls back to the default container for unknown names.
    pub fn parse_or_default(name: &str) -> Self {
        Self::parse(name).unwrap_or_default()
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mov => "mov",
            Self::Mkv => "mkv",
            Self::Webm => "webm",
        }
    }
}

impl From<String> for OutputFormat {
    fn from(value: String) -> Self {
        Self::parse_or_default(&value)
    }
}

impl From<OutputFormat> for String {
    fn from(value: OutputFormat) -> Self {
        value.extension().to_string()
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Named output resolution presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Quality {
    Uhd4k,
    #[default]
    Fhd1080,
    Hd720,
    Sd480,
}

impl Quality {
    /// Parse a preset name; unknown names fall back to 1080p.
    pub fn parse_or_default(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "4k" | "2160p" => Self::Uhd4k,
            "1080p" => Self::Fhd1080,
            "720p" => Self::Hd720,
            "480p" => Self::Sd480,
            _ => Self::default(),
        }
    }

    /// Output `(width, height)` in pixels.
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Self::Uhd4k => (3840, 2160),
            Self::Fhd1080 => (1920, 1080),
            Self::Hd720 => (1280, 720),
            Self::Sd480 => (854, 480),
        }
    }
}

/// A complete render request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    /// Clips in render order.
    pub clips: Vec<ClipInput>,

    #[serde(default)]
    pub transition: TransitionKind,

    /// Requested transition length in seconds.
    #[serde(default = "default_transition_duration")]
    pub transition_duration: f64,

    #[serde(default)]
    pub format: OutputFormat,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Session that owns the uploaded sources, if any.
    #[serde(default)]
    pub session_id: Option<String>,
}

fn default_transition_duration() -> f64 {
    0.5
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

fn default_fps() -> u32 {
    30
}

impl RenderRequest {
    /// Request with the default transition, container, and geometry.
    pub fn new(clips: Vec<ClipInput>) -> Self {
        Self {
            clips,
            transition: TransitionKind::default(),
            transition_duration: default_transition_duration(),
            format: OutputFormat::default(),
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            session_id: None,
        }
    }

    pub fn with_transition(mut self, kind: TransitionKind, duration: f64) -> Self {
        self.transition = kind;
        self.transition_duration = duration;
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_geometry(mut self, width: u32, height: u32, fps: u32) -> Self {
        self.width = width;
        self.height = height;
        self.fps = fps;
        self
    }

    pub fn with_quality(self, quality: Quality) -> Self {
        let (width, height) = quality.dimensions();
        let fps = self.fps;
        self.with_geometry(width, height, fps)
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Requested transition length, sanitized to a finite non-negative value.
    pub fn requested_transition_secs(&self) -> f64 {
        if self.transition_duration.is_finite() {
            self.transition_duration.max(0.0)
        } else {
            0.0
        }
    }

    /// Check the request before any work is done.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.clips.is_empty() {
            return Err(RequestError::NoClips);
        }
        if self.width == 0 || self.height == 0 || self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(RequestError::InvalidResolution {
                width: self.width,
                height: self.height,
            });
        }
        if self.fps == 0 || self.fps > 240 {
            return Err(RequestError::InvalidFrameRate { fps: self.fps });
        }
        Ok(())
    }
}

/// Reasons a request is rejected up front.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    #[error("No clips provided")]
    NoClips,

    #[error("Invalid output resolution {width}x{height} (dimensions must be positive and even)")]
    InvalidResolution { width: u32, height: u32 },

    #[error("Invalid frame rate {fps} (expected 1-240)")]
    InvalidFrameRate { fps: u32 },
}

/// A finished render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderResult {
    /// Render identifier (UUID), also embedded in the file name.
    pub render_id: String,

    /// Finished output file.
    pub output_path: PathBuf,

    /// Output file name, for building download URLs.
    pub filename: String,

    /// Probed duration of the output, when available.
    pub duration_secs: Option<f64>,

    /// When the output will be deleted.
    pub expires_at: DateTime<Utc>,
}
