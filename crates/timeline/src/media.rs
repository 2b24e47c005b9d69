//! Probed media metadata and uploaded source clips.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Metadata extracted from a media file.
///
/// Derived from the first video stream and the first audio stream found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    /// Container duration in seconds.
    pub duration: f64,

    /// Video width in pixels (0 when there is no video stream).
    pub width: u32,

    /// Video height in pixels.
    pub height: u32,

    /// Video codec name, `"unknown"` when absent.
    pub codec: String,

    /// Container bitrate in bits per second.
    pub bitrate: u64,

    /// File size in bytes.
    pub size: u64,

    /// Whether at least one audio stream exists.
    pub has_audio: bool,
}

impl MediaInfo {
    /// Placeholder used when a file could not be probed but must still be
    /// listed.
    pub fn zeroed() -> Self {
        Self {
            duration: 0.0,
            width: 0,
            height: 0,
            codec: "unknown".to_string(),
            bitrate: 0,
            size: 0,
            has_audio: false,
        }
    }

    /// Whether this looks like a successfully probed video.
    pub fn has_video(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// An uploaded source clip with its probed metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceClip {
    /// Unique clip identifier (UUID).
    pub id: String,

    /// Original file name as supplied by the client.
    pub filename: String,

    /// Location of the materialized file.
    pub path: PathBuf,

    /// Probed metadata (zeroed if the probe failed).
    #[serde(flatten)]
    pub info: MediaInfo,
}

impl SourceClip {
    pub fn new(
        id: impl Into<String>,
        filename: impl Into<String>,
        path: impl Into<PathBuf>,
        info: MediaInfo,
    ) -> Self {
        Self {
            id: id.into(),
            filename: filename.into(),
            path: path.into(),
            info,
        }
    }

    pub fn duration(&self) -> f64 {
        self.info.duration
    }

    pub fn has_audio(&self) -> bool {
        self.info.has_audio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_info() {
        let info = MediaInfo::zeroed();
        assert_eq!(info.duration, 0.0);
        assert_eq!(info.codec, "unknown");
        assert!(!info.has_audio);
        assert!(!info.has_video());
    }

    #[test]
    fn test_source_clip_serializes_flat_camel_case() {
        let clip = SourceClip::new(
            "c1",
            "beach.mp4",
            "/data/uploads/s1/abc.mp4",
            MediaInfo {
                duration: 12.5,
                width: 1920,
                height: 1080,
                codec: "h264".to_string(),
                bitrate: 4_000_000,
                size: 6_250_000,
                has_audio: true,
            },
        );
        let value = serde_json::to_value(&clip).unwrap();
        assert_eq!(value["filename"], "beach.mp4");
        assert_eq!(value["hasAudio"], true);
        assert_eq!(value["width"], 1920);

        let parsed: SourceClip = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, clip);
    }
}
