//! Media probing via ffprobe.

use std::path::Path;

use clipbee_common::error::{ClipbeeError, ClipbeeResult};
use clipbee_timeline::MediaInfo;
use serde::Deserialize;

use crate::engine::{Engine, EngineError};

/// ffprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

fn probe_args(path: &Path) -> Vec<String> {
    vec![
        "-v".to_string(),
        "error".to_string(),
        "-print_format".to_string(),
        "json".to_string(),
        "-show_format".to_string(),
        "-show_streams".to_string(),
        path.to_string_lossy().into_owned(),
    ]
}

/// Probe a media file.
///
/// Fails with [`ClipbeeError::Probe`] if the file is missing or the engine
/// cannot parse it, and with [`ClipbeeError::EngineUnavailable`] if ffprobe
/// cannot be started.
pub async fn probe_media(engine: &Engine, path: &Path) -> ClipbeeResult<MediaInfo> {
    if !path.is_file() {
        return Err(ClipbeeError::probe(path, "file does not exist"));
    }

    let output = engine.ffprobe(&probe_args(path)).await.map_err(|e| match e {
        EngineError::Spawn { .. } => ClipbeeError::engine_unavailable(e.to_string()),
        EngineError::Exited { stderr, .. } => ClipbeeError::probe(path, stderr),
    })?;

    parse_probe_output(&output.stdout).map_err(|message| ClipbeeError::probe(path, message))
}

/// Probe a file for listing purposes: any failure yields zeroed metadata.
pub async fn probe_lenient(engine: &Engine, path: &Path) -> MediaInfo {
    match probe_media(engine, path).await {
        Ok(info) => info,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Probe failed, listing with zeroed metadata");
            MediaInfo::zeroed()
        }
    }
}

/// Extract [`MediaInfo`] from ffprobe's JSON output.
///
/// Uses the first video stream and the presence of any audio stream.
pub fn parse_probe_output(stdout: &[u8]) -> Result<MediaInfo, String> {
    let probe: FfprobeOutput =
        serde_json::from_slice(stdout).map_err(|e| format!("unreadable ffprobe output: {e}"))?;

    let format = probe
        .format
        .ok_or_else(|| "no container information".to_string())?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let has_audio = probe
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    let duration = parse_number::<f64>(format.duration.as_deref())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .unwrap_or(0.0);

    Ok(MediaInfo {
        duration,
        width: video.and_then(|v| v.width).unwrap_or(0),
        height: video.and_then(|v| v.height).unwrap_or(0),
        codec: video
            .and_then(|v| v.codec_name.clone())
            .unwrap_or_else(|| "unknown".to_string()),
        bitrate: parse_number(format.bit_rate.as_deref()).unwrap_or(0),
        size: parse_number(format.size.as_deref()).unwrap_or(0),
        has_audio,
    })
}

fn parse_number<T: std::str::FromStr>(raw: Option<&str>) -> Option<T> {
    raw.and_then(|v| v.trim().parse().ok())
}
