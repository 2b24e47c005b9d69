//! Per-clip normalization.
//!
//! Every clip is re-encoded to the same resolution, frame rate, and stereo
//! audio layout so the compositor can concatenate or blend them directly.

use std::path::{Path, PathBuf};

use clipbee_common::config::RenderConfig;
use clipbee_common::error::{ClipbeeError, ClipbeeResult};
use clipbee_timeline::{ClipInput, MediaInfo, OutputFormat, RenderRequest, ResolvedTrim};

use crate::codec::resolve_preset;
use crate::command::FfmpegCommand;
use crate::engine::{Engine, EngineError};
use crate::probe::probe_media;

/// Canonical shape of every intermediate in one render.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizeTarget {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub audio_sample_rate: u32,
    pub x264_preset: String,
    pub audio_bitrate: String,
}

impl NormalizeTarget {
    pub fn for_request(request: &RenderRequest, config: &RenderConfig) -> Self {
        Self {
            width: request.width,
            height: request.height,
            fps: request.fps,
            audio_sample_rate: config.audio_sample_rate,
            x264_preset: config.preset.clone(),
            audio_bitrate: config.audio_bitrate.clone(),
        }
    }

    /// Fit inside the target box, pad to exact size, square pixels, fixed rate.
    pub fn video_filter(&self) -> String {
        let (w, h) = (self.width, self.height);
        format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,\
             pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={}",
            self.fps
        )
    }

    fn silence_source(&self) -> String {
        format!(
            "anullsrc=channel_layout=stereo:sample_rate={}",
            self.audio_sample_rate
        )
    }
}

/// A conformed intermediate.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedClip {
    /// Position in render order.
    pub index: usize,
    pub path: PathBuf,
    /// Duration measured on the written file.
    pub duration: f64,
    /// Duration that was asked of the encoder.
    pub requested_duration: f64,
}

/// Intermediate file name for the clip at `index`.
pub fn intermediate_name(index: usize) -> String {
    format!("norm_{index:03}.mp4")
}

/// Build the encode for one clip.
pub fn build_normalize_command(
    source: &Path,
    info: &MediaInfo,
    trim: ResolvedTrim,
    target: &NormalizeTarget,
    output: &Path,
) -> FfmpegCommand {
    let seek: Vec<String> = if trim.start > 0.0 {
        vec!["-ss".to_string(), format!("{:.3}", trim.start)]
    } else {
        Vec::new()
    };

    let mut cmd = FfmpegCommand::new(output).input_with(seek, source);
    let audio_map = if info.has_audio {
        "0:a:0"
    } else {
        cmd = cmd.lavfi(target.silence_source());
        "1:a:0"
    };

    let intermediate = resolve_preset(OutputFormat::Mp4);
    cmd = cmd
        .map("0:v:0")
        .map(audio_map)
        .video_filter(target.video_filter())
        .output_args(intermediate.encode_args(&target.x264_preset, &target.audio_bitrate))
        .output_args([
            "-ar".to_string(),
            target.audio_sample_rate.to_string(),
            "-ac".to_string(),
            "2".to_string(),
        ])
        .duration(trim.duration);

    if !info.has_audio {
        // The silent source is endless; stop at the video's end.
        cmd = cmd.shortest();
    }
    cmd
}

/// Normalize one clip into `output` and measure the result.
///
/// A probe failure on the source is a [`ClipbeeError::Probe`]; an engine
/// rejection is a [`ClipbeeError::Encode`] carrying the engine's stderr.
pub async fn normalize_clip(
    engine: &Engine,
    index: usize,
    clip: &ClipInput,
    target: &NormalizeTarget,
    output: &Path,
) -> ClipbeeResult<NormalizedClip> {
    let info = probe_media(engine, &clip.file_path).await?;
    let trim = clip.trim().resolve(info.duration);

    tracing::debug!(
        index,
        source = %clip.file_path.display(),
        start = trim.start,
        duration = trim.duration,
        has_audio = info.has_audio,
        "Normalizing clip"
    );

    let cmd = build_normalize_command(&clip.file_path, &info, trim, target, output);
    engine
        .ffmpeg(&cmd.build_args())
        .await
        .map_err(|e| match e {
            EngineError::Spawn { .. } => ClipbeeError::engine_unavailable(e.to_string()),
            EngineError::Exited { stderr, .. } => ClipbeeError::encode(format!(
                "clip {} ({}): {stderr}",
                index + 1,
                clip.file_path.display()
            )),
        })?;

    let written = probe_media(engine, output).await?;
    let duration = written.duration;
    if duration.is_nan() || duration <= 0.0 {
        return Err(ClipbeeError::encode(format!(
            "clip {} ({}): encoded intermediate is empty (trim start {:.3}s)",
            index + 1,
            clip.file_path.display(),
            trim.start
        )));
    }
    if (duration - trim.duration).abs() > 0.001 {
        tracing::debug!(index, requested = trim.duration, actual = duration, "Encoded duration drifted");
    }

    Ok(NormalizedClip {
        index,
        path: output.to_path_buf(),
        duration,
        requested_duration: trim.duration,
    })
}
