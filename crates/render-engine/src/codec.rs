//! Output container to codec mapping.

use clipbee_timeline::OutputFormat;

/// Encoding settings for one output container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecPreset {
    pub format: OutputFormat,
    pub video_codec: &'static str,
    pub audio_codec: &'static str,
    /// Extra video options placed after `-c:v`.
    pub video_args: &'static [&'static str],
    /// Fixed audio bitrate; `None` uses the configured default.
    pub audio_bitrate: Option<&'static str>,
    /// Extra audio options such as a forced sample rate.
    pub audio_args: &'static [&'static str],
    /// Muxer flags.
    pub container_args: &'static [&'static str],
    /// Whether the video codec takes an x264 `-preset`.
    pub takes_x264_preset: bool,
    /// Whether normalized H.264/AAC intermediates can be stream-copied
    /// into this container.
    pub carries_intermediate: bool,
}

static PRESETS: [CodecPreset; 4] = [
    CodecPreset {
        format: OutputFormat::Mp4,
        video_codec: "libx264",
        audio_codec: "aac",
        video_args: &["-pix_fmt", "yuv420p"],
        audio_bitrate: None,
        audio_args: &[],
        container_args: &["-movflags", "+faststart"],
        takes_x264_preset: true,
        carries_intermediate: true,
    },
    CodecPreset {
        format: OutputFormat::Mov,
        video_codec: "libx264",
        audio_codec: "aac",
        video_args: &["-pix_fmt", "yuv420p"],
        audio_bitrate: None,
        audio_args: &[],
        container_args: &["-movflags", "+faststart"],
        takes_x264_preset: true,
        carries_intermediate: true,
    },
    CodecPreset {
        format: OutputFormat::Mkv,
        video_codec: "libx264",
        audio_codec: "aac",
        video_args: &["-pix_fmt", "yuv420p"],
        audio_bitrate: None,
        audio_args: &[],
        container_args: &[],
        takes_x264_preset: true,
        carries_intermediate: true,
    },
    CodecPreset {
        format: OutputFormat::Webm,
        video_codec: "libvpx-vp9",
        audio_codec: "libopus",
        video_args: &["-crf", "32", "-b:v", "0", "-row-mt", "1", "-pix_fmt", "yuv420p"],
        audio_bitrate: Some("128k"),
        // Opus only accepts a fixed set of sample rates.
        audio_args: &["-ar", "48000"],
        container_args: &[],
        takes_x264_preset: false,
        carries_intermediate: false,
    },
];

/// Preset for a container. Every [`OutputFormat`] has exactly one entry.
pub fn resolve_preset(format: OutputFormat) -> &'static CodecPreset {
    PRESETS
        .iter()
        .find(|preset| preset.format == format)
        .unwrap_or(&PRESETS[0])
}

/// Preset for a container name; unknown names get the mp4 entry.
pub fn resolve_by_name(name: &str) -> &'static CodecPreset {
    resolve_preset(OutputFormat::parse_or_default(name))
}

impl CodecPreset {
    pub fn extension(&self) -> &'static str {
        self.format.extension()
    }

    /// Codec arguments for a full re-encode.
    pub fn encode_args(&self, x264_preset: &str, default_audio_bitrate: &str) -> Vec<String> {
        let mut args = vec!["-c:v".to_string(), self.video_codec.to_string()];
        if self.takes_x264_preset {
            args.push("-preset".to_string());
            args.push(x264_preset.to_string());
        }
        args.extend(self.video_args.iter().map(|a| a.to_string()));
        args.push("-c:a".to_string());
        args.push(self.audio_codec.to_string());
        args.push("-b:a".to_string());
        args.push(self.audio_bitrate.unwrap_or(default_audio_bitrate).to_string());
        args.extend(self.audio_args.iter().map(|a| a.to_string()));
        args.extend(self.container_args.iter().map(|a| a.to_string()));
        args
    }

    /// Arguments for copying intermediate streams into this container.
    pub fn remux_args(&self) -> Vec<String> {
        let mut args = vec!["-c".to_string(), "copy".to_string()];
        args.extend(self.container_args.iter().map(|a| a.to_string()));
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_format_has_one_preset() {
        for format in OutputFormat::ALL {
            let matches = PRESETS.iter().filter(|p| p.format == format).count();
            assert_eq!(matches, 1, "{format}");
            assert_eq!(resolve_preset(format).extension(), format.extension());
        }
    }

    #[test]
    fn test_unknown_name_uses_default_entry() {
        assert_eq!(resolve_by_name("avi").format, OutputFormat::Mp4);
        assert_eq!(resolve_by_name("").format, OutputFormat::Mp4);
        assert_eq!(resolve_by_name("WEBM").format, OutputFormat::Webm);
    }

    #[test]
    fn test_mp4_encode_args() {
        let args = resolve_preset(OutputFormat::Mp4).encode_args("fast", "192k");
        let joined = args.join(" ");
        assert!(joined.starts_with("-c:v libx264 -preset fast"));
        assert!(joined.contains("-c:a aac -b:a 192k"));
        assert!(joined.ends_with("-movflags +faststart"));
    }

    #[test]
    fn test_webm_uses_vp9_and_opus() {
        let preset = resolve_preset(OutputFormat::Webm);
        let args = preset.encode_args("fast", "192k");
        assert!(args.contains(&"libvpx-vp9".to_string()));
        assert!(args.contains(&"libopus".to_string()));
        assert!(args.contains(&"128k".to_string()));
        assert!(!args.contains(&"-preset".to_string()));
        assert!(!args.contains(&"+faststart".to_string()));
        assert!(!preset.carries_intermediate);
    }

    #[test]
    fn test_remux_keeps_container_flags() {
        assert_eq!(
            resolve_preset(OutputFormat::Mov).remux_args(),
            ["-c", "copy", "-movflags", "+faststart"]
        );
        assert_eq!(resolve_preset(OutputFormat::Mkv).remux_args(), ["-c", "copy"]);
    }
}
