//! Compositor: joins normalized clips into the final output.
//!
//! Two or more clips are either concatenated or blended with an `xfade`
//! chain. The blend attempt is retried as a plain concatenation when the
//! engine rejects the filter graph.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use clipbee_common::config::RenderConfig;
use clipbee_common::error::{swallow_cleanup, ClipbeeError, ClipbeeResult};
use clipbee_storage::absolute_path;
use clipbee_timeline::{OutputFormat, TransitionKind};

use crate::capability::TransitionCapabilities;
use crate::codec::CodecPreset;
use crate::command::FfmpegCommand;
use crate::engine::{Engine, EngineError};
use crate::normalize::NormalizedClip;

/// Timing margins for transition planning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionSettings {
    /// Subtracted from the shortest clip when clamping the transition.
    pub duration_margin: f64,
    /// Subtracted from every blend offset.
    pub offset_margin: f64,
    /// Transitions at or below this length are dropped.
    pub min_transition: f64,
}

impl Default for TransitionSettings {
    fn default() -> Self {
        Self::from_config(&RenderConfig::default())
    }
}

impl TransitionSettings {
    pub fn from_config(config: &RenderConfig) -> Self {
        Self {
            duration_margin: config.duration_margin_secs.max(0.0),
            offset_margin: config.offset_margin_secs.max(0.0),
            min_transition: config.min_transition_secs.max(0.0),
        }
    }
}

/// Transition length actually used for a set of clip durations.
///
/// `min(requested, max(0, shortest - margin))`, never negative.
pub fn effective_transition(requested: f64, durations: &[f64], settings: &TransitionSettings) -> f64 {
    let requested = if requested.is_finite() { requested.max(0.0) } else { 0.0 };
    let shortest = durations.iter().copied().fold(f64::INFINITY, f64::min);
    if !shortest.is_finite() {
        return 0.0;
    }
    requested.min((shortest - settings.duration_margin).max(0.0))
}

/// One blend in the chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionStep {
    /// Index of the clip blended into the running stream.
    pub input: usize,
    /// Blend start within the running stream (seconds).
    pub offset: f64,
}

/// Offsets for an `xfade` chain.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionPlan {
    pub effect: String,
    pub duration: f64,
    pub steps: Vec<TransitionStep>,
    /// Length of the blended video stream.
    pub expected_duration: f64,
}

/// Compute blend offsets from measured clip durations.
///
/// The running length after each blend is `offset + duration(clip)`, the
/// true length of the graph's output at that point, so rounding in one
/// clip does not shift every later offset.
pub fn plan_transitions(
    durations: &[f64],
    effect: &str,
    duration: f64,
    offset_margin: f64,
) -> TransitionPlan {
    let mut cumulative = durations.first().copied().unwrap_or(0.0);
    let mut steps = Vec::with_capacity(durations.len().saturating_sub(1));

    for (input, clip_duration) in durations.iter().enumerate().skip(1) {
        let offset = (cumulative - duration - offset_margin).max(0.0);
        steps.push(TransitionStep { input, offset });
        cumulative = offset + clip_duration;
    }

    TransitionPlan {
        effect: effect.to_string(),
        duration,
        steps,
        expected_duration: cumulative,
    }
}

/// `-filter_complex` graph for a plan over `clip_count` inputs.
///
/// Returns the graph and the label of the final video stream. Audio is
/// concatenated end to end into `[aout]`.
pub fn build_transition_graph(plan: &TransitionPlan, clip_count: usize) -> (String, String) {
    let mut graph = String::new();
    let mut video = "[0:v]".to_string();

    for step in &plan.steps {
        let out = format!("[v{}]", step.input);
        let _ = write!(
            graph,
            "{video}[{}:v]xfade=transition={}:duration={:.3}:offset={:.3}{out};",
            step.input, plan.effect, plan.duration, step.offset
        );
        video = out;
    }

    for i in 0..clip_count {
        let _ = write!(graph, "[{i}:a]");
    }
    let _ = write!(graph, "concat=n={clip_count}:v=0:a=1[aout]");

    (graph, video)
}

/// Concat demuxer list. Single quotes inside paths are escaped.
///
/// Entries are absolute: the demuxer resolves relative ones against the
/// list file's own directory.
pub fn concat_list(clips: &[NormalizedClip]) -> String {
    clips
        .iter()
        .map(|clip| {
            let path = absolute_path(&clip.path);
            let path = path.to_string_lossy().replace('\\', "/");
            format!("file '{}'\n", path.replace('\'', r"'\''"))
        })
        .collect()
}

/// How the output was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeStrategy {
    /// Single intermediate copied as-is.
    Copy,
    /// Single intermediate stream-copied into another container.
    Remux,
    /// Single intermediate re-encoded for another codec family.
    Transcode,
    /// Clips joined end to end.
    Concat,
    /// Clips blended with an `xfade` chain.
    Transition,
}

impl CompositeStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Remux => "remux",
            Self::Transcode => "transcode",
            Self::Concat => "concat",
            Self::Transition => "transition",
        }
    }
}

/// Result of one composite step.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeOutcome {
    pub strategy: CompositeStrategy,
    /// The transition graph was rejected and concatenation was used.
    pub fell_back: bool,
    /// Engine effect and length, when a blend was attempted.
    pub transition: Option<(String, f64)>,
    /// Output length predicted from the clip durations.
    pub expected_duration: f64,
}

/// Inputs for one composite step.
#[derive(Debug, Clone, Copy)]
pub struct CompositeJob<'a> {
    pub clips: &'a [NormalizedClip],
    pub transition: &'a TransitionKind,
    pub requested_duration: f64,
    pub preset: &'static CodecPreset,
    pub output: &'a Path,
    /// Render-scoped directory for auxiliary files.
    pub scratch: &'a Path,
}

/// Combines normalized clips.
#[derive(Debug, Clone)]
pub struct Compositor {
    engine: Engine,
    capabilities: Arc<TransitionCapabilities>,
    settings: TransitionSettings,
    x264_preset: String,
    audio_bitrate: String,
}

impl Compositor {
    pub fn new(engine: Engine, capabilities: Arc<TransitionCapabilities>, config: &RenderConfig) -> Self {
        Self {
            engine,
            capabilities,
            settings: TransitionSettings::from_config(config),
            x264_preset: config.preset.clone(),
            audio_bitrate: config.audio_bitrate.clone(),
        }
    }

    pub fn settings(&self) -> &TransitionSettings {
        &self.settings
    }

    fn encode_args(&self, preset: &CodecPreset) -> Vec<String> {
        preset.encode_args(&self.x264_preset, &self.audio_bitrate)
    }

    /// Produce `job.output` from the clips.
    pub async fn composite(&self, job: CompositeJob<'_>) -> ClipbeeResult<CompositeOutcome> {
        match job.clips {
            [] => Err(ClipbeeError::input("No clips to composite")),
            [clip] => self.single_clip(clip, job).await,
            clips => self.multi_clip(clips, job).await,
        }
    }

    async fn single_clip(&self, clip: &NormalizedClip, job: CompositeJob<'_>) -> ClipbeeResult<CompositeOutcome> {
        let strategy = if job.preset.format == OutputFormat::Mp4 {
            tokio::fs::copy(&clip.path, job.output).await?;
            CompositeStrategy::Copy
        } else {
            let (strategy, codec_args) = if job.preset.carries_intermediate {
                (CompositeStrategy::Remux, job.preset.remux_args())
            } else {
                (CompositeStrategy::Transcode, self.encode_args(job.preset))
            };
            let cmd = FfmpegCommand::new(job.output)
                .input(&clip.path)
                .output_args(codec_args);
            self.engine
                .ffmpeg(&cmd.build_args())
                .await
                .map_err(composite_error)?;
            strategy
        };

        tracing::info!(strategy = strategy.as_str(), format = %job.preset.format, "Single clip written");
        Ok(CompositeOutcome {
            strategy,
            fell_back: false,
            transition: None,
            expected_duration: clip.duration,
        })
    }

    async fn multi_clip(&self, clips: &[NormalizedClip], job: CompositeJob<'_>) -> ClipbeeResult<CompositeOutcome> {
        let durations: Vec<f64> = clips.iter().map(|c| c.duration).collect();
        let total: f64 = durations.iter().sum();

        if job.transition.engine_effect().is_none() {
            self.concat(clips, job).await?;
            return Ok(concat_outcome(total, false, None));
        }

        let effective = effective_transition(job.requested_duration, &durations, &self.settings);
        if effective <= self.settings.min_transition {
            tracing::info!(
                requested = job.requested_duration,
                effective,
                "Transition too short, concatenating"
            );
            self.concat(clips, job).await?;
            return Ok(concat_outcome(total, false, None));
        }

        let supported = self.capabilities.get(&self.engine).await;
        let effect = supported
            .resolve(job.transition)
            .unwrap_or(crate::capability::DEFAULT_TRANSITION);
        let plan = plan_transitions(&durations, effect, effective, self.settings.offset_margin);
        let attempted = Some((plan.effect.clone(), plan.duration));

        match self.transition(clips, &plan, job).await {
            Ok(()) => {
                tracing::info!(
                    effect = %plan.effect,
                    duration = plan.duration,
                    expected_secs = plan.expected_duration,
                    "Clips blended"
                );
                Ok(CompositeOutcome {
                    strategy: CompositeStrategy::Transition,
                    fell_back: false,
                    transition: attempted,
                    expected_duration: plan.expected_duration,
                })
            }
            Err(e) if e.is_rejection() => {
                tracing::warn!(
                    effect = %plan.effect,
                    error = %e,
                    "Transition graph rejected, falling back to concatenation"
                );
                remove_partial(job.output).await;
                self.concat(clips, job).await?;
                Ok(concat_outcome(total, true, attempted))
            }
            Err(e) => Err(composite_error(e)),
        }
    }

    async fn transition(
        &self,
        clips: &[NormalizedClip],
        plan: &TransitionPlan,
        job: CompositeJob<'_>,
    ) -> Result<(), EngineError> {
        let (graph, video) = build_transition_graph(plan, clips.len());
        let cmd = clips
            .iter()
            .fold(FfmpegCommand::new(job.output), |cmd, clip| cmd.input(&clip.path))
            .filter_complex(graph)
            .map(video)
            .map("[aout]")
            .output_args(self.encode_args(job.preset))
            .shortest();
        self.engine.ffmpeg(&cmd.build_args()).await.map(|_| ())
    }

    async fn concat(&self, clips: &[NormalizedClip], job: CompositeJob<'_>) -> ClipbeeResult<()> {
        let list_path = job.scratch.join("concat.txt");
        tokio::fs::write(&list_path, concat_list(clips)).await?;

        let cmd = FfmpegCommand::new(job.output)
            .input_with(["-f", "concat", "-safe", "0"], &list_path)
            .output_args(self.encode_args(job.preset));
        let result = self.engine.ffmpeg(&cmd.build_args()).await;

        if let Err(e) = tokio::fs::remove_file(&list_path).await {
            swallow_cleanup(ClipbeeError::cleanup(&list_path, e.to_string()));
        }
        result.map(|_| ()).map_err(composite_error)?;
        tracing::info!(clips = clips.len(), "Clips concatenated");
        Ok(())
    }
}

fn concat_outcome(total: f64, fell_back: bool, transition: Option<(String, f64)>) -> CompositeOutcome {
    CompositeOutcome {
        strategy: CompositeStrategy::Concat,
        fell_back,
        transition,
        expected_duration: total,
    }
}

fn composite_error(e: EngineError) -> ClipbeeError {
    match e {
        EngineError::Spawn { .. } => ClipbeeError::engine_unavailable(e.to_string()),
        EngineError::Exited { stderr, .. } => ClipbeeError::composite(stderr),
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => swallow_cleanup(ClipbeeError::cleanup(path, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::resolve_preset;
    use crate::test_support::{CallKind, FakeEngine};
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn settings() -> TransitionSettings {
        TransitionSettings::default()
    }

    fn clips(dir: &Path, durations: &[f64]) -> Vec<NormalizedClip> {
        durations
            .iter()
            .enumerate()
            .map(|(index, &duration)| {
                let path = dir.join(format!("norm_{index:03}.mp4"));
                std::fs::write(&path, b"intermediate").unwrap();
                NormalizedClip {
                    index,
                    path,
                    duration,
                    requested_duration: duration,
                }
            })
            .collect()
    }

    fn compositor(fake: &FakeEngine) -> Compositor {
        Compositor::new(
            fake.engine(),
            Arc::new(TransitionCapabilities::new()),
            &RenderConfig::default(),
        )
    }

    fn job<'a>(
        clips: &'a [NormalizedClip],
        kind: &'a TransitionKind,
        requested: f64,
        format: OutputFormat,
        output: &'a Path,
        scratch: &'a Path,
    ) -> CompositeJob<'a> {
        CompositeJob {
            clips,
            transition: kind,
            requested_duration: requested,
            preset: resolve_preset(format),
            output,
            scratch,
        }
    }

    #[test]
    fn test_two_clip_example() {
        let durations = [10.0, 8.0];
        let effective = effective_transition(0.5, &durations, &settings());
        assert!((effective - 0.5).abs() < 1e-12);

        let plan = plan_transitions(&durations, "fade", effective, 0.05);
        assert_eq!(plan.steps.len(), 1);
        assert!((plan.steps[0].offset - 9.45).abs() < 1e-9);
        assert!((plan.expected_duration - 17.45).abs() < 1e-9);
        assert!((plan.expected_duration - 17.5).abs() < 0.3);
    }

    #[test]
    fn test_oversized_request_is_clamped() {
        let durations = [5.0, 5.0, 5.0];
        let effective = effective_transition(6.0, &durations, &settings());
        assert!((effective - 4.95).abs() < 1e-9);

        let plan = plan_transitions(&durations, "fade", effective, settings().offset_margin);
        assert!(plan.steps.iter().all(|s| s.offset > 0.0));
        assert!((plan.expected_duration - 5.06).abs() < 1e-9);
        assert!(plan.expected_duration > 5.0);
        assert!(plan.expected_duration < 15.0);
    }

    #[test]
    fn test_effective_transition_never_negative() {
        assert_eq!(effective_transition(1.0, &[0.04, 3.0], &settings()), 0.0);
        assert_eq!(effective_transition(-1.0, &[3.0, 3.0], &settings()), 0.0);
        assert_eq!(effective_transition(f64::NAN, &[3.0, 3.0], &settings()), 0.0);
        assert_eq!(effective_transition(1.0, &[], &settings()), 0.0);
    }

    #[test]
    fn test_offsets_follow_measured_durations() {
        // Running length is offset + clip, not the naive sum.
        let plan = plan_transitions(&[4.02, 3.98, 5.01], "dissolve", 1.0, 0.05);
        assert!((plan.steps[0].offset - 2.97).abs() < 1e-9);
        assert!((plan.steps[1].offset - (2.97 + 3.98 - 1.05)).abs() < 1e-9);
        assert!((plan.expected_duration - (2.97 + 3.98 - 1.05 + 5.01)).abs() < 1e-9);
    }

    #[test]
    fn test_transition_graph_chains_video_and_concats_audio() {
        let plan = plan_transitions(&[10.0, 8.0, 6.0], "slideleft", 0.5, 0.05);
        let (graph, last) = build_transition_graph(&plan, 3);
        assert_eq!(
            graph,
            "[0:v][1:v]xfade=transition=slideleft:duration=0.500:offset=9.450[v1];\
             [v1][2:v]xfade=transition=slideleft:duration=0.500:offset=16.900[v2];\
             [0:a][1:a][2:a]concat=n=3:v=0:a=1[aout]"
        );
        assert_eq!(last, "[v2]");
    }

    #[test]
    fn test_concat_list_escapes_quotes() {
        let clip = NormalizedClip {
            index: 0,
            path: PathBuf::from("/work/it's/norm_000.mp4"),
            duration: 1.0,
            requested_duration: 1.0,
        };
        assert_eq!(concat_list(&[clip]), "file '/work/it'\\''s/norm_000.mp4'\n");
    }

    #[test]
    fn test_concat_list_anchors_relative_paths() {
        let clip = NormalizedClip {
            index: 0,
            path: PathBuf::from("data/work/r1/norm_000.mp4"),
            duration: 1.0,
            requested_duration: 1.0,
        };
        let cwd = std::env::current_dir().unwrap();
        let expected = cwd.join("data/work/r1/norm_000.mp4");
        assert_eq!(
            concat_list(&[clip]),
            format!("file '{}'\n", expected.to_string_lossy())
        );
    }

    proptest! {
        #[test]
        fn prop_offsets_non_negative_and_duration_matches(
            durations in prop::collection::vec(0.05f64..120.0, 2..10),
            requested in 0.0f64..20.0,
        ) {
            let s = settings();
            let effective = effective_transition(requested, &durations, &s);
            let shortest = durations.iter().copied().fold(f64::INFINITY, f64::min);
            prop_assert!(effective >= 0.0);
            prop_assert!(effective <= requested + 1e-12);
            prop_assert!(effective <= (shortest - s.duration_margin).max(0.0) + 1e-12);

            let plan = plan_transitions(&durations, "fade", effective, s.offset_margin);
            let mut running = durations[0];
            for step in &plan.steps {
                prop_assert!(step.offset >= 0.0);
                prop_assert!(step.offset + effective <= running + 1e-9);
                running = step.offset + durations[step.input];
            }

            let n = durations.len() as f64;
            let sum: f64 = durations.iter().sum();
            let predicted = sum - (n - 1.0) * (effective + s.offset_margin);
            prop_assert!(plan.expected_duration > 0.0);
            prop_assert!((plan.expected_duration - predicted).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn test_two_clips_blend() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeEngine::new();
        let clips = clips(dir.path(), &[10.0, 8.0]);
        let output = dir.path().join("out.mp4");
        let kind = TransitionKind::Fade;

        let outcome = compositor(&fake)
            .composite(job(&clips, &kind, 0.5, OutputFormat::Mp4, &output, dir.path()))
            .await
            .unwrap();

        assert_eq!(outcome.strategy, CompositeStrategy::Transition);
        assert!(!outcome.fell_back);
        assert_eq!(outcome.transition, Some(("fade".to_string(), 0.5)));
        assert!((outcome.expected_duration - 17.48).abs() < 1e-9);

        let calls = fake.calls(CallKind::Transition);
        assert_eq!(calls.len(), 1);
        let args = calls[0].join(" ");
        assert!(args.contains("offset=9.480"));
        assert!(args.contains("-map [v1] -map [aout]"));
        assert!(args.contains("-shortest"));
        assert!(output.exists());
    }

    #[tokio::test]
    async fn test_rejected_graph_falls_back_to_concat() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeEngine::new();
        fake.fail_transition();
        let clips = clips(dir.path(), &[3.0, 3.0, 3.0]);
        let output = dir.path().join("out.mkv");
        let kind = TransitionKind::Dissolve;

        let outcome = compositor(&fake)
            .composite(job(&clips, &kind, 1.0, OutputFormat::Mkv, &output, dir.path()))
            .await
            .unwrap();

        assert_eq!(outcome.strategy, CompositeStrategy::Concat);
        assert!(outcome.fell_back);
        assert!((outcome.expected_duration - 9.0).abs() < 1e-9);
        assert_eq!(
            fake.call_kinds(),
            [CallKind::Help, CallKind::Transition, CallKind::Concat]
        );
        assert!(output.exists());
        assert!(!dir.path().join("concat.txt").exists());
    }

    #[tokio::test]
    async fn test_fallback_failure_is_composite_error() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeEngine::new();
        fake.fail_transition();
        fake.fail_concat();
        let clips = clips(dir.path(), &[3.0, 3.0]);
        let output = dir.path().join("out.mp4");
        let kind = TransitionKind::Fade;

        let err = compositor(&fake)
            .composite(job(&clips, &kind, 0.5, OutputFormat::Mp4, &output, dir.path()))
            .await
            .unwrap_err();

        assert!(matches!(err, ClipbeeError::Composite { .. }));
        assert!(err.to_string().contains("concat list"));
    }

    #[tokio::test]
    async fn test_unsupported_transition_uses_default() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeEngine::new();
        let clips = clips(dir.path(), &[4.0, 4.0]);
        let output = dir.path().join("out.mp4");
        let kind = TransitionKind::from("spiral");

        let outcome = compositor(&fake)
            .composite(job(&clips, &kind, 0.5, OutputFormat::Mp4, &output, dir.path()))
            .await
            .unwrap();

        assert_eq!(outcome.transition.map(|(effect, _)| effect).as_deref(), Some("fade"));
        assert!(fake.calls(CallKind::Transition)[0]
            .join(" ")
            .contains("xfade=transition=fade:"));
    }

    #[tokio::test]
    async fn test_no_transition_and_tiny_transition_concatenate() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeEngine::new();
        let clips = clips(dir.path(), &[2.0, 2.5]);
        let output = dir.path().join("out.mp4");
        let compositor = compositor(&fake);

        let none = TransitionKind::None;
        let outcome = compositor
            .composite(job(&clips, &none, 0.5, OutputFormat::Mp4, &output, dir.path()))
            .await
            .unwrap();
        assert_eq!(outcome.strategy, CompositeStrategy::Concat);
        assert!((outcome.expected_duration - 4.5).abs() < 1e-9);

        let fade = TransitionKind::Fade;
        let outcome = compositor
            .composite(job(&clips, &fade, 0.005, OutputFormat::Mp4, &output, dir.path()))
            .await
            .unwrap();
        assert_eq!(outcome.strategy, CompositeStrategy::Concat);
        assert!(!outcome.fell_back);

        assert!(fake.calls(CallKind::Transition).is_empty());
        assert_eq!(fake.help_queries(), 0);
    }

    #[tokio::test]
    async fn test_single_clip_bypasses_transition_graph() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeEngine::new();
        let clips = clips(dir.path(), &[12.0]);
        let compositor = compositor(&fake);
        let kind = TransitionKind::Fade;

        let cases = [
            (OutputFormat::Mp4, CompositeStrategy::Copy),
            (OutputFormat::Mov, CompositeStrategy::Remux),
            (OutputFormat::Webm, CompositeStrategy::Transcode),
        ];
        for (format, expected) in cases {
            let output = dir.path().join(format!("out.{}", format.extension()));
            let outcome = compositor
                .composite(job(&clips, &kind, 0.5, format, &output, dir.path()))
                .await
                .unwrap();
            assert_eq!(outcome.strategy, expected, "{format}");
            assert!((outcome.expected_duration - 12.0).abs() < 1e-9);
            assert!(output.exists());
        }

        let single = fake.calls(CallKind::Single);
        assert_eq!(single.len(), 2);
        assert!(single[0].join(" ").contains("-c copy -movflags +faststart"));
        assert!(single[1].contains(&"libvpx-vp9".to_string()));
        assert!(fake.calls(CallKind::Transition).is_empty());
        assert_eq!(fake.help_queries(), 0);
    }
}
