//! Render pipeline entry point.
//!
//! Probe and normalize every clip (bounded parallelism, results kept in
//! request order), composite, then hand the output to the storage manager
//! for expiry. Intermediates live in a render-scoped scratch directory
//! that is removed on every exit path.

use std::path::Path;
use std::sync::Arc;

use clipbee_common::config::{AppConfig, RenderConfig};
use clipbee_common::error::{swallow_cleanup, ClipbeeError, ClipbeeResult};
use clipbee_storage::{absolute_path, validate_session_id, ScratchDir, StorageManager, SweepReport};
use clipbee_timeline::{MediaInfo, RenderRequest, RenderResult, SourceClip};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::capability::{TransitionCapabilities, TransitionSet};
use crate::codec::resolve_preset;
use crate::compositor::{CompositeJob, Compositor};
use crate::engine::Engine;
use crate::normalize::{intermediate_name, normalize_clip, NormalizeTarget, NormalizedClip};
use crate::probe::{probe_lenient, probe_media};

/// Render stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStage {
    Preparing,
    Normalizing,
    Compositing,
    Finalizing,
    Complete,
}

impl RenderStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preparing => "preparing",
            Self::Normalizing => "normalizing",
            Self::Compositing => "compositing",
            Self::Finalizing => "finalizing",
            Self::Complete => "complete",
        }
    }
}

/// Progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderProgress {
    pub stage: RenderStage,
    /// Clips finished in the current stage.
    pub completed: usize,
    pub total: usize,
}

/// Callback for progress updates.
pub type ProgressCallback = Arc<dyn Fn(RenderProgress) + Send + Sync>;

fn report(progress: &Option<ProgressCallback>, stage: RenderStage, completed: usize, total: usize) {
    if let Some(cb) = progress {
        cb(RenderProgress {
            stage,
            completed,
            total,
        });
    }
}

/// Probes, normalizes, and composites render requests.
#[derive(Debug, Clone)]
pub struct RenderPipeline {
    engine: Engine,
    storage: StorageManager,
    capabilities: Arc<TransitionCapabilities>,
    config: RenderConfig,
}

impl RenderPipeline {
    /// Pipeline sharing the process-wide capability cache.
    pub fn new(engine: Engine, storage: StorageManager, config: RenderConfig) -> Self {
        Self {
            engine,
            storage,
            capabilities: TransitionCapabilities::process(),
            config,
        }
    }

    /// Pipeline driving the system ffmpeg, storage roots created.
    pub fn from_config(config: &AppConfig) -> ClipbeeResult<Self> {
        let storage = StorageManager::from_config(&config.storage)?;
        Ok(Self::new(
            Engine::system(&config.render),
            storage,
            config.render.clone(),
        ))
    }

    pub fn with_capabilities(mut self, capabilities: Arc<TransitionCapabilities>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    /// Startup sweep: remove artifacts that outlived the retention window,
    /// including outputs whose scheduled expiry died with an earlier process.
    pub async fn startup_sweep(&self) -> SweepReport {
        let report = self.storage.sweep().await;
        tracing::info!(
            files = report.files_removed,
            dirs = report.dirs_removed,
            "Startup sweep finished"
        );
        report
    }

    /// Block until every output scheduled by this pipeline has expired.
    pub async fn wait_for_expiries(&self) {
        self.storage.wait_for_expiries().await;
    }

    /// Probe entry point.
    pub async fn probe(&self, path: &Path) -> ClipbeeResult<MediaInfo> {
        probe_media(&self.engine, path).await
    }

    /// Transition effects the installed engine supports.
    pub async fn supported_transitions(&self) -> TransitionSet {
        self.capabilities.get(&self.engine).await.clone()
    }

    /// List a session's uploads with their metadata.
    ///
    /// Files the engine cannot read are listed with zeroed metadata.
    pub async fn describe_uploads(&self, session_id: &str) -> ClipbeeResult<Vec<SourceClip>> {
        let mut clips = Vec::new();
        for path in self.storage.session_uploads(session_id)? {
            let info = probe_lenient(&self.engine, &path).await;
            let id = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let filename = path
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            clips.push(SourceClip::new(id, filename, path, info));
        }
        Ok(clips)
    }

    pub async fn render(&self, request: &RenderRequest) -> ClipbeeResult<RenderResult> {
        self.render_with_progress(request, None).await
    }

    /// Render entry point.
    pub async fn render_with_progress(
        &self,
        request: &RenderRequest,
        progress: Option<ProgressCallback>,
    ) -> ClipbeeResult<RenderResult> {
        request
            .validate()
            .map_err(|e| ClipbeeError::input(e.to_string()))?;
        if let Some(session_id) = &request.session_id {
            validate_session_id(session_id)?;
        }

        let total = request.clips.len();
        let render_id = uuid::Uuid::new_v4().to_string();
        let started = std::time::Instant::now();
        tracing::info!(
            render_id = %render_id,
            clips = total,
            transition = %request.transition,
            format = %request.format,
            width = request.width,
            height = request.height,
            fps = request.fps,
            "Starting render"
        );
        report(&progress, RenderStage::Preparing, 0, total);

        let scratch = self.storage.begin_scratch(&render_id)?;
        let clips = self.normalize_all(request, &scratch, &progress).await?;

        report(&progress, RenderStage::Compositing, 0, 1);
        let preset = resolve_preset(request.format);
        let output = self
            .storage
            .layout()
            .output_path(&render_id, preset.extension());
        let compositor = Compositor::new(
            self.engine.clone(),
            Arc::clone(&self.capabilities),
            &self.config,
        );
        let composited = compositor
            .composite(CompositeJob {
                clips: &clips,
                transition: &request.transition,
                requested_duration: request.requested_transition_secs(),
                preset,
                output: &output,
                scratch: scratch.path(),
            })
            .await;
        drop(scratch);

        let outcome = match composited {
            Ok(outcome) => outcome,
            Err(e) => {
                remove_if_exists(&output).await;
                tracing::error!(render_id = %render_id, error = %e, "Render failed");
                return Err(e);
            }
        };
        report(&progress, RenderStage::Compositing, 1, 1);

        report(&progress, RenderStage::Finalizing, 0, 1);
        let measured = probe_lenient(&self.engine, &output).await.duration;
        let duration_secs = (measured > 0.0).then_some(measured);
        self.storage.schedule_expiry(output.clone());
        let expires_at = self.storage.expires_at();

        if let Some(session_id) = &request.session_id {
            self.discard_session_sources(session_id, request).await;
        }

        let filename = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        tracing::info!(
            render_id = %render_id,
            output = %output.display(),
            strategy = outcome.strategy.as_str(),
            fell_back = outcome.fell_back,
            expected_secs = outcome.expected_duration,
            measured_secs = ?duration_secs,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Render complete"
        );
        report(&progress, RenderStage::Complete, 1, 1);

        Ok(RenderResult {
            render_id,
            output_path: output,
            filename,
            duration_secs,
            expires_at,
        })
    }

    /// Normalize every clip with at most `max_parallel_normalizations`
    /// encodes in flight. The first failure cancels the rest.
    async fn normalize_all(
        &self,
        request: &RenderRequest,
        scratch: &ScratchDir,
        progress: &Option<ProgressCallback>,
    ) -> ClipbeeResult<Vec<NormalizedClip>> {
        let total = request.clips.len();
        let target = NormalizeTarget::for_request(request, &self.config);
        let limit = Arc::new(Semaphore::new(self.config.max_parallel_normalizations.max(1)));
        let mut tasks = JoinSet::new();

        for (index, clip) in request.clips.iter().cloned().enumerate() {
            let engine = self.engine.clone();
            let target = target.clone();
            let output = scratch.join(intermediate_name(index));
            let limit = Arc::clone(&limit);
            tasks.spawn(async move {
                let _permit = limit
                    .acquire_owned()
                    .await
                    .map_err(|e| ClipbeeError::Other(anyhow::Error::new(e)))?;
                normalize_clip(&engine, index, &clip, &target, &output).await
            });
        }

        report(progress, RenderStage::Normalizing, 0, total);
        let mut slots: Vec<Option<NormalizedClip>> = vec![None; total];
        let mut completed = 0;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.unwrap_or_else(|e| {
                Err(ClipbeeError::encode(format!("Normalization task failed: {e}")))
            });
            match result {
                Ok(clip) => {
                    completed += 1;
                    report(progress, RenderStage::Normalizing, completed, total);
                    let index = clip.index;
                    slots[index] = Some(clip);
                }
                Err(e) => {
                    tasks.shutdown().await;
                    return Err(e);
                }
            }
        }

        slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| ClipbeeError::encode("Normalization did not produce every clip"))
    }

    /// Delete the request's sources that live in its session directory.
    async fn discard_session_sources(&self, session_id: &str, request: &RenderRequest) {
        let session_dir = match self.storage.layout().session_dir(session_id) {
            Ok(dir) => dir,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping source cleanup");
                return;
            }
        };
        let consumed: Vec<_> = request
            .clips
            .iter()
            .map(|clip| absolute_path(&clip.file_path))
            .filter(|path| path.starts_with(&session_dir))
            .collect();
        self.storage.discard_uploads(&consumed).await;
    }
}

async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => swallow_cleanup(ClipbeeError::cleanup(path, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{probe_json, CallKind, FakeEngine};
    use clipbee_storage::StorageLayout;
    use clipbee_timeline::{ClipInput, OutputFormat, TransitionKind};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Harness {
        _dir: tempfile::TempDir,
        root: PathBuf,
        fake: FakeEngine,
        pipeline: RenderPipeline,
    }

    fn harness(config: RenderConfig) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        let layout = StorageLayout::new(&root);
        layout.ensure().unwrap();
        let storage = StorageManager::new(layout, Duration::from_secs(1800), Duration::from_secs(300));
        let fake = FakeEngine::new().with_output_duration(17.45);
        let pipeline = RenderPipeline::new(fake.engine(), storage, config)
            .with_capabilities(Arc::new(TransitionCapabilities::new()));
        Harness {
            _dir: dir,
            root,
            fake,
            pipeline,
        }
    }

    impl Harness {
        fn source(&self, name: &str, duration: f64, has_audio: bool) -> PathBuf {
            let path = self.root.join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, b"source").unwrap();
            self.fake
                .add_probe(&path, probe_json(duration, 1280, 720, has_audio));
            path
        }

        fn work_is_empty(&self) -> bool {
            std::fs::read_dir(self.root.join("work"))
                .unwrap()
                .next()
                .is_none()
        }
    }

    #[tokio::test]
    async fn test_output_expires_after_retention() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path().join("store"));
        layout.ensure().unwrap();
        let storage =
            StorageManager::new(layout, Duration::from_millis(50), Duration::from_secs(300));
        let fake = FakeEngine::new().with_output_duration(3.0);
        let pipeline = RenderPipeline::new(fake.engine(), storage, RenderConfig::default())
            .with_capabilities(Arc::new(TransitionCapabilities::new()));
        let source = dir.path().join("solo.mp4");
        std::fs::write(&source, b"source").unwrap();
        fake.add_probe(&source, probe_json(3.0, 1280, 720, true));

        let result = pipeline
            .render(&RenderRequest::new(vec![ClipInput::new(&source)]))
            .await
            .unwrap();
        assert!(result.output_path.exists());

        pipeline.wait_for_expiries().await;
        assert!(!result.output_path.exists());
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_startup_sweep_removes_stale_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path().join("store"));
        layout.ensure().unwrap();
        let stale = layout.output_path("earlier-run", "mp4");
        std::fs::write(&stale, b"old render").unwrap();
        let storage = StorageManager::new(layout, Duration::ZERO, Duration::from_secs(300));
        let pipeline = RenderPipeline::new(FakeEngine::new().engine(), storage, RenderConfig::default());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let report = pipeline.startup_sweep().await;

        assert_eq!(report.files_removed, 1);
        assert!(!stale.exists());
        assert!(pipeline.storage().layout().outputs_root().is_dir());
    }

    #[tokio::test]
    async fn test_empty_request_is_input_error() {
        let h = harness(RenderConfig::default());
        let err = h
            .pipeline
            .render(&RenderRequest::new(Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ClipbeeError::Input { .. }));
        assert!(h.fake.call_kinds().is_empty());
    }

    #[tokio::test]
    async fn test_two_clip_render() {
        let h = harness(RenderConfig::default());
        let a = h.source("a.mp4", 10.0, true);
        let b = h.source("b.mp4", 8.0, false);
        let request = RenderRequest::new(vec![ClipInput::new(&a), ClipInput::new(&b)])
            .with_transition(TransitionKind::Fade, 0.5);

        let result = h.pipeline.render(&request).await.unwrap();

        assert!(result.output_path.exists());
        assert!(result
            .output_path
            .starts_with(h.pipeline.storage().layout().outputs_root()));
        assert_eq!(result.filename, format!("clipbee-{}.mp4", result.render_id));
        assert_eq!(result.duration_secs, Some(17.45));
        assert!(result.expires_at > chrono::Utc::now());
        assert_eq!(h.pipeline.storage().pending_expiries(), 1);
        assert!(h.work_is_empty());

        let normalize = h.fake.calls(CallKind::Normalize);
        assert_eq!(normalize.len(), 2);
        assert!(normalize
            .iter()
            .any(|args| args.join(" ").contains("anullsrc")));
        assert_eq!(h.fake.calls(CallKind::Transition).len(), 1);
        // Sources outside a session are never deleted.
        assert!(a.exists() && b.exists());
    }

    #[tokio::test]
    async fn test_results_keep_request_order() {
        let h = harness(RenderConfig {
            max_parallel_normalizations: 3,
            ..RenderConfig::default()
        });
        let slow = h.source("slow.mp4", 4.0, true);
        let fast = h.source("fast.mp4", 6.0, true);
        let mid = h.source("mid.mp4", 5.0, true);
        h.fake.delay_normalize(&slow, Duration::from_millis(80));
        h.fake.delay_normalize(&mid, Duration::from_millis(30));

        let request = RenderRequest::new(vec![
            ClipInput::new(&slow),
            ClipInput::new(&fast),
            ClipInput::new(&mid),
        ])
        .with_transition(TransitionKind::None, 0.0);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |p| sink.lock().unwrap().push(p));
        h.pipeline
            .render_with_progress(&request, Some(callback))
            .await
            .unwrap();

        let concat = h.fake.calls(CallKind::Concat);
        assert_eq!(concat.len(), 1);
        assert!(h.fake.max_concurrent_normalizations() >= 2);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.first().map(|p| p.stage), Some(RenderStage::Preparing));
        assert_eq!(seen.last().map(|p| p.stage), Some(RenderStage::Complete));
        let normalized: Vec<usize> = seen
            .iter()
            .filter(|p| p.stage == RenderStage::Normalizing)
            .map(|p| p.completed)
            .collect();
        assert_eq!(normalized, [0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_concat_list_follows_request_order() {
        let h = harness(RenderConfig::default());
        let first = h.source("first.mp4", 2.0, true);
        let second = h.source("second.mp4", 2.0, true);
        h.fake.delay_normalize(&first, Duration::from_millis(50));
        h.fake.fail_transition();

        let request = RenderRequest::new(vec![ClipInput::new(&first), ClipInput::new(&second)]);
        let result = h.pipeline.render(&request).await.unwrap();
        assert!(result.output_path.exists());

        // The transition inputs name intermediates in request order.
        let transition = &h.fake.calls(CallKind::Transition)[0];
        let inputs: Vec<&String> = transition
            .windows(2)
            .filter(|w| w[0] == "-i")
            .map(|w| &w[1])
            .collect();
        assert!(inputs[0].ends_with("norm_000.mp4"));
        assert!(inputs[1].ends_with("norm_001.mp4"));
        assert_eq!(h.fake.calls(CallKind::Concat).len(), 1);
    }

    #[tokio::test]
    async fn test_encode_failure_aborts_and_cleans_up() {
        let h = harness(RenderConfig::default());
        let good = h.source("good.mp4", 5.0, true);
        let bad = h.source("bad.mp4", 5.0, true);
        h.fake.delay_normalize(&good, Duration::from_millis(50));
        h.fake.fail_normalize(&bad);

        let request = RenderRequest::new(vec![ClipInput::new(&good), ClipInput::new(&bad)]);
        let err = h.pipeline.render(&request).await.unwrap_err();

        assert!(matches!(err, ClipbeeError::Encode { .. }));
        assert!(h.fake.calls(CallKind::Transition).is_empty());
        assert!(h.fake.calls(CallKind::Concat).is_empty());
        assert!(h.work_is_empty());
        assert_eq!(h.pipeline.storage().active_renders(), 0);
        assert!(std::fs::read_dir(h.root.join("output")).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_unreadable_source_is_probe_error() {
        let h = harness(RenderConfig::default());
        let path = h.root.join("garbage.mp4");
        std::fs::write(&path, b"garbage").unwrap();

        let err = h
            .pipeline
            .render(&RenderRequest::new(vec![ClipInput::new(&path)]))
            .await
            .unwrap_err();
        assert!(matches!(err, ClipbeeError::Probe { .. }));
        assert!(h.work_is_empty());
    }

    #[tokio::test]
    async fn test_single_webm_clip_skips_transitions() {
        let h = harness(RenderConfig::default());
        let clip = h.source("solo.mov", 12.0, true);
        let request = RenderRequest::new(vec![ClipInput::new(&clip)]).with_format(OutputFormat::Webm);

        let result = h.pipeline.render(&request).await.unwrap();

        assert!(result.filename.ends_with(".webm"));
        assert!(h.fake.calls(CallKind::Transition).is_empty());
        assert_eq!(h.fake.help_queries(), 0);
        let single = h.fake.calls(CallKind::Single);
        assert_eq!(single.len(), 1);
        assert!(single[0].contains(&"libvpx-vp9".to_string()));
    }

    #[tokio::test]
    async fn test_session_sources_are_discarded_after_render() {
        let h = harness(RenderConfig::default());
        let mine = h.source("uploads/s1/one.mp4", 3.0, true);
        let outside = h.source("elsewhere/two.mp4", 3.0, true);
        let request = RenderRequest::new(vec![ClipInput::new(&mine), ClipInput::new(&outside)])
            .with_session("s1");

        h.pipeline.render(&request).await.unwrap();

        assert!(!mine.exists());
        assert!(outside.exists());
    }

    #[tokio::test]
    async fn test_describe_uploads_tolerates_probe_failure() {
        let h = harness(RenderConfig::default());
        let good = h.source("uploads/s2/aaa.mp4", 7.5, true);
        let bad = h.root.join("uploads/s2/bbb.webm");
        std::fs::write(&bad, b"garbage").unwrap();

        let clips = h.pipeline.describe_uploads("s2").await.unwrap();

        assert_eq!(clips.len(), 2);
        assert_eq!(clips[0].path, good);
        assert_eq!(clips[0].id, "aaa");
        assert!((clips[0].duration() - 7.5).abs() < 1e-9);
        assert_eq!(clips[1].filename, "bbb.webm");
        assert_eq!(clips[1].info, MediaInfo::zeroed());
    }
}
