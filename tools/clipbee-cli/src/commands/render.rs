//! Merge clips into one output.

use std::path::Path;
use std::sync::Arc;

use clipbee_common::config::AppConfig;
use clipbee_render_engine::{ProgressCallback, RenderPipeline, RenderProgress};
use clipbee_timeline::{ClipInput, OutputFormat, Quality, RenderRequest, TransitionKind};

pub struct RenderArgs {
    pub clips: Vec<String>,
    pub transition: String,
    pub transition_duration: f64,
    pub format: String,
    pub quality: Option<String>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub session: Option<String>,
}

/// Parse `PATH` or `PATH,START[,END]`.
pub fn parse_clip_arg(arg: &str) -> anyhow::Result<ClipInput> {
    let mut parts = arg.splitn(3, ',');
    let path = parts.next().unwrap_or_default().trim();
    if path.is_empty() {
        anyhow::bail!("Empty clip path in {arg:?}");
    }

    let parse = |raw: Option<&str>, what: &str| -> anyhow::Result<Option<f64>> {
        match raw.map(str::trim).filter(|v| !v.is_empty()) {
            None => Ok(None),
            Some(v) => v
                .parse::<f64>()
                .map(Some)
                .map_err(|e| anyhow::anyhow!("Invalid {what} {v:?} in {arg:?}: {e}")),
        }
    };
    let start = parse(parts.next(), "trim start")?.unwrap_or(0.0);
    let end = parse(parts.next(), "trim end")?;

    Ok(ClipInput::trimmed(path, start, end))
}

pub fn build_request(args: RenderArgs) -> anyhow::Result<RenderRequest> {
    let clips = args
        .clips
        .iter()
        .map(|arg| parse_clip_arg(arg))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let format = OutputFormat::parse(&args.format).ok_or_else(|| {
        anyhow::anyhow!(
            "Unknown format: {}. Use: mp4, mov, mkv, webm",
            args.format
        )
    })?;

    let mut request = RenderRequest::new(clips)
        .with_transition(
            TransitionKind::from(args.transition.as_str()),
            args.transition_duration,
        )
        .with_format(format)
        .with_geometry(args.width, args.height, args.fps);
    if let Some(quality) = args.quality {
        request = request.with_quality(Quality::parse_or_default(&quality));
    }
    if let Some(session) = args.session {
        request = request.with_session(session);
    }
    Ok(request)
}

pub fn load_request(path: &Path) -> anyhow::Result<RenderRequest> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
    serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Invalid request in {}: {e}", path.display()))
}

pub async fn run(
    config: &AppConfig,
    request: RenderRequest,
    json: bool,
    hold: bool,
) -> anyhow::Result<()> {
    let pipeline = RenderPipeline::from_config(config)?;
    pipeline.startup_sweep().await;

    if !json {
        println!("Rendering {} clip(s)", request.clips.len());
        println!("  Transition: {} ({}s)", request.transition, request.transition_duration);
        println!("  Format: {}", request.format);
        println!("  Resolution: {}x{} @ {}fps", request.width, request.height, request.fps);
    }

    let progress: Option<ProgressCallback> = (!json).then(|| {
        Arc::new(|p: RenderProgress| {
            print!("\r  {}: {}/{}    ", p.stage.as_str(), p.completed, p.total);
        }) as ProgressCallback
    });

    let result = pipeline.render_with_progress(&request, progress).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!();
        println!("Render complete: {}", result.output_path.display());
        if let Some(secs) = result.duration_secs {
            println!("  Duration: {secs:.2}s");
        }
        println!("  Expires: {}", result.expires_at.to_rfc3339());
    }

    if hold {
        if !json {
            println!("Holding until the output expires, Ctrl+C to stop");
        }
        tokio::select! {
            _ = pipeline.wait_for_expiries() => {
                tracing::info!(output = %result.output_path.display(), "Output expired");
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("Stopped before expiry; the next sweep removes the output");
            }
        }
    } else if !json {
        println!("  (removed by the next sweep after expiry; pass --hold to delete on time)");
    }

    Ok(())
}
