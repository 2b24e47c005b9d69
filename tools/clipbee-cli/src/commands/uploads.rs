//! Session upload management.

use std::path::PathBuf;

use clipbee_common::config::AppConfig;
use clipbee_render_engine::RenderPipeline;

pub async fn list(config: &AppConfig, session: String, json: bool) -> anyhow::Result<()> {
    let pipeline = RenderPipeline::from_config(config)?;
    let clips = pipeline.describe_uploads(&session).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&clips)?);
        return Ok(());
    }

    println!("Session {session}: {} upload(s)", clips.len());
    for clip in &clips {
        if clip.info.has_video() {
            println!(
                "  {} {:.1}s {}x{} {}{}",
                clip.filename,
                clip.duration(),
                clip.info.width,
                clip.info.height,
                clip.info.codec,
                if clip.has_audio() { "" } else { " (no audio)" }
            );
        } else {
            println!("  {} (unreadable)", clip.filename);
        }
    }
    Ok(())
}

pub async fn import(config: &AppConfig, session: String, files: Vec<PathBuf>) -> anyhow::Result<()> {
    let pipeline = RenderPipeline::from_config(config)?;
    for file in files {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stored = pipeline
            .storage()
            .import_upload(&session, &file, &name)
            .await?;
        println!("{} -> {}", file.display(), stored.display());
    }
    Ok(())
}
