//! Show media metadata.

use std::path::PathBuf;

use clipbee_common::config::AppConfig;
use clipbee_render_engine::{probe_media, Engine};

pub async fn run(config: &AppConfig, path: PathBuf, json: bool) -> anyhow::Result<()> {
    let engine = Engine::system(&config.render);
    let info = probe_media(&engine, &path).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("File: {}", path.display());
    println!("  Duration: {:.3}s", info.duration);
    println!("  Resolution: {}x{}", info.width, info.height);
    println!("  Codec: {}", info.codec);
    println!("  Bitrate: {} kb/s", info.bitrate / 1000);
    println!("  Size: {} bytes", info.size);
    println!("  Audio: {}", if info.has_audio { "yes" } else { "no" });
    Ok(())
}
