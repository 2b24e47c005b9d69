//! Check the encoding engine.

use clipbee_common::config::AppConfig;
use clipbee_render_engine::{Engine, TransitionCapabilities, DEFAULT_TRANSITION};

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("ClipBee System Check");
    println!("{}", "=".repeat(50));

    let engine = Engine::system(&config.render);
    let mut ready = true;
    for (label, program) in [
        ("ffmpeg", engine.ffmpeg_program()),
        ("ffprobe", engine.ffprobe_program()),
    ] {
        match which::which(program) {
            Ok(path) => println!("[OK] {label}: {}", path.display()),
            Err(_) => {
                println!("[MISSING] {label}: {program} not found");
                ready = false;
            }
        }
    }

    println!("[OK] Storage root: {}", config.storage.root.display());
    println!(
        "     Retention: {}s, sweep every {}s",
        config.storage.retention_secs,
        config.storage.sweep_interval().as_secs()
    );

    if ready {
        let caps = TransitionCapabilities::process();
        let supported = caps.get(&engine).await;
        if supported.is_empty() {
            println!("[WARN] No xfade transitions reported; renders will concatenate");
        } else {
            let names: Vec<&str> = supported.names().collect();
            println!("[OK] Transitions ({}): {}", names.len(), names.join(", "));
            if !supported.contains(DEFAULT_TRANSITION) {
                println!("[WARN] Default transition '{DEFAULT_TRANSITION}' not supported");
            }
        }
    }

    println!();
    if ready {
        println!("Encoding engine is available. ClipBee is ready.");
    } else {
        println!("Encoding engine is missing. Install ffmpeg or set CLIPBEE_FFMPEG/CLIPBEE_FFPROBE.");
    }
    Ok(())
}
