//! Storage sweep and session cleanup.

use clipbee_common::config::AppConfig;
use clipbee_storage::{StorageManager, SweepReport};

fn print_report(report: &SweepReport) {
    println!(
        "Removed {} file(s) and {} directory(ies), freed {} bytes",
        report.files_removed, report.dirs_removed, report.bytes_freed
    );
    if report.failures > 0 {
        println!("  {} deletion(s) failed, see log", report.failures);
    }
}

pub async fn run(config: &AppConfig, watch: bool) -> anyhow::Result<()> {
    let storage = StorageManager::from_config(&config.storage)?;

    if !watch {
        print_report(&storage.sweep().await);
        return Ok(());
    }

    println!(
        "Sweeping {} every {}s (retention {}s), Ctrl+C to stop",
        storage.layout().root().display(),
        config.storage.sweep_interval().as_secs(),
        config.storage.retention_secs
    );
    let sweeper = storage.spawn_sweeper();
    tokio::signal::ctrl_c().await?;
    sweeper.abort();
    tracing::info!("Sweeper stopped");
    Ok(())
}

pub async fn clean_session(config: &AppConfig, session: String) -> anyhow::Result<()> {
    let storage = StorageManager::from_config(&config.storage)?;
    let report = storage.cleanup_session(&session).await?;
    println!("Session {session} cleaned");
    print_report(&report);
    Ok(())
}
