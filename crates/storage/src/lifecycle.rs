//! Storage lifecycle: age-based sweep, session cleanup, scheduled expiry,
//! and per-render scratch directories.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use clipbee_common::config::StorageConfig;
use clipbee_common::error::{swallow_cleanup, ClipbeeError, ClipbeeResult};
use tokio::task::JoinHandle;
use walkdir::WalkDir;

use crate::layout::StorageLayout;

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired files deleted.
    pub files_removed: usize,
    /// Empty directories pruned.
    pub dirs_removed: usize,
    /// Bytes reclaimed from deleted files.
    pub bytes_freed: u64,
    /// Deletions that failed and were skipped.
    pub failures: usize,
}

impl SweepReport {
    fn merge(&mut self, other: SweepReport) {
        self.files_removed += other.files_removed;
        self.dirs_removed += other.dirs_removed;
        self.bytes_freed += other.bytes_freed;
        self.failures += other.failures;
    }
}

type ActiveSet = Arc<Mutex<HashSet<PathBuf>>>;
type PendingExpiries = Arc<Mutex<Vec<JoinHandle<()>>>>;

/// Manages the upload, output, and scratch trees for one deployment.
///
/// Cheap to clone; clones share the set of in-flight scratch directories
/// and the pending expiry tasks.
#[derive(Debug, Clone)]
pub struct StorageManager {
    layout: StorageLayout,
    retention: Duration,
    sweep_interval: Duration,
    max_upload_bytes: u64,
    active: ActiveSet,
    expiries: PendingExpiries,
}

impl StorageManager {
    pub fn new(layout: StorageLayout, retention: Duration, sweep_interval: Duration) -> Self {
        Self {
            layout,
            retention,
            sweep_interval,
            max_upload_bytes: StorageConfig::default().max_upload_bytes,
            active: Arc::new(Mutex::new(HashSet::new())),
            expiries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Build from configuration and create the storage roots.
    pub fn from_config(config: &StorageConfig) -> ClipbeeResult<Self> {
        let layout = StorageLayout::new(&config.root);
        layout.ensure()?;
        let mut manager = Self::new(layout, config.retention(), config.sweep_interval());
        manager.max_upload_bytes = config.max_upload_bytes;
        Ok(manager)
    }

    pub fn with_max_upload_bytes(mut self, bytes: u64) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Wall-clock time at which an artifact written now expires.
    pub fn expires_at(&self) -> DateTime<Utc> {
        let retention =
            chrono::Duration::from_std(self.retention).unwrap_or_else(|_| chrono::Duration::days(365));
        Utc::now() + retention
    }

    /// Delete every file under the swept roots whose last modification is
    /// more than the retention window before `now`, then prune directories
    /// left empty. Roots themselves and active scratch directories are never
    /// touched.
    pub fn sweep_at(&self, now: SystemTime) -> SweepReport {
        let active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        let mut report = SweepReport::default();
        for root in self.layout.swept_roots() {
            if root.is_dir() {
                report.merge(sweep_root(root, &active, self.retention, now));
            }
        }

        if report.files_removed > 0 || report.dirs_removed > 0 {
            tracing::info!(
                files = report.files_removed,
                dirs = report.dirs_removed,
                bytes = report.bytes_freed,
                "Sweep removed expired artifacts"
            );
        } else {
            tracing::debug!("Sweep found nothing to remove");
        }
        report
    }

    /// Run one sweep on the blocking pool.
    pub async fn sweep(&self) -> SweepReport {
        let this = self.clone();
        match tokio::task::spawn_blocking(move || this.sweep_at(SystemTime::now())).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(error = %e, "Sweep task failed");
                SweepReport::default()
            }
        }
    }

    /// Start the periodic sweep. The first pass runs immediately.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(
                interval_secs = this.sweep_interval.as_secs(),
                retention_secs = this.retention.as_secs(),
                "Storage sweeper started"
            );
            loop {
                ticker.tick().await;
                this.sweep().await;
            }
        })
    }

    /// Remove one session's upload subtree, then sweep.
    ///
    /// Only an invalid session id is reported; deletion failures are
    /// logged and swallowed.
    pub async fn cleanup_session(&self, session_id: &str) -> ClipbeeResult<SweepReport> {
        let dir = self.layout.session_dir(session_id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => tracing::info!(session = session_id, "Removed session uploads"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(session = session_id, "Session had no uploads");
            }
            Err(e) => swallow_cleanup(ClipbeeError::cleanup(&dir, e.to_string())),
        }
        Ok(self.sweep().await)
    }

    /// Delete `path` once the retention window has passed.
    pub fn schedule_expiry(&self, path: PathBuf) {
        self.schedule_expiry_after(path, self.retention);
    }

    /// Delete `path` after `delay`, independent of the periodic sweep.
    ///
    /// The task lives on the current runtime; a process that exits earlier
    /// must call [`wait_for_expiries`](Self::wait_for_expiries) or rely on
    /// the next sweep.
    pub fn schedule_expiry_after(&self, path: PathBuf, delay: Duration) {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::info!(path = %path.display(), "Expired render output removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => swallow_cleanup(ClipbeeError::cleanup(&path, e.to_string())),
            }
        });
        let mut pending = self
            .expiries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        pending.retain(|task| !task.is_finished());
        pending.push(task);
    }

    /// Expiry tasks that have not run yet.
    pub fn pending_expiries(&self) -> usize {
        self.expiries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|task| !task.is_finished())
            .count()
    }

    /// Block until every scheduled expiry has deleted its file.
    pub async fn wait_for_expiries(&self) {
        let pending: Vec<_> = std::mem::take(
            &mut *self
                .expiries
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for task in pending {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Expiry task did not complete");
            }
        }
    }

    /// Create a scratch directory for one render.
    ///
    /// The directory is excluded from sweeps while the returned guard is
    /// alive and is deleted when the guard drops, whatever the render's
    /// outcome.
    pub fn begin_scratch(&self, render_id: &str) -> ClipbeeResult<ScratchDir> {
        let path = self.layout.scratch_dir(render_id)?;
        std::fs::create_dir_all(&path)?;
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(path.clone());
        Ok(ScratchDir {
            path,
            active: Arc::clone(&self.active),
        })
    }

    /// Number of renders currently holding a scratch directory.
    pub fn active_renders(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

fn sweep_root(
    root: &Path,
    active: &HashSet<PathBuf>,
    retention: Duration,
    now: SystemTime,
) -> SweepReport {
    let mut report = SweepReport::default();

    // contents_first yields children before their directory, so empty
    // directories can be pruned in the same pass. filter_entry cannot stop
    // descent in that mode; active scratch trees are skipped by prefix.
    let walker = WalkDir::new(root).min_depth(1).contents_first(true);

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unreadable entry during sweep");
                continue;
            }
        };
        let path = entry.path();
        if active.iter().any(|dir| path.starts_with(dir)) {
            continue;
        }

        if entry.file_type().is_dir() {
            if dir_is_empty(path) {
                match std::fs::remove_dir(path) {
                    Ok(()) => report.dirs_removed += 1,
                    Err(e) => {
                        report.failures += 1;
                        swallow_cleanup(ClipbeeError::cleanup(path, e.to_string()));
                    }
                }
            }
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "No metadata, skipping");
                continue;
            }
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        // Timestamps in the future count as age zero.
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age <= retention {
            continue;
        }

        match std::fs::remove_file(path) {
            Ok(()) => {
                report.files_removed += 1;
                report.bytes_freed += metadata.len();
                tracing::debug!(path = %path.display(), age_secs = age.as_secs(), "Removed expired file");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                report.failures += 1;
                swallow_cleanup(ClipbeeError::cleanup(path, e.to_string()));
            }
        }
    }

    report
}

fn dir_is_empty(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

/// Per-render scratch directory, removed on drop.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    active: ActiveSet,
}

impl ScratchDir {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.path.join(name)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed render scratch"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => swallow_cleanup(ClipbeeError::cleanup(&self.path, e.to_string())),
        }
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.path);
    }
}
