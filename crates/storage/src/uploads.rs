//! Session upload directories.

use std::path::{Path, PathBuf};

use clipbee_common::error::{swallow_cleanup, ClipbeeError, ClipbeeResult};

use crate::lifecycle::StorageManager;

/// Container extensions accepted as uploads.
pub const ALLOWED_UPLOAD_EXTENSIONS: [&str; 5] = ["mp4", "mov", "webm", "mkv", "avi"];

/// Lower-cased extension of `name` if it is an accepted upload type.
pub fn upload_extension(name: &str) -> Option<String> {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())?
        .to_ascii_lowercase();
    ALLOWED_UPLOAD_EXTENSIONS
        .contains(&ext.as_str())
        .then_some(ext)
}

impl StorageManager {
    /// Copy `source` into the session's upload directory under a fresh
    /// `<uuid>.<ext>` name and return the stored path.
    pub async fn import_upload(
        &self,
        session_id: &str,
        source: &Path,
        original_name: &str,
    ) -> ClipbeeResult<PathBuf> {
        let ext = upload_extension(original_name).ok_or_else(|| {
            ClipbeeError::input(format!(
                "Unsupported file type: {original_name} (expected one of {})",
                ALLOWED_UPLOAD_EXTENSIONS.join(", ")
            ))
        })?;

        let metadata = tokio::fs::metadata(source).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ClipbeeError::FileNotFound {
                    path: source.to_path_buf(),
                }
            } else {
                e.into()
            }
        })?;
        if metadata.len() > self.max_upload_bytes() {
            return Err(ClipbeeError::input(format!(
                "{original_name} is {} bytes, limit is {}",
                metadata.len(),
                self.max_upload_bytes()
            )));
        }

        let session_dir = self.layout().session_dir(session_id)?;
        tokio::fs::create_dir_all(&session_dir).await?;
        let stored = session_dir.join(format!("{}.{ext}", uuid::Uuid::new_v4()));
        tokio::fs::copy(source, &stored).await?;

        tracing::info!(
            session = session_id,
            file = original_name,
            stored = %stored.display(),
            bytes = metadata.len(),
            "Imported upload"
        );
        Ok(stored)
    }

    /// Files currently stored for a session, sorted by path.
    pub fn session_uploads(&self, session_id: &str) -> ClipbeeResult<Vec<PathBuf>> {
        let dir = self.layout().session_dir(session_id)?;
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        files.sort();
        Ok(files)
    }

    /// Delete consumed source files. Best-effort.
    pub async fn discard_uploads(&self, paths: &[PathBuf]) {
        for path in paths {
            match tokio::fs::remove_file(path).await {
                Ok(()) => tracing::debug!(path = %path.display(), "Discarded source upload"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => swallow_cleanup(ClipbeeError::cleanup(path, e.to_string())),
            }
        }
    }
}
