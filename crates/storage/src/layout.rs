//! Directory layout under the storage root.

use std::path::{Path, PathBuf};

use clipbee_common::error::{ClipbeeError, ClipbeeResult};

/// Longest accepted session identifier.
pub const MAX_SESSION_ID_LEN: usize = 64;

/// Resolved storage directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
    uploads: PathBuf,
    outputs: PathBuf,
    work: PathBuf,
}

impl StorageLayout {
    /// A relative `root` is resolved against the working directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = absolute_path(root.into());
        Self {
            uploads: root.join("uploads"),
            outputs: root.join("output"),
            work: root.join("work"),
            root,
        }
    }

    /// Create all roots if missing.
    pub fn ensure(&self) -> ClipbeeResult<()> {
        for dir in [&self.uploads, &self.outputs, &self.work] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn uploads_root(&self) -> &Path {
        &self.uploads
    }

    pub fn outputs_root(&self) -> &Path {
        &self.outputs
    }

    pub fn work_root(&self) -> &Path {
        &self.work
    }

    /// Roots visited by the sweep.
    pub fn swept_roots(&self) -> [&Path; 3] {
        [&self.uploads, &self.outputs, &self.work]
    }

    /// Upload directory for one session.
    pub fn session_dir(&self, session_id: &str) -> ClipbeeResult<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.uploads.join(session_id))
    }

    /// Scratch directory for one render.
    pub fn scratch_dir(&self, render_id: &str) -> ClipbeeResult<PathBuf> {
        validate_session_id(render_id)?;
        Ok(self.work.join(render_id))
    }

    /// Final location of a render's output.
    pub fn output_path(&self, render_id: &str, extension: &str) -> PathBuf {
        self.outputs.join(format!("clipbee-{render_id}.{extension}"))
    }
}

/// Anchor a relative path at the current working directory.
///
/// Left unchanged when the working directory cannot be read.
pub fn absolute_path(path: impl Into<PathBuf>) -> PathBuf {
    let path = path.into();
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path,
    }
}

/// Session and render identifiers are used as single path components.
///
/// Accepts `[A-Za-z0-9_-]{1,64}`.
pub fn validate_session_id(id: &str) -> ClipbeeResult<()> {
    let valid = !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ClipbeeError::input(format!("Invalid session id: {id:?}")))
    }
}
