//! Error types shared across ClipBee crates.

use std::path::PathBuf;

/// Top-level error type for ClipBee operations.
///
/// The first five variants are the render taxonomy: `Input` and `Encode`
/// are always fatal, `Probe` is fatal during a render but tolerated when
/// listing uploads, `Composite` only escapes the compositor when the
/// concatenation fallback also fails, and `Cleanup` is logged and dropped.
#[derive(Debug, thiserror::Error)]
pub enum ClipbeeError {
    #[error("Invalid input: {message}")]
    Input { message: String },

    #[error("Probe failed for {path}: {message}")]
    Probe { path: PathBuf, message: String },

    #[error("Encode error: {message}")]
    Encode { message: String },

    #[error("Composite error: {message}")]
    Composite { message: String },

    #[error("Cleanup failed for {path}: {message}")]
    Cleanup { path: PathBuf, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Encoding engine unavailable: {message}")]
    EngineUnavailable { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using ClipbeeError.
pub type ClipbeeResult<T> = Result<T, ClipbeeError>;

impl ClipbeeError {
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input {
            message: msg.into(),
        }
    }

    pub fn probe(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Probe {
            path: path.into(),
            message: msg.into(),
        }
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode {
            message: msg.into(),
        }
    }

    pub fn composite(msg: impl Into<String>) -> Self {
        Self::Composite {
            message: msg.into(),
        }
    }

    pub fn cleanup(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Cleanup {
            path: path.into(),
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn engine_unavailable(msg: impl Into<String>) -> Self {
        Self::EngineUnavailable {
            message: msg.into(),
        }
    }

    /// Whether this error aborts a render outright.
    ///
    /// Only `Cleanup` is non-fatal; everything else rejects the render
    /// with its message attached.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Cleanup { .. })
    }
}

/// Log a best-effort cleanup failure and swallow it.
pub fn swallow_cleanup(err: ClipbeeError) {
    tracing::warn!(error = %err, "Ignoring cleanup failure");
}
