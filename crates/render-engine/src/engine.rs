//! Encoding engine process boundary.
//!
//! Every probe, encode, and composite step is one spawned `ffmpeg` or
//! `ffprobe` process. [`ProcessRunner`] is the seam: the system runner
//! spawns real processes, tests substitute a scripted one.

use std::fmt;
use std::process::Stdio;
use std::sync::Arc;

use clipbee_common::config::RenderConfig;

/// Longest stderr tail kept in an error.
const MAX_DIAGNOSTIC_CHARS: usize = 4000;

/// Captured output of a successful process.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Failure of one engine invocation.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The binary could not be started at all.
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process ran and reported failure.
    #[error("{program} exited with {status}: {stderr}")]
    Exited {
        program: String,
        status: String,
        stderr: String,
    },
}

impl EngineError {
    /// Whether the engine itself ran and rejected the work.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Exited { .. })
    }
}

/// Runs one external program to completion.
#[async_trait::async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<ProcessOutput, EngineError>;
}

/// Spawns real processes with `tokio::process`.
///
/// Children are killed if the awaiting future is dropped, so aborting a
/// render task does not leave encoders running.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait::async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<ProcessOutput, EngineError> {
        let started = std::time::Instant::now();
        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| EngineError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        tracing::debug!(
            program,
            status = %output.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Engine process finished"
        );

        if !output.status.success() {
            return Err(EngineError::Exited {
                program: program.to_string(),
                status: output.status.to_string(),
                stderr: tail(stderr.trim(), MAX_DIAGNOSTIC_CHARS),
            });
        }

        Ok(ProcessOutput {
            stdout: output.stdout,
            stderr,
        })
    }
}

/// Last `max_chars` characters of `text`.
fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let skipped: String = text.chars().skip(count - max_chars).collect();
    format!("...{skipped}")
}

/// Handle to the installed encoding engine.
#[derive(Clone)]
pub struct Engine {
    runner: Arc<dyn ProcessRunner>,
    ffmpeg: String,
    ffprobe: String,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("ffmpeg", &self.ffmpeg)
            .field("ffprobe", &self.ffprobe)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Engine backed by real processes, binaries taken from config.
    pub fn system(config: &RenderConfig) -> Self {
        Self::with_runner(
            Arc::new(SystemRunner),
            config.ffmpeg_path.clone(),
            config.ffprobe_path.clone(),
        )
    }

    pub fn with_runner(
        runner: Arc<dyn ProcessRunner>,
        ffmpeg: impl Into<String>,
        ffprobe: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    pub fn ffmpeg_program(&self) -> &str {
        &self.ffmpeg
    }

    pub fn ffprobe_program(&self) -> &str {
        &self.ffprobe
    }

    pub async fn ffmpeg(&self, args: &[String]) -> Result<ProcessOutput, EngineError> {
        tracing::debug!(args = ?args, "Running ffmpeg");
        self.runner.run(&self.ffmpeg, args).await
    }

    pub async fn ffprobe(&self, args: &[String]) -> Result<ProcessOutput, EngineError> {
        self.runner.run(&self.ffprobe, args).await
    }

    /// Whether both binaries resolve on this system.
    pub fn is_available(&self) -> bool {
        which::which(&self.ffmpeg).is_ok() && which::which(&self.ffprobe).is_ok()
    }
}
