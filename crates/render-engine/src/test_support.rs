//! Scripted engine for unit tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::engine::{Engine, EngineError, ProcessOutput, ProcessRunner};

/// Trimmed `ffmpeg -h filter=xfade` output.
pub(crate) const XFADE_HELP: &str = "\
Filter xfade
  Cross fade one video with another video.
    slice threading supported
    Inputs:
       #0: main (video)
       #1: xfade (video)
    Outputs:
       #0: default (video)
xfade AVOptions:
   transition        <int>        ..FV....... set cross fade transition (from -1 to 57) (default fade)
     custom          -1           ..FV....... custom transition
     fade            0            ..FV....... fade transition
     wipeleft        1            ..FV....... wipe left transition
     slideleft       5            ..FV....... slide left transition
     dissolve        12           ..FV....... dissolve transition
     pixelize        13           ..FV....... pixelize transition
   duration          <duration>   ..FV....... set cross fade duration (default 1)
   offset            <duration>   ..FV....... set cross fade start relative to first input (default 0)
";

pub(crate) fn probe_json(duration: f64, width: u32, height: u32, has_audio: bool) -> String {
    let audio = if has_audio {
        r#",{"codec_type":"audio","codec_name":"aac"}"#
    } else {
        ""
    };
    format!(
        r#"{{"streams":[{{"codec_type":"video","codec_name":"h264","width":{width},"height":{height}}}{audio}],
            "format":{{"duration":"{duration:.6}","size":"1024","bit_rate":"800000"}}}}"#
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallKind {
    Help,
    Normalize,
    Transition,
    Concat,
    Single,
}

fn classify(args: &[String]) -> CallKind {
    let has = |flag: &str| args.iter().any(|a| a == flag);
    if has("-h") {
        CallKind::Help
    } else if has("-vf") {
        CallKind::Normalize
    } else if has("-filter_complex") {
        CallKind::Transition
    } else if args.windows(2).any(|w| w[0] == "-f" && w[1] == "concat") {
        CallKind::Concat
    } else {
        CallKind::Single
    }
}

#[derive(Default)]
struct FakeState {
    probes: HashMap<PathBuf, String>,
    ffmpeg_calls: Vec<(CallKind, Vec<String>)>,
    failing_sources: HashSet<PathBuf>,
    delays: HashMap<PathBuf, Duration>,
    fail_transition: bool,
    fail_concat: bool,
    drift: f64,
    output_duration: Option<f64>,
    help_queries: usize,
    in_flight: usize,
    max_in_flight: usize,
}

/// Handle for scripting and inspecting a fake engine.
#[derive(Clone, Default)]
pub(crate) struct FakeEngine {
    state: Arc<Mutex<FakeState>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engine(&self) -> Engine {
        Engine::with_runner(
            Arc::new(FakeRunner {
                state: Arc::clone(&self.state),
            }),
            "ffmpeg",
            "ffprobe",
        )
    }

    fn with_state(&self, f: impl FnOnce(&mut FakeState)) {
        f(&mut self.state.lock().unwrap());
    }

    /// Added to every normalized duration, imitating encoder rounding.
    pub fn with_drift(self, drift: f64) -> Self {
        self.with_state(|s| s.drift = drift);
        self
    }

    /// Duration reported for composite outputs.
    pub fn with_output_duration(self, duration: f64) -> Self {
        self.with_state(|s| s.output_duration = Some(duration));
        self
    }

    pub fn add_probe(&self, path: &Path, json: String) {
        self.with_state(|s| {
            s.probes.insert(path.to_path_buf(), json);
        });
    }

    pub fn fail_normalize(&self, source: &Path) {
        self.with_state(|s| {
            s.failing_sources.insert(source.to_path_buf());
        });
    }

    pub fn delay_normalize(&self, source: &Path, delay: Duration) {
        self.with_state(|s| {
            s.delays.insert(source.to_path_buf(), delay);
        });
    }

    pub fn fail_transition(&self) {
        self.with_state(|s| s.fail_transition = true);
    }

    pub fn fail_concat(&self) {
        self.with_state(|s| s.fail_concat = true);
    }

    pub fn help_queries(&self) -> usize {
        self.state.lock().unwrap().help_queries
    }

    pub fn max_concurrent_normalizations(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }

    /// Arguments of every ffmpeg call of `kind`, in call order.
    pub fn calls(&self, kind: CallKind) -> Vec<Vec<String>> {
        self.state
            .lock()
            .unwrap()
            .ffmpeg_calls
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub fn call_kinds(&self) -> Vec<CallKind> {
        self.state
            .lock()
            .unwrap()
            .ffmpeg_calls
            .iter()
            .map(|(k, _)| *k)
            .collect()
    }
}

struct FakeRunner {
    state: Arc<Mutex<FakeState>>,
}

fn rejected(program: &str, stderr: &str) -> EngineError {
    EngineError::Exited {
        program: program.to_string(),
        status: "exit status: 1".to_string(),
        stderr: stderr.to_string(),
    }
}

fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

#[async_trait::async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<ProcessOutput, EngineError> {
        let last = PathBuf::from(args.last().cloned().unwrap_or_default());

        if program == "ffprobe" {
            let json = self.state.lock().unwrap().probes.get(&last).cloned();
            return match json {
                Some(json) => Ok(ProcessOutput {
                    stdout: json.into_bytes(),
                    stderr: String::new(),
                }),
                None => Err(rejected(program, "Invalid data found when processing input")),
            };
        }

        let kind = classify(args);
        let source = value_after(args, "-i").map(PathBuf::from).unwrap_or_default();
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.ffmpeg_calls.push((kind, args.to_vec()));
            match kind {
                CallKind::Help => {
                    state.help_queries += 1;
                    return Ok(ProcessOutput {
                        stdout: XFADE_HELP.as_bytes().to_vec(),
                        stderr: String::new(),
                    });
                }
                CallKind::Normalize => {
                    state.in_flight += 1;
                    state.max_in_flight = state.max_in_flight.max(state.in_flight);
                    state.delays.get(&source).copied()
                }
                CallKind::Transition if state.fail_transition => {
                    return Err(rejected(program, "Error initializing complex filters"));
                }
                CallKind::Concat if state.fail_concat => {
                    return Err(rejected(program, "Impossible to open concat list"));
                }
                _ => None,
            }
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if kind == CallKind::Normalize {
            state.in_flight -= 1;
            if state.failing_sources.contains(&source) {
                return Err(rejected(program, "Invalid data found when processing input"));
            }
        }

        std::fs::write(&last, b"fake media").map_err(|source| EngineError::Spawn {
            program: program.to_string(),
            source,
        })?;

        let duration = match kind {
            CallKind::Normalize => value_after(args, "-t")
                .and_then(|t| t.parse::<f64>().ok())
                .map(|t| t + state.drift),
            _ => state.output_duration,
        };
        if let Some(duration) = duration {
            state
                .probes
                .insert(last, probe_json(duration, 1920, 1080, true));
        }

        Ok(ProcessOutput::default())
    }
}
