//! Transition capability probe.
//!
//! The set of `xfade` transitions is a property of the installed ffmpeg
//! build, so it is queried once and kept for the life of the process.

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use clipbee_timeline::TransitionKind;
use tokio::sync::OnceCell;

use crate::engine::Engine;

/// Effect used when the requested one is not supported.
pub const DEFAULT_TRANSITION: &str = "fade";

/// Transition effects supported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionSet {
    names: BTreeSet<String>,
}

impl TransitionSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Engine effect to use for `kind`.
    ///
    /// `None` means no transition was asked for. Any effect missing from
    /// the set resolves to [`DEFAULT_TRANSITION`].
    pub fn resolve<'a>(&self, kind: &'a TransitionKind) -> Option<&'a str> {
        let effect = kind.engine_effect()?;
        if self.contains(effect) {
            Some(effect)
        } else {
            tracing::debug!(requested = effect, fallback = DEFAULT_TRANSITION, "Transition not supported");
            Some(DEFAULT_TRANSITION)
        }
    }
}

/// Parse the `transition` option constants out of `ffmpeg -h filter=xfade`.
///
/// The option line looks like `transition <int> ... (default fade)` and is
/// followed by one line per named constant until the next option.
pub fn parse_xfade_help(text: &str) -> TransitionSet {
    let mut names = BTreeSet::new();
    let mut in_transition = false;

    for line in text.lines() {
        let mut tokens = line.split_whitespace();
        let (Some(first), second) = (tokens.next(), tokens.next()) else {
            continue;
        };
        let is_option = second.is_some_and(|t| t.starts_with('<'));

        if is_option {
            if in_transition {
                break;
            }
            in_transition = first == "transition";
            continue;
        }

        if in_transition
            && first != "custom"
            && first.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            names.insert(first.to_string());
        }
    }

    TransitionSet { names }
}

/// Lazily populated transition set shared by every render.
#[derive(Debug, Default)]
pub struct TransitionCapabilities {
    cell: OnceCell<TransitionSet>,
}

static PROCESS: OnceLock<Arc<TransitionCapabilities>> = OnceLock::new();

impl TransitionCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache shared by the whole process.
    pub fn process() -> Arc<Self> {
        Arc::clone(PROCESS.get_or_init(|| Arc::new(Self::new())))
    }

    /// Supported transitions, querying the engine on first use.
    ///
    /// Concurrent first callers wait for a single query. A failed query
    /// caches an empty set, so every request resolves to the default.
    pub async fn get(&self, engine: &Engine) -> &TransitionSet {
        self.cell
            .get_or_init(|| async {
                let set = query(engine).await;
                tracing::info!(count = set.len(), "Probed supported transitions");
                set
            })
            .await
    }

    /// The cached set, if it has been populated.
    pub fn cached(&self) -> Option<&TransitionSet> {
        self.cell.get()
    }
}

async fn query(engine: &Engine) -> TransitionSet {
    let args: Vec<String> = ["-hide_banner", "-h", "filter=xfade"]
        .iter()
        .map(|a| a.to_string())
        .collect();
    match engine.ffmpeg(&args).await {
        Ok(output) => parse_xfade_help(&output.stdout_text()),
        Err(e) => {
            tracing::warn!(error = %e, "Transition capability query failed");
            TransitionSet::default()
        }
    }
}
