//! ClipBee Render Engine
//!
//! Batch pipeline that merges trimmed source clips into one output file
//! with optional crossfades between adjacent clips.
//!
//! # Pipeline Architecture
//!
//! ```text
//! clip 0 ── probe ── normalize ──┐
//! clip 1 ── probe ── normalize ──┤   (bounded parallel, request order kept)
//! clip N ── probe ── normalize ──┘
//!                                │
//!                                ├── xfade chain ──(rejected)──┐
//!                                │                             │
//!                                └── concat ◄──────────────────┘
//!                                        │
//!                                        ▼
//!                          output/clipbee-<render>.<ext>
//!                               (scheduled expiry)
//! ```
//!
//! Every engine call goes through [`engine::ProcessRunner`], one spawned
//! `ffmpeg`/`ffprobe` process per step.

pub mod capability;
pub mod codec;
pub mod command;
pub mod compositor;
pub mod engine;
pub mod normalize;
pub mod pipeline;
pub mod probe;

#[cfg(test)]
pub(crate) mod test_support;

pub use capability::{TransitionCapabilities, TransitionSet, DEFAULT_TRANSITION};
pub use compositor::{CompositeOutcome, CompositeStrategy};
pub use engine::{Engine, EngineError, ProcessRunner};
pub use pipeline::*;
pub use probe::{probe_lenient, probe_media};
