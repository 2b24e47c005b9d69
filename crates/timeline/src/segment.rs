//! Trimmed segments of source clips.
//!
//! A segment selects `[source_start, source_end)` from a source clip and
//! gives it a position in the render order. Every segment is at least
//! [`MIN_SEGMENT_SECS`] long once resolved.

use serde::{Deserialize, Serialize};

/// Shortest segment the pipeline will encode.
pub const MIN_SEGMENT_SECS: f64 = 0.05;

/// Requested trim bounds within a source.
///
/// `end = None` means "until the end of the source".
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TrimRange {
    pub start: f64,
    pub end: Option<f64>,
}

/// Trim bounds after clamping against the source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedTrim {
    /// Seek position in the source (seconds, `>= 0`).
    pub start: f64,
    /// Length to encode (seconds, `>= MIN_SEGMENT_SECS`).
    pub duration: f64,
}

impl TrimRange {
    pub fn new(start: f64, end: Option<f64>) -> Self {
        Self { start, end }
    }

    /// The whole source.
    pub fn full() -> Self {
        Self::default()
    }

    /// Clamp against a source of `source_duration` seconds.
    ///
    /// `start` is floored at zero, a missing (or non-positive) `end` falls
    /// back to the source duration, `end` never precedes `start`, and the
    /// resulting duration is floored at [`MIN_SEGMENT_SECS`]. Non-finite
    /// inputs are treated as unset.
    pub fn resolve(&self, source_duration: f64) -> ResolvedTrim {
        let start = finite_or_zero(self.start).max(0.0);
        let end = self
            .end
            .filter(|e| e.is_finite() && *e > 0.0)
            .unwrap_or_else(|| finite_or_zero(source_duration))
            .max(start);
        ResolvedTrim {
            start,
            duration: (end - start).max(MIN_SEGMENT_SECS),
        }
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// A trimmed source clip placed in the render order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineSegment {
    /// Segment identifier.
    pub id: String,

    /// Identifier of the backing [`crate::SourceClip`].
    pub clip_id: String,

    /// Trim start within the source.
    pub source_start: f64,

    /// Trim end within the source.
    pub source_end: f64,

    /// Zero-based position in render order.
    pub position: usize,
}

impl TimelineSegment {
    /// Create a segment, clamping the trim to a valid range.
    pub fn new(
        id: impl Into<String>,
        clip_id: impl Into<String>,
        source_start: f64,
        source_end: f64,
        position: usize,
    ) -> Self {
        let start = finite_or_zero(source_start).max(0.0);
        let end = finite_or_zero(source_end).max(start + MIN_SEGMENT_SECS);
        Self {
            id: id.into(),
            clip_id: clip_id.into(),
            source_start: start,
            source_end: end,
            position,
        }
    }

    /// Length of the segment in seconds.
    pub fn duration(&self) -> f64 {
        self.source_end - self.source_start
    }

    pub fn trim(&self) -> TrimRange {
        TrimRange::new(self.source_start, Some(self.source_end))
    }

    /// Check the segment invariants. Returns a list of violations.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !(self.source_start >= 0.0) {
            errors.push(format!(
                "Segment {}: start {} is negative",
                self.id, self.source_start
            ));
        }
        if !(self.source_end >= self.source_start) {
            errors.push(format!(
                "Segment {}: end {} precedes start {}",
                self.id, self.source_end, self.source_start
            ));
        }
        // Small epsilon: start/end round-trip through JSON decimals.
        if !(self.duration() + 1e-9 >= MIN_SEGMENT_SECS) {
            errors.push(format!(
                "Segment {}: duration {:.3}s is below the {MIN_SEGMENT_SECS}s floor",
                self.id,
                self.duration()
            ));
        }
        errors
    }
}

/// Sort segments by position and renumber them densely from zero.
pub fn normalize_order(segments: &mut [TimelineSegment]) {
    segments.sort_by_key(|s| s.position);
    for (index, segment) in segments.iter_mut().enumerate() {
        segment.position = index;
    }
}
