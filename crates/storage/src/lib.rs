//! ClipBee Storage Lifecycle
//!
//! Owns every file the render pipeline leaves on disk:
//!
//! ```text
//! <root>/
//!   uploads/<session>/<uuid>.<ext>   session-scoped sources
//!   output/clipbee-<render>.<ext>    finished renders (flat)
//!   work/<render>/...                per-render scratch (intermediates)
//! ```
//!
//! Files older than the retention window are removed by a periodic sweep
//! (also run once at startup). Sessions can be wiped on demand, and each
//! finished render schedules its own deletion.

pub mod layout;
pub mod lifecycle;
pub mod uploads;

pub use layout::*;
pub use lifecycle::*;
pub use uploads::*;
