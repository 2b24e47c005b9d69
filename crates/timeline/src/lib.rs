//! ClipBee Timeline Model
//!
//! Defines the data contracts shared by the render pipeline:
//! - **Media:** Probed metadata of an uploaded source clip
//! - **Segments:** Trimmed sub-ranges of sources placed in render order
//! - **Requests:** What to render (clips, transition, format, geometry)
//!   and what a finished render hands back
//!
//! All times are seconds as `f64`.

pub mod media;
pub mod request;
pub mod segment;

pub use media::*;
pub use request::*;
pub use segment::*;
