//! Rectangular section geometry and quarter-section subdivision.

mod section_box;

pub use section_box::{Direction, SectionBox};
