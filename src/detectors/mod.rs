//! Named chart pattern detectors
//!
//! Each detector is a pure classifier over a fixed-size sliding window of
//! consecutive pivots. Overlapping windows are evaluated independently and
//! no deduplication happens across detectors.
//!
//! # Pattern Families
//!
//! - **Reversal**: Head & Shoulders (Top/Bottom), Double Top/Bottom
//! - **Continuation**: Triangles (symmetric/ascending/descending), Flags and Pennants

pub mod helpers;

pub mod double;
pub mod flag;
pub mod head_shoulders;
pub mod triangle;

// Re-export all detectors for convenience
pub use double::*;
pub use flag::*;
pub use head_shoulders::*;
pub use triangle::*;
