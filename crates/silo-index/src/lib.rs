//! # Silo Index
//!
//! Turns a folder tree into versioned file rows and segment plans:
//!
//! - [`scanner`]: deterministic depth-first traversal with streaming
//!   SHA-256 and symlink containment
//! - [`diff`]: streaming merge-join change detection between versions
//! - [`segmenter`]: fixed-size slicing, small-file packing, redundancy
//!   copy planning, subject assignment
//! - [`pack`]: the packed-segment wire layout
//! - [`redundancy`]: reversible per-copy byte perturbation
//! - [`payload`]: re-reading segment plaintext at post time

pub mod diff;
pub mod error;
pub mod pack;
pub mod payload;
pub mod redundancy;
pub mod scanner;
pub mod segmenter;

pub use diff::{ChangeEvent, PriorFile};
pub use error::{IndexError, Result};
pub use scanner::{ScanItem, ScannedFile};
pub use segmenter::{Packer, SegmentPlanner};
