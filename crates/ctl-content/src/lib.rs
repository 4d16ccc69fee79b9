//! Tree addressing, merging and diffing for the Control Center compiler
//!
//! Configuration trees are plain `serde_json::Value`s. This crate provides
//! dotted path access into them, the policy-driven merge used when several
//! documents contribute to one tree, and the structural diff between two
//! compiled trees.

pub mod diff;
pub mod error;
pub mod merge;
pub mod path;
pub mod select;

pub use diff::{DiffKind, ScalarChange, ScalarDiff, unified_text_diff};
pub use error::{Error, Result};
pub use merge::{MergeConflict, MergePolicy, merge, merge_into};
pub use path::{PathSegment, format_path, get_at_path, get_at_path_mut, parse_path, remove_at_path, set_at_path};
pub use select::{is_under, segment_matches, select};
