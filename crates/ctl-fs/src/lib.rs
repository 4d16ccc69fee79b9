//! Filesystem layer for the Control Center compiler
//!
//! Provides normalized paths, atomic writes with advisory locking and
//! format-agnostic loading of configuration documents.

pub mod checksum;
pub mod config;
pub mod error;
pub mod io;
pub mod path;

pub use config::{ConfigStore, Format};
pub use error::{Error, Result};
pub use io::RobustnessConfig;
pub use path::NormalizedPath;
