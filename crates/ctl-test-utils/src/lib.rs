//! Shared test fixtures for the Control Center workspace.
//!
//! Dev-dependency only, never published.
//!
//! # Modules
//!
//! - [`control`]: [`ControlRepo`](control::ControlRepo) builder for a repository with a control directory
//! - [`fixtures`]: canned configuration documents

pub mod control;
pub mod fixtures;

pub use control::ControlRepo;
