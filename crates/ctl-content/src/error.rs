//! Error types for ctl-content

/// Result type for ctl-content operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ctl-content operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Path not found: {path}")]
    PathNotFound { path: String },

    #[error("Cannot set {path}: {reason}")]
    PathSetFailed { path: String, reason: String },

    #[error(transparent)]
    Conflict(#[from] crate::merge::MergeConflict),
}
