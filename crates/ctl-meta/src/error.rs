//! Error types for ctl-meta

use crate::validator::Phase;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Filesystem error: {0}")]
    Fs(#[from] ctl_fs::Error),

    #[error("Schema not found: {name}")]
    SchemaNotFound { name: String },

    #[error("Invalid schema '{name}': {message}")]
    InvalidSchema { name: String, message: String },

    #[error("Schema validation failed ({phase}) at '{path}': {message}")]
    SchemaValidation {
        phase: Phase,
        path: String,
        message: String,
    },

    #[error("Invariant '{invariant}' violated between '{first}' and '{second}': {message}")]
    CrossFieldInvariant {
        invariant: String,
        first: String,
        second: String,
        message: String,
    },
}
