//! Error types for ctl-core

use serde::Serialize;

use crate::hooks::Stage;
use ctl_meta::Phase;

/// Result type for ctl-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while compiling or synchronizing a control center
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed document or a path defined twice
    #[error("Load error at '{path}': {message}")]
    Load { path: String, message: String },

    /// A value does not match its schema
    #[error("Schema validation failed ({phase}) at '{path}': {message}")]
    SchemaValidation {
        phase: Phase,
        path: String,
        message: String,
    },

    /// Two values that must agree do not
    #[error("Invariant '{invariant}' violated between '{first}' and '{second}': {message}")]
    CrossFieldInvariant {
        invariant: String,
        first: String,
        second: String,
        message: String,
    },

    /// Circular reference, missing path or failing template function
    #[error("Template resolution failed at '{path}': {message}")]
    TemplateResolution { path: String, message: String },

    /// Unreachable or malformed external resource
    #[error("External reference '{reference}' failed: {message}")]
    ExternalReference { reference: String, message: String },

    /// Bad variant override, zip inconsistency or unsatisfiable dependency
    #[error("Variant resolution failed at '{path}': {source}")]
    VariantResolution {
        path: String,
        #[source]
        source: ctl_deps::Error,
    },

    /// Filesystem failure while applying a change plan
    #[error("Reconciliation failed at '{path}': {message}")]
    Reconciliation { path: String, message: String },

    /// A lifecycle callback returned an error
    #[error("Hook failed during {stage}: {message}")]
    Hook { stage: Stage, message: String },

    /// Any other error, attributed to the compile stage it happened in
    #[error("Compile failed during {stage}: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Fs(#[from] ctl_fs::Error),

    #[error(transparent)]
    Content(#[from] ctl_content::Error),

    #[error(transparent)]
    Meta(ctl_meta::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<ctl_meta::Error> for Error {
    fn from(err: ctl_meta::Error) -> Self {
        match err {
            ctl_meta::Error::SchemaValidation {
                phase,
                path,
                message,
            } => Self::SchemaValidation {
                phase,
                path,
                message,
            },
            ctl_meta::Error::CrossFieldInvariant {
                invariant,
                first,
                second,
                message,
            } => Self::CrossFieldInvariant {
                invariant,
                first,
                second,
                message,
            },
            other => Self::Meta(other),
        }
    }
}

/// Summary of a failed compile
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompileReport {
    /// Stage the failure happened in, when known
    pub stage: Option<Stage>,
    /// Dotted tree path or file path the failure is about
    pub path: Option<String>,
    pub message: String,
}

impl Error {
    /// Attribute this error to `stage` unless it already carries one.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            Self::Stage { .. } | Self::Hook { .. } => self,
            other => Self::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Flatten into a [`CompileReport`].
    pub fn report(&self) -> CompileReport {
        match self {
            Self::Stage { stage, source } => CompileReport {
                stage: Some(*stage),
                ..source.report()
            },
            Self::Hook { stage, message } => CompileReport {
                stage: Some(*stage),
                path: None,
                message: message.clone(),
            },
            other => CompileReport {
                stage: None,
                path: other.path(),
                message: other.to_string(),
            },
        }
    }

    fn path(&self) -> Option<String> {
        match self {
            Self::Load { path, .. }
            | Self::SchemaValidation { path, .. }
            | Self::TemplateResolution { path, .. }
            | Self::VariantResolution { path, .. }
            | Self::Reconciliation { path, .. } => Some(path.clone()),
            Self::CrossFieldInvariant { first, .. } => Some(first.clone()),
            Self::ExternalReference { reference, .. } => Some(reference.clone()),
            Self::Fs(ctl_fs::Error::Io { path, .. }) => Some(path.display().to_string()),
            Self::Stage { source, .. } => source.path(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn meta_validation_errors_keep_their_kind() {
        let err: Error = ctl_meta::Error::SchemaValidation {
            phase: Phase::PostSubstitution,
            path: "project.name".into(),
            message: "expected string".into(),
        }
        .into();
        assert!(matches!(err, Error::SchemaValidation { .. }));
    }

    #[test]
    fn report_carries_stage_and_path() {
        let err = Error::TemplateResolution {
            path: "pypkg_main.name".into(),
            message: "circular reference".into(),
        }
        .in_stage(Stage::Templating);

        assert_eq!(
            err.report(),
            CompileReport {
                stage: Some(Stage::Templating),
                path: Some("pypkg_main.name".into()),
                message: "Template resolution failed at 'pypkg_main.name': circular reference"
                    .into(),
            }
        );
    }

    #[test]
    fn hook_errors_are_not_rewrapped() {
        let err = Error::Hook {
            stage: Stage::Load,
            message: "nope".into(),
        }
        .in_stage(Stage::Templating);
        assert_eq!(err.report().stage, Some(Stage::Load));
    }
}
