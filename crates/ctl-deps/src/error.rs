//! Error types for ctl-deps

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unknown platform '{platform}'")]
    UnknownPlatform { platform: String },

    #[error("Invalid variant key '{dimension}'")]
    UnknownVariantDimension { dimension: String },

    #[error("Invalid variant value '{value}' for key '{dimension}'")]
    InvalidVariantValue { dimension: String, value: String },

    #[error("Variant keys {dimensions:?} must be zipped, but values correspond to indices {indices:?}")]
    ZipInconsistent {
        dimensions: Vec<String>,
        indices: Vec<usize>,
    },

    #[error("Invalid zip group {group:?}: {reason}")]
    InvalidZipGroup { group: Vec<String>, reason: String },

    #[error("Invalid variant definition: {0}")]
    InvalidVariantSpace(String),

    #[error("Failed to parse selector '{selector}' at offset {offset}: {message}")]
    SelectorParse {
        selector: String,
        offset: usize,
        message: String,
    },

    #[error("Failed to evaluate selector '{selector}': {message}")]
    SelectorEval { selector: String, message: String },

    #[error("Invalid dependency definition: {0}")]
    InvalidDependency(String),

    #[error("Invalid optional dependency group: {name}")]
    UnknownOptionalGroup { name: String },

    #[error("Incompatible optional dependency groups: {groups:?}. {description}")]
    IncompatibleOptionalGroups {
        groups: Vec<String>,
        description: String,
    },

    #[error("Dependency '{name}' not installable from any source. Available sources are: {available:?}")]
    Unsatisfiable { name: String, available: Vec<String> },
}
