//! Schema registry, validation and cross-field invariants
//!
//! Configuration trees are validated twice: once before template
//! substitution against a relaxed variant of each schema, and once after
//! against the original schema plus an [`InvariantSet`] of checks that a
//! schema cannot express.

pub mod embedded;
pub mod error;
pub mod invariants;
pub mod registry;
pub mod relax;
pub mod validator;

pub use embedded::EmbeddedSchemas;
pub use error::{Error, Result};
pub use invariants::{Invariant, InvariantKind, InvariantSet, InvariantViolation, Severity};
pub use registry::SchemaRegistry;
pub use relax::{PLACEHOLDER_MIN_LENGTH, build_pre_substitution_variant};
pub use validator::{Phase, Validator, validate};
