//! Compile pipeline and reconciliation for the Control Center
//!
//! This crate turns a directory of YAML documents into one validated,
//! fully resolved configuration tree and then brings the repository on disk
//! in line with it:
//!
//! - **Loading**: discovery, multi-document parsing and `!ext` references
//! - **Templating**: `${{ expr }}` resolution over a [`NestedStore`]
//! - **Augmentation**: derived unit paths and resolved environments
//! - **Validation**: schemas before and after substitution, plus invariants
//! - **Sync**: generated entities, change classification, apply and `copy_*` duplicates
//!
//! # Architecture
//!
//! ```text
//!                    ctl-core
//!                        |
//!     +---------+--------+--------+---------+
//!     |         |                 |         |
//!  ctl-fs  ctl-content        ctl-meta  ctl-deps
//! ```

pub mod apply;
pub mod augment;
pub mod cache;
pub mod copy;
pub mod diff;
pub mod entity;
pub mod error;
pub mod external;
pub mod generate;
pub mod hooks;
pub mod loader;
pub mod logging;
pub mod pipeline;
pub mod snapshot;
pub mod store;
pub mod sync;
pub mod template;

pub use apply::{Action, AppliedAction, ApplyEngine, ApplyReport};
pub use augment::{AugmentStep, EnvironmentStep, UnitPathsStep, default_steps};
pub use cache::CacheStore;
pub use copy::{CopyEngine, CopyRule};
pub use diff::{ChangePlan, ChangeReport, DiffEngine};
pub use entity::{ChangeKind, EntitySubtype, EntityType, GeneratedEntity};
pub use error::{CompileReport, Error, Result};
pub use external::{ExternalResolver, Fetcher, FileFetcher};
pub use generate::{DeclaredFileGenerator, Generator, SnapshotGenerator};
pub use hooks::{HookPayload, HookTable, Stage};
pub use loader::{LoadedTree, Loader};
pub use logging::init_logging;
pub use pipeline::{CompiledTree, Compiler, CompilerOptions};
pub use snapshot::PreviousState;
pub use store::NestedStore;
pub use sync::{SyncOutcome, Synchronizer};
pub use template::TemplateContext;
