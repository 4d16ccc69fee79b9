//! Dependency and variant resolution
//!
//! Dependencies are declared once with per-source install specs and an
//! optional selector. Resolution picks the variant values for a build,
//! evaluates selectors against the platform and those variants, and buckets
//! every surviving dependency under the first source it can be installed from.
//!
//! # Example
//!
//! ```
//! use ctl_deps::{Dependency, DependencyResolver, Platform, ResolverOptions, VariantSpace};
//!
//! let deps = vec![
//!     Dependency::new("numpy").with_install("conda", "numpy").with_install("pip", "numpy"),
//!     Dependency::new("pywin32").with_install("pip", "pywin32").with_selector("win"),
//! ];
//!
//! let resolver = DependencyResolver::new(VariantSpace::empty());
//! let options = ResolverOptions::default()
//!     .with_platform(Platform::from_subdir("linux-64").unwrap())
//!     .with_source_priority(["apt", "pip", "conda"]);
//!
//! let resolved = resolver.resolve(&deps, &options).unwrap();
//! assert_eq!(resolved.sources(), vec!["pip"]);
//! assert_eq!(resolved.get("pip").unwrap()[0].name, "numpy");
//! ```

pub mod dependency;
pub mod error;
pub mod platform;
pub mod probe;
pub mod selector;
pub mod variant;
pub mod version;

pub use dependency::{
    Dependency, DependencyResolver, DependencySet, Extras, GroupBundle, OptionalGroup,
    ResolvedDependencies, ResolverOptions,
};
pub use error::{Error, Result};
pub use platform::Platform;
pub use probe::{CommandProbe, InstallProbe, NeverInstalled};
pub use selector::{Selector, SelectorEnv, SelectorValue};
pub use variant::{HostVersion, ResolvedVariants, VariantDimension, VariantSpace};
