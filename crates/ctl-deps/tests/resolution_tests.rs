//! End-to-end dependency resolution over declared configuration

use std::collections::BTreeMap;

use ctl_deps::{
    Dependency, DependencyResolver, DependencySet, Error, Extras, HostVersion, NeverInstalled,
    Platform, ResolverOptions, VariantSpace,
};
use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::json;

fn platform(subdir: &str) -> Platform {
    Platform::from_subdir(subdir).unwrap()
}

fn project_dependencies() -> Vec<Dependency> {
    Dependency::list_from_value(&json!([
        {"name": "numpy", "install": {"conda": "numpy", "pip": "numpy"}},
        {"name": "libgl", "install": {"apt": "libgl1"}, "selector": "linux and not arm64"},
        {"name": "pywin32", "install": {"pip": "pywin32"}, "selector": "win"},
        {"name": "tomli", "install": {"pip": "tomli", "conda": "tomli"}, "selector": "python < 3.11"},
        {"name": "cuda-toolkit", "install": {"conda": "cuda"}, "selector": "gpu == 'cuda'", "variants": ["gpu"]}
    ]))
    .unwrap()
}

fn project_space() -> VariantSpace {
    VariantSpace::from_value(&json!({
        "variants": {
            "gpu": ["none", "cuda"],
            "python": ["3.10", "3.11", "3.12"]
        }
    }))
    .unwrap()
}

#[test]
fn source_fallback_prefers_first_available() {
    let deps = vec![
        Dependency::new("numpy")
            .with_install("conda", "numpy")
            .with_install("pip", "numpy"),
    ];
    let resolved = DependencyResolver::new(VariantSpace::empty())
        .resolve(
            &deps,
            &ResolverOptions::default()
                .with_platform(platform("linux-64"))
                .with_source_priority(["apt", "pip", "conda"]),
        )
        .unwrap();
    assert_eq!(resolved.sources(), ["pip"]);
}

#[rstest]
#[case("linux-64", json!({"pip": ["numpy", "tomli"], "apt": ["libgl"]}))]
#[case("linux-aarch64", json!({"pip": ["numpy", "tomli"], "apt": ["libgl"]}))]
#[case("osx-arm64", json!({"pip": ["numpy", "tomli"]}))]
#[case("win-64", json!({"pip": ["numpy", "pywin32", "tomli"]}))]
fn platform_selects_dependencies(#[case] subdir: &str, #[case] expected: serde_json::Value) {
    let resolved = DependencyResolver::new(project_space())
        .resolve(
            &project_dependencies(),
            &ResolverOptions::default().with_platform(platform(subdir)),
        )
        .unwrap();
    assert_eq!(resolved.names_by_source(), expected);
}

#[test]
fn variant_override_enables_gated_dependency() {
    let resolved = DependencyResolver::new(project_space())
        .resolve(
            &project_dependencies(),
            &ResolverOptions::default()
                .with_platform(platform("linux-64"))
                .with_override("gpu", "cuda")
                .with_override("python", "3.12"),
        )
        .unwrap();
    assert_eq!(
        resolved.names_by_source(),
        json!({"pip": ["numpy"], "conda": ["cuda-toolkit"], "apt": ["libgl"]})
    );
}

#[test]
fn host_version_drives_python_gates() {
    let resolved = DependencyResolver::new(project_space())
        .resolve(
            &project_dependencies(),
            &ResolverOptions::default()
                .with_platform(platform("osx-arm64"))
                .with_host(HostVersion::new("python", "3.12")),
        )
        .unwrap();
    assert_eq!(resolved.names_by_source(), json!({"pip": ["numpy"]}));
}

#[test]
fn excluded_source_drops_dependencies_naming_it() {
    let resolved = DependencyResolver::new(project_space())
        .resolve(
            &project_dependencies(),
            &ResolverOptions::default()
                .with_platform(platform("linux-64"))
                .with_exclude_sources(["conda"]),
        )
        .unwrap();
    assert_eq!(resolved.names_by_source(), json!({"apt": ["libgl"]}));
}

#[test]
fn unsatisfiable_dependency_names_its_sources() {
    let deps = vec![
        Dependency::new("winget-only")
            .with_install("winget", "x")
            .with_install("choco", "y"),
    ];
    let err = DependencyResolver::new(VariantSpace::empty())
        .with_probe(NeverInstalled)
        .resolve(
            &deps,
            &ResolverOptions::default().with_platform(platform("linux-64")),
        )
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Dependency 'winget-only' not installable from any source. Available sources are: [\"choco\", \"winget\"]"
    );
}

#[test]
fn zipped_dimensions_resolve_together() {
    let space = VariantSpace::from_value(&json!({
        "variants": {"os": ["linux", "macos"], "arch": ["x64", "arm64"]},
        "zip_keys": [["os", "arch"]]
    }))
    .unwrap();

    let mut overrides = BTreeMap::new();
    overrides.insert("os".to_string(), json!("macos"));
    let resolved = space.resolve(&overrides, None).unwrap();
    assert_eq!(resolved.get("arch"), Some(&json!("arm64")));

    overrides.insert("arch".to_string(), json!("x64"));
    assert!(matches!(
        space.resolve(&overrides, None),
        Err(Error::ZipInconsistent { .. })
    ));
}

#[test]
fn selector_errors_surface() {
    let deps = vec![
        Dependency::new("broken")
            .with_install("pip", "broken")
            .with_selector("cuda_version >= 12"),
    ];
    let err = DependencyResolver::new(VariantSpace::empty())
        .resolve(
            &deps,
            &ResolverOptions::default().with_platform(platform("linux-64")),
        )
        .unwrap_err();
    assert!(matches!(err, Error::SelectorEval { .. }), "{err}");
}

#[test]
fn optional_groups_feed_resolution() {
    let set: DependencySet = serde_json::from_value(json!({
        "core": [{"name": "rich", "install": {"pip": "rich"}}],
        "optional": [
            {"name": "docs", "packages": [{"name": "sphinx", "install": {"pip": "sphinx"}}]}
        ]
    }))
    .unwrap();

    let resolver = DependencyResolver::new(VariantSpace::empty());
    let options = ResolverOptions::default().with_platform(platform("win-64"));

    let core = resolver
        .resolve(&set.select(&Extras::None).unwrap(), &options)
        .unwrap();
    assert_eq!(core.names_by_source(), json!({"pip": ["rich"]}));

    let all = resolver
        .resolve(&set.select(&Extras::All).unwrap(), &options)
        .unwrap();
    assert_eq!(all.names_by_source(), json!({"pip": ["rich", "sphinx"]}));
}
