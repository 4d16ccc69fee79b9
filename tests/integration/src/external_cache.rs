//! External references and the persistent cache across compiles

use std::cell::Cell;
use std::rc::Rc;

use ctl_core::external::Fetcher;
use ctl_core::pipeline::{Compiler, CompilerOptions};
use ctl_fs::NormalizedPath;
use ctl_meta::SchemaRegistry;
use ctl_test_utils::ControlRepo;
use pretty_assertions::assert_eq;
use serde_json::json;

/// Serves one JSON document and counts requests.
struct CountingFetcher {
    calls: Rc<Cell<usize>>,
}

impl Fetcher for CountingFetcher {
    fn fetch(&self, url: &str) -> Result<String, String> {
        self.calls.set(self.calls.get() + 1);
        match url {
            "https://licenses.example.org/index.json" => {
                Ok(r#"{"mit": {"name": "MIT License", "spdx": "MIT"}}"#.to_string())
            }
            other => Err(format!("404 for {other}")),
        }
    }
}

const LICENSE_YAML: &str =
    "license: !ext \"https://licenses.example.org/index.json mit\"\nspdx: \"${{ license.spdx }}\"\n";

#[test]
fn persistent_cache_skips_second_fetch() {
    let repo = ControlRepo::new();
    repo.write_config("license.yaml", LICENSE_YAML);
    let cache_path = NormalizedPath::new(repo.root().join("cache.yaml"));
    let registry = SchemaRegistry::empty();
    let calls = Rc::new(Cell::new(0));

    for _ in 0..2 {
        let compiled = Compiler::new(&registry)
            .with_options(CompilerOptions::default().with_cache_path(cache_path.clone()))
            .with_fetcher(CountingFetcher {
                calls: Rc::clone(&calls),
            })
            .compile(&NormalizedPath::new(repo.control_dir()))
            .unwrap();
        assert_eq!(compiled.get("license"), Some(&json!({"name": "MIT License", "spdx": "MIT"})));
        assert_eq!(compiled.get_str("spdx"), Some("MIT"));
    }

    assert_eq!(calls.get(), 1);
    repo.assert_file_contains("cache.yaml", "MIT License");
}

#[test]
fn file_references_resolve_against_control_dir() {
    let repo = ControlRepo::new();
    repo.write_config("team.yaml", "team: !ext \"data/team.json alice\"\n");
    repo.write_file(".control/data/team.json", r#"{"alice": {"role": "lead"}}"#);
    let registry = SchemaRegistry::empty();

    let compiled = Compiler::new(&registry)
        .compile(&NormalizedPath::new(repo.control_dir()))
        .unwrap();

    assert_eq!(compiled.get_str("team.role"), Some("lead"));
}

#[test]
fn unreachable_reference_fails_in_load_stage() {
    let repo = ControlRepo::new();
    repo.write_config("broken.yaml", "x: !ext \"https://nowhere.example.org/a.json\"\n");
    let registry = SchemaRegistry::empty();

    let report = Compiler::new(&registry)
        .with_fetcher(CountingFetcher {
            calls: Rc::new(Cell::new(0)),
        })
        .compile(&NormalizedPath::new(repo.control_dir()))
        .unwrap_err()
        .report();

    assert_eq!(report.stage, Some(ctl_core::hooks::Stage::Load));
    assert_eq!(report.path.as_deref(), Some("https://nowhere.example.org/a.json"));
}
