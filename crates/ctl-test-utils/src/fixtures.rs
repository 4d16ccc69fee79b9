//! Canned control center documents.
//!
//! Together they describe one package unit, a README generated from project
//! metadata and a tool configuration file:
//!
//! ```rust,no_run
//! use ctl_test_utils::{ControlRepo, fixtures};
//!
//! let repo = ControlRepo::new();
//! fixtures::write_standard(&repo);
//! ```

use crate::ControlRepo;

pub const PROJECT_YAML: &str = r#"control:
  path: .control
project:
  name: demo
  title: Demo Project
  description: "${{ .title }} does things."
"#;

pub const PACKAGE_YAML: &str = r#"pypkg_main:
  name: "${{ project.name }}"
  path:
    root: "${{ project.name }}"
    source_rel: src
    import_rel: "${{ pypkg_main.name }}"
"#;

pub const FILES_YAML: &str = r#"file_readme:
  name: Readme
  path: README.md
  content: |
    # ${{ project.title }}

    ${{ project.description }}
file_ruff:
  path: "${{ pypkg_main.path.root }}/ruff.toml"
  type: toml
  data:
    line-length: 100
"#;

/// Write the three standard documents into `repo`'s control directory.
pub fn write_standard(repo: &ControlRepo) {
    repo.write_config("project.yaml", PROJECT_YAML);
    repo.write_config("package.yaml", PACKAGE_YAML);
    repo.write_config("files.yaml", FILES_YAML);
}

/// Replace `project.name`, which drives the package root and import names.
pub fn rename_project(repo: &ControlRepo, name: &str) {
    repo.write_config(
        "project.yaml",
        &PROJECT_YAML.replace("name: demo", &format!("name: {name}")),
    );
}
