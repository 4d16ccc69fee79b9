//! End-to-end compile, classify and apply scenarios
//!
//! Each test drives a real control directory through `Synchronizer::run`
//! one or more times and checks the repository on disk afterwards.

use ctl_core::entity::ChangeKind;
use ctl_core::pipeline::Compiler;
use ctl_core::sync::{SyncOutcome, Synchronizer};
use ctl_fs::NormalizedPath;
use ctl_meta::SchemaRegistry;
use ctl_test_utils::{ControlRepo, fixtures};
use pretty_assertions::assert_eq;

fn sync(repo: &ControlRepo) -> SyncOutcome {
    let registry = SchemaRegistry::empty();
    Synchronizer::new(repo.root())
        .run(&Compiler::new(&registry), &NormalizedPath::new(repo.control_dir()))
        .unwrap()
}

fn change_of(outcome: &SyncOutcome, id: &str) -> ChangeKind {
    outcome
        .plan
        .entities
        .iter()
        .find(|e| e.subtype.id == id)
        .unwrap_or_else(|| panic!("no entity {id}"))
        .change_kind()
}

#[test]
fn first_sync_materializes_the_repository() {
    let repo = ControlRepo::new();
    fixtures::write_standard(&repo);

    sync(&repo);

    repo.assert_dir_exists("demo/src/demo");
    repo.assert_file_contains("README.md", "# Demo Project");
    repo.assert_file_contains("README.md", "Demo Project does things.");
    assert_eq!(repo.read("demo/ruff.toml"), "line-length = 100\n");
    let snapshot = repo.snapshot().unwrap();
    assert_eq!(snapshot["pypkg_main"]["path"]["import"], "demo/src/demo");
}

#[test]
fn repeated_sync_is_idempotent() {
    let repo = ControlRepo::new();
    fixtures::write_standard(&repo);
    sync(&repo);
    let files = repo.files();
    let dirs = repo.dirs();

    let second = sync(&repo);

    assert!(second.is_noop(), "{:?}", second.report.lines());
    assert!(second.plan.scalar_diff.is_empty());
    assert_eq!(repo.files(), files);
    assert_eq!(repo.dirs(), dirs);
}

#[test]
fn project_rename_moves_package_and_keeps_user_files() {
    let repo = ControlRepo::new();
    fixtures::write_standard(&repo);
    sync(&repo);
    repo.write_file("demo/src/demo/__init__.py", "VERSION = 1\n");

    fixtures::rename_project(&repo, "tool");
    let outcome = sync(&repo);

    assert_eq!(change_of(&outcome, "pypkg_main.root"), ChangeKind::Moved);
    assert_eq!(change_of(&outcome, "pypkg_main.source"), ChangeKind::Unchanged);
    assert_eq!(change_of(&outcome, "pypkg_main.import"), ChangeKind::Moved);
    assert_eq!(change_of(&outcome, "file_ruff"), ChangeKind::Moved);
    assert_eq!(change_of(&outcome, "file_readme"), ChangeKind::Unchanged);

    repo.assert_file_not_exists("demo");
    assert_eq!(repo.read("tool/src/tool/__init__.py"), "VERSION = 1\n");
    assert_eq!(repo.read("tool/ruff.toml"), "line-length = 100\n");
    assert!(sync(&repo).is_noop());
}

#[test]
fn dropped_unit_removes_directory_before_its_files() {
    let repo = ControlRepo::new();
    fixtures::write_standard(&repo);
    repo.write_config(
        "legacy.yaml",
        "pypkg_legacy:\n  path:\n    root: legacy\nfile_notes:\n  path: legacy/NOTES.txt\n  content: notes\n",
    );
    sync(&repo);
    repo.assert_file_exists("legacy/NOTES.txt");

    repo.remove_config("legacy.yaml");
    let outcome = sync(&repo);

    assert_eq!(change_of(&outcome, "pypkg_legacy.root"), ChangeKind::Removed);
    assert_eq!(change_of(&outcome, "file_notes"), ChangeKind::Removed);
    repo.assert_file_not_exists("legacy");
    assert_eq!(
        outcome.report.lines()[0],
        "remove directory legacy",
        "{:?}",
        outcome.report.lines()
    );
}

#[test]
fn inactive_file_keeps_previous_content() {
    let repo = ControlRepo::new();
    fixtures::write_standard(&repo);
    sync(&repo);
    let before = repo.read("README.md");

    repo.write_config(
        "files.yaml",
        &fixtures::FILES_YAML.replace("  name: Readme\n", "  name: Readme\n  active: false\n"),
    );
    repo.write_config("project.yaml", &fixtures::PROJECT_YAML.replace("Demo Project", "Renamed"));
    let outcome = sync(&repo);

    assert_eq!(change_of(&outcome, "file_readme"), ChangeKind::Inactive);
    assert_eq!(repo.read("README.md"), before);
}

#[test]
fn deleted_output_is_restored() {
    let repo = ControlRepo::new();
    fixtures::write_standard(&repo);
    sync(&repo);
    std::fs::remove_file(repo.root().join("README.md")).unwrap();

    let outcome = sync(&repo);

    assert_eq!(change_of(&outcome, "file_readme"), ChangeKind::Added);
    repo.assert_file_contains("README.md", "# Demo Project");
}

#[test]
fn copies_follow_the_configuration() {
    let repo = ControlRepo::new();
    fixtures::write_standard(&repo);
    repo.write_config(
        "copies.yaml",
        "copy_readme:\n  source: README.md\n  destinations: [\"${{ pypkg_main.path.root }}/README.md\"]\n",
    );
    sync(&repo);
    assert_eq!(repo.read("demo/README.md"), repo.read("README.md"));

    let repeat = sync(&repo);
    assert!(repeat.report.is_empty(), "{:?}", repeat.report.lines());

    repo.write_config(
        "copies.yaml",
        "copy_readme:\n  source: README.md\n  destinations: [docs/README.md]\n",
    );
    let moved = sync(&repo);
    repo.assert_file_not_exists("demo/README.md");
    repo.assert_file_contains("docs/README.md", "# Demo Project");
    let lines = moved.report.lines();
    assert_eq!(
        lines[lines.len() - 2..],
        ["remove demo/README.md", "copy README.md -> docs/README.md"]
    );
}

#[test]
fn dry_run_reports_without_writing() {
    let repo = ControlRepo::new();
    fixtures::write_standard(&repo);
    let registry = SchemaRegistry::empty();

    let outcome = Synchronizer::new(repo.root())
        .dry_run(true)
        .run(&Compiler::new(&registry), &NormalizedPath::new(repo.control_dir()))
        .unwrap();

    assert!(outcome.report.dry_run);
    assert!(
        outcome
            .report
            .lines()
            .iter()
            .all(|line| line.starts_with("[dry-run] Would "))
    );
    repo.assert_file_not_exists("README.md");
    repo.assert_file_not_exists("demo");
    assert!(repo.snapshot().is_none());
}
