//! Shared helpers for atomic-build integration tests.

use assert_cmd::cargo::cargo_bin_cmd;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Creates a site root with an existing `public/` tree and a fresh build
/// output under `build/site`.
#[allow(unused)]
pub fn create_test_site() -> TempDir {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    fs::create_dir_all(root.join("public/site")).unwrap();
    fs::write(root.join("public/menu.json"), r#"{"items": ["soup"]}"#).unwrap();
    fs::write(root.join("public/old.html"), "<p>old</p>").unwrap();
    fs::write(root.join("public/site/index.html"), "<h1>Yesterday</h1>").unwrap();

    fs::create_dir_all(root.join("build/site/css")).unwrap();
    fs::write(root.join("build/site/index.html"), "<h1>Today</h1>").unwrap();
    fs::write(root.join("build/site/css/main.css"), "body {}").unwrap();

    fs::create_dir_all(root.join("assets")).unwrap();
    fs::write(root.join("assets/logo.png"), [0x89u8, b'P', b'N', b'G', 0, 1, 2]).unwrap();

    temp
}

/// Writes `content` as `plan.toml` under `root`.
#[allow(unused)]
pub fn write_plan(root: &Path, content: &str) {
    fs::write(root.join("plan.toml"), content).unwrap();
}

/// Names of transaction artifacts (backup, staging, temp) anywhere under `dir`.
#[allow(unused)]
pub fn leftover_artifacts(dir: &Path) -> Vec<String> {
    let mut found = Vec::new();
    collect_artifacts(dir, &mut found);
    found.sort();
    found
}

fn collect_artifacts(dir: &Path, found: &mut Vec<String>) {
    for entry in fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.contains(".backup-") || name.contains(".staging-") || name.contains(".tmp-") {
            found.push(name);
        } else if entry.file_type().unwrap().is_dir() {
            collect_artifacts(&entry.path(), found);
        }
    }
}

/// Helper to run `atomic-build apply plan.toml` inside `root`
#[allow(unused)]
pub fn run_apply(root: &Path, extra_args: &[&str]) -> assert_cmd::assert::Assert {
    let mut cmd = cargo_bin_cmd!("atomic-build");
    cmd.arg("apply")
        .arg("plan.toml")
        .args(extra_args)
        .current_dir(root);

    cmd.assert()
}

/// Helper to run `atomic-build clean` on `dir`
#[allow(unused)]
pub fn run_clean(dir: &Path, extra_args: &[&str]) -> assert_cmd::assert::Assert {
    let mut cmd = cargo_bin_cmd!("atomic-build");
    cmd.arg("clean").arg(dir).args(extra_args);

    cmd.assert()
}
