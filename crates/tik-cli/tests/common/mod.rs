//! Shared test utilities for tik-cli integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;

/// Get a Command for the tik binary.
///
/// # Panics
///
/// Panics if the tik binary cannot be found. This should not happen
/// in a properly configured test environment.
#[allow(deprecated)]
pub fn tik_cmd() -> Command {
    let mut cmd = Command::cargo_bin("tik").expect("tik binary should exist");
    cmd.env_remove("TIK_CONFIG")
        .env_remove("TIK_DATA_DIR")
        .env_remove("TIK_VERBOSE")
        .env("TIK_COLOR", "never");
    cmd
}

pub const STORE_PY: &str = r#"import os

class Store:
    """Keeps items on disk."""

    def save(self, item):
        self.validate(item)
        return os.path.join("data", item)

    def validate(self, item):
        if item is None:
            raise ValueError("empty item")

def main():
    store = Store()
    store.save("x")
"#;

/// Lay out `<root>/src/store.py` and return `(source root, data dir)`.
pub fn create_project(root: &Path) -> (PathBuf, PathBuf) {
    let src = root.join("src");
    fs::create_dir_all(&src).expect("create src dir");
    fs::write(src.join("store.py"), STORE_PY).expect("write source file");
    (src, root.join("data"))
}

/// Run `tik index` over the project and assert success.
pub fn index_project(root: &Path) -> (PathBuf, PathBuf) {
    let (src, data) = create_project(root);
    tik_cmd()
        .current_dir(root)
        .arg("index")
        .arg("--root")
        .arg(&src)
        .arg("--data-dir")
        .arg(&data)
        .assert()
        .success();
    (src, data)
}
