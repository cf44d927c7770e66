//! Integration tests for the `tik cache` subcommands.

mod common;

use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

use common::{index_project, tik_cmd};

const EXTRA_SNIPPET: &str = r#"{
  "extra": {
    "containerPath": "extra.py",
    "kind": "function",
    "provenance": "Manual",
    "snippet": "def extra(): pass"
  }
}"#;

#[test]
fn test_stat_empty_tiers() {
    let temp = TempDir::new().expect("create temp dir");

    tik_cmd()
        .current_dir(temp.path())
        .args(["cache", "stat", "--data-dir", "data"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Tiers are empty."));
}

#[test]
fn test_stat_json_per_tier() {
    let temp = TempDir::new().expect("create temp dir");
    let (_src, data) = index_project(temp.path());

    let output = tik_cmd()
        .current_dir(temp.path())
        .args(["cache", "stat", "--tier", "l0", "--json", "--data-dir"])
        .arg(&data)
        .output()
        .expect("run tik cache stat");
    assert!(output.status.success());

    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stat --json prints JSON");
    assert_eq!(json["snippet"]["count"], 4);
    assert_eq!(json["snippet"]["provenanceBreakdownPct"]["AST"], 100.0);
    assert_eq!(json["snippet"]["distinctContainers"], 1);
    assert!(json.get("edges").is_none());
}

#[test]
fn test_validate_configured_tiers() {
    let temp = TempDir::new().expect("create temp dir");
    let (_src, data) = index_project(temp.path());

    tik_cmd()
        .current_dir(temp.path())
        .args(["cache", "validate", "--data-dir"])
        .arg(&data)
        .assert()
        .success()
        .stdout(predicate::str::contains("Tier files are valid"));
}

#[test]
fn test_validate_rejects_missing_field() {
    let temp = TempDir::new().expect("create temp dir");
    let bad = temp.path().join("bad_edges.json");
    fs::write(
        &bad,
        r#"{"Store": {"edges": [], "kind": "class", "containerPath": "store.py"}}"#,
    )
    .expect("write tier file");

    tik_cmd()
        .current_dir(temp.path())
        .args(["cache", "validate", "--tier", "edges", "--file"])
        .arg(&bad)
        .assert()
        .failure()
        .stderr(predicate::str::contains("provenance"))
        .stderr(predicate::str::contains("failed validation"));
}

#[test]
fn test_validate_rejects_unknown_provenance() {
    let temp = TempDir::new().expect("create temp dir");
    let bad = temp.path().join("bad_descriptors.json");
    fs::write(
        &bad,
        r#"{"Store": {"descriptor": {"purpose": "p", "uses": [], "returns": "r", "edgeCases": "none"}, "kind": "class", "containerPath": "store.py", "provenance": "Guess"}}"#,
    )
    .expect("write tier file");

    tik_cmd()
        .current_dir(temp.path())
        .args(["cache", "validate", "--tier", "descriptor", "--file"])
        .arg(&bad)
        .assert()
        .failure();
}

#[test]
fn test_diff_and_merge() {
    let temp = TempDir::new().expect("create temp dir");
    let (_src, data) = index_project(temp.path());

    let copy = temp.path().join("snippets_copy.json");
    fs::copy(data.join("snippet_tier.json"), &copy).expect("copy tier");

    tik_cmd()
        .current_dir(temp.path())
        .args(["cache", "diff", "snippet"])
        .arg(&copy)
        .arg("--data-dir")
        .arg(&data)
        .assert()
        .success()
        .stdout(predicate::str::contains("No differences in snippet tier"));

    let extra = temp.path().join("extra.json");
    fs::write(&extra, EXTRA_SNIPPET).expect("write extra tier");

    let output = tik_cmd()
        .current_dir(temp.path())
        .args(["cache", "diff", "snippet", "--json"])
        .arg(&extra)
        .arg("--data-dir")
        .arg(&data)
        .output()
        .expect("run tik cache diff");
    assert!(output.status.success());
    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("diff --json prints JSON");
    assert_eq!(json["added"], serde_json::json!(["extra"]));
    assert_eq!(json["removed"].as_array().map(|r| r.len()), Some(4));
    assert_eq!(json["changed"], serde_json::json!([]));

    tik_cmd()
        .current_dir(temp.path())
        .args(["cache", "merge", "snippet"])
        .arg(&extra)
        .arg("--data-dir")
        .arg(&data)
        .assert()
        .success()
        .stdout(predicate::str::contains("Merged 1 snippet record(s)"))
        .stdout(predicate::str::contains("(5 total)"));

    // Merging never deletes: the copy is now a strict subset.
    tik_cmd()
        .current_dir(temp.path())
        .args(["cache", "diff", "snippet", "--file"])
        .arg(data.join("snippet_tier.json"))
        .arg(&copy)
        .arg("--data-dir")
        .arg(&data)
        .assert()
        .success()
        .stdout(predicate::str::contains("0 added, 1 removed, 0 changed"))
        .stdout(predicate::str::contains("- extra"));
}

#[test]
fn test_merge_rejects_invalid_input() {
    let temp = TempDir::new().expect("create temp dir");
    let (_src, data) = index_project(temp.path());
    let before = fs::read(data.join("snippet_tier.json")).expect("read tier");

    let bad = temp.path().join("bad.json");
    fs::write(&bad, r#"{"x": {"snippet": "   ", "kind": "function", "containerPath": "x.py", "provenance": "AST"}}"#)
        .expect("write tier file");

    tik_cmd()
        .current_dir(temp.path())
        .args(["cache", "merge", "snippet"])
        .arg(&bad)
        .arg("--data-dir")
        .arg(&data)
        .assert()
        .failure()
        .stderr(predicate::str::contains("is not a valid snippet tier file"));

    assert_eq!(fs::read(data.join("snippet_tier.json")).expect("read tier"), before);
}

#[test]
fn test_merge_missing_file_fails() {
    let temp = TempDir::new().expect("create temp dir");

    tik_cmd()
        .current_dir(temp.path())
        .args(["cache", "merge", "edges", "nowhere.json", "--data-dir", "data"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Cannot read nowhere.json"));
}
