use std::fs;
use std::process::Command;

use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn codewake_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_codewake"))
}

/// Create a temp workspace with a mock-provider config and a few source
/// files, then run `ingest` so the index is populated and ready for queries.
fn setup_and_ingest() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    fs::write(
        root.join(".codewake"),
        "CODEWAKE_EMBEDDING_PROVIDER=mock\nCODEWAKE_EMBEDDING_DIMENSIONS=8\n",
    )
    .unwrap();

    fs::write(
        root.join("greeting.rs"),
        "fn hello() -> &'static str {\n    \"hello, world\"\n}\n",
    )
    .unwrap();

    fs::write(
        root.join("math.rs"),
        "fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n",
    )
    .unwrap();

    let output = codewake_bin()
        .arg("ingest")
        .current_dir(root)
        .output()
        .expect("failed to run codewake ingest");
    assert!(
        output.status.success(),
        "ingest should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    dir
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn ingest_then_status_json_reports_indexed_files() {
    let dir = setup_and_ingest();

    let output = codewake_bin()
        .args(["status", "--json"])
        .current_dir(dir.path())
        .output()
        .expect("failed to run codewake status");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let status: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(status["file_count"], 2);
    assert_eq!(status["row_count"], 2);
}

#[test]
fn search_json_finds_matching_file() {
    let dir = setup_and_ingest();

    let output = codewake_bin()
        .args(["search", "--json", "fn add"])
        .current_dir(dir.path())
        .output()
        .expect("failed to run codewake search");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let hits: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().any(|h| h["path"].as_str().unwrap().contains("math.rs")));
}

#[test]
fn status_on_unindexed_workspace_reports_zero_files() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join(".codewake"),
        "CODEWAKE_EMBEDDING_PROVIDER=mock\nCODEWAKE_EMBEDDING_DIMENSIONS=8\n",
    )
    .unwrap();

    let output = codewake_bin()
        .args(["status", "--json"])
        .current_dir(dir.path())
        .output()
        .expect("failed to run codewake status");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let status: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(status["file_count"], 0);
}

#[test]
fn version_flag_prints_logo_and_version() {
    let output = codewake_bin().arg("--version").output().expect("failed to run codewake --version");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}
