mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    common::capability_list_workbook(&root.join("workbooks/wealth.xlsx"));

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_content = format!(
        r#"[index]
path = "{root}/data/caplook.sqlite"

[sources]
root = "{root}/workbooks"

[embedding]
provider = "hash"
dims = 256

[retrieval]
top_k = 3
"#,
        root = root.display().to_string().replace('\\', "/")
    );
    let config_path = config_dir.join("caplook.toml");
    fs::write(&config_path, config_content).unwrap();
    (tmp, config_path)
}

fn run_caplook(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_caplook"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run caplook");
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

#[test]
fn init_creates_index_and_is_idempotent() {
    let (tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_caplook(&config, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(stdout.contains("Index initialized"));
    assert!(tmp.path().join("data/caplook.sqlite").exists());

    let (_, stderr, ok) = run_caplook(&config, &["init"]);
    assert!(ok, "second init failed: {}", stderr);
}

#[test]
fn search_before_index_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_caplook(&config, &["search", "mutual funds"]);
    assert!(!ok);
    assert!(stderr.contains("not ready"), "stderr: {}", stderr);
}

#[test]
fn index_search_and_stats_as_json() {
    let (_tmp, config) = setup_test_env();

    let (stdout, stderr, ok) = run_caplook(&config, &["index", "--progress", "off", "--json"]);
    assert!(ok, "index failed: {}", stderr);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["records"], 3);
    assert_eq!(report["vectors_written"], 3);
    assert_eq!(report["cancelled"], false);

    let (stdout, stderr, ok) = run_caplook(&config, &["search", "mutual funds", "--json"]);
    assert!(ok, "search failed: {}", stderr);
    let result: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(result["status"], "matched");
    assert_eq!(result["query"], "mutual funds");
    assert_eq!(result["total_found"], 3);
    assert_eq!(result["matches"][0]["capability"], "Mutual Fund Selection");
    assert_eq!(result["failed_analyses"].as_array().unwrap().len(), 4);

    let (stdout, stderr, ok) = run_caplook(&config, &["stats", "--json"]);
    assert!(ok, "stats failed: {}", stderr);
    let stats: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(stats["vectors"], 3);
    assert_eq!(stats["dims"], 256);
    assert_eq!(stats["metric"], "cosine");
    assert_eq!(stats["files"][0]["file_name"], "wealth.xlsx");
}

#[test]
fn if_empty_skips_populated_collection() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_caplook(&config, &["index", "--progress", "off"]);
    assert!(ok, "index failed: {}", stderr);

    let (stdout, _, ok) = run_caplook(&config, &["index", "--if-empty"]);
    assert!(ok);
    assert!(stdout.contains("skipping"));
}

#[test]
fn human_search_output_lists_matches_and_sections() {
    let (_tmp, config) = setup_test_env();
    run_caplook(&config, &["index", "--progress", "off"]);

    let (stdout, stderr, ok) = run_caplook(&config, &["search", "kyc checks", "--limit", "2"]);
    assert!(ok, "search failed: {}", stderr);
    assert!(stdout.contains("Found 2 matching capabilities"));
    assert!(stdout.contains("1. ["));
    assert!(stdout.contains("KYC Verification"));
    assert!(stdout.contains("## Cost analysis"));
    assert!(stdout.contains("Cost analysis unavailable:"));
}

#[test]
fn invalid_config_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("bad.toml");
    fs::write(&config, "[chunking]\nchunk_size = 10\noverlap = 10\n").unwrap();
    let (_, stderr, ok) = run_caplook(&config, &["stats"]);
    assert!(!ok);
    assert!(stderr.contains("overlap"), "stderr: {}", stderr);
}
