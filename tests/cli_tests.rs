use assert_cmd::Command;
use mmdb_reader::{DataValue, DatabaseBuilder};
use predicates::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Helper to create an mmdb-reader command
fn mmdb_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("mmdb-reader"))
}

/// Write a small city database into `dir`
fn write_database(dir: &TempDir) -> PathBuf {
    let mut builder = DatabaseBuilder::new()
        .with_database_type("CLI-Test-City")
        .with_languages(["en"])
        .with_description("en", "database for CLI tests")
        .with_build_epoch(1_700_000_000);

    let mut record = HashMap::new();
    record.insert("city".to_string(), DataValue::String("Springfield".into()));
    record.insert("population".to_string(), DataValue::Uint32(30_720));
    builder.add_entry("192.0.2.0/24", record).unwrap();

    let mut record = HashMap::new();
    record.insert("city".to_string(), DataValue::String("Shelbyville".into()));
    builder.add_entry("2001:db8::/32", record).unwrap();

    let path = dir.path().join("test.mmdb");
    fs::write(&path, builder.build().unwrap()).unwrap();
    path
}

#[test]
fn test_help() {
    mmdb_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("MaxMind DB"));
}

#[test]
fn test_version() {
    mmdb_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mmdb-reader"));
}

#[test]
fn test_query_help() {
    mmdb_cmd()
        .args(["query", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("IP addresses to look up"));
}

#[test]
fn test_query_requires_an_address() {
    let dir = TempDir::new().unwrap();
    let db = write_database(&dir);

    mmdb_cmd().arg("query").arg(&db).assert().failure();
}

#[test]
fn test_query_found() {
    let dir = TempDir::new().unwrap();
    let db = write_database(&dir);

    mmdb_cmd()
        .arg("query")
        .arg(&db)
        .arg("192.0.2.55")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"network\": \"192.0.2.0/24\""))
        .stdout(predicate::str::contains("Springfield"))
        .stdout(predicate::str::contains("30720"));
}

#[test]
fn test_query_output_is_json() {
    let dir = TempDir::new().unwrap();
    let db = write_database(&dir);

    let output = mmdb_cmd()
        .arg("query")
        .arg(&db)
        .args(["192.0.2.1", "2001:db8::1"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let results: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["data"]["city"], "Springfield");
    assert_eq!(results[0]["prefix_len"], 24);
    assert_eq!(results[1]["data"]["city"], "Shelbyville");
    assert_eq!(results[1]["network"], "2001:db8::/32");
}

#[test]
fn test_query_not_found_exits_one() {
    let dir = TempDir::new().unwrap();
    let db = write_database(&dir);

    mmdb_cmd()
        .arg("query")
        .arg(&db)
        .args(["192.0.2.1", "198.51.100.1"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("\"data\": null"));
}

#[test]
fn test_query_quiet() {
    let dir = TempDir::new().unwrap();
    let db = write_database(&dir);

    mmdb_cmd()
        .arg("query")
        .arg(&db)
        .arg("192.0.2.1")
        .arg("--quiet")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    mmdb_cmd()
        .arg("query")
        .arg(&db)
        .arg("203.0.113.1")
        .arg("-q")
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_query_in_memory() {
    let dir = TempDir::new().unwrap();
    let db = write_database(&dir);

    mmdb_cmd()
        .arg("query")
        .arg(&db)
        .arg("192.0.2.200")
        .arg("--in-memory")
        .assert()
        .success()
        .stdout(predicate::str::contains("Springfield"));
}

#[test]
fn test_query_invalid_address() {
    let dir = TempDir::new().unwrap();
    let db = write_database(&dir);

    mmdb_cmd()
        .arg("query")
        .arg(&db)
        .arg("not-an-ip")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not-an-ip"));
}

#[test]
fn test_query_missing_database() {
    let dir = TempDir::new().unwrap();

    mmdb_cmd()
        .arg("query")
        .arg(dir.path().join("missing.mmdb"))
        .arg("1.1.1.1")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load database"));
}

#[test]
fn test_query_rejects_non_database() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("garbage.mmdb");
    fs::write(&path, vec![0u8; 4096]).unwrap();

    mmdb_cmd()
        .arg("query")
        .arg(&path)
        .arg("1.1.1.1")
        .assert()
        .failure()
        .stderr(predicate::str::contains("metadata marker not found"));
}

#[test]
fn test_inspect_text() {
    let dir = TempDir::new().unwrap();
    let db = write_database(&dir);

    mmdb_cmd()
        .arg("inspect")
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains("CLI-Test-City"))
        .stdout(predicate::str::contains("IPv6"))
        .stdout(predicate::str::contains("2023-11-14 22:13:20 UTC"))
        .stdout(predicate::str::contains("[en] database for CLI tests"));
}

#[test]
fn test_inspect_json() {
    let dir = TempDir::new().unwrap();
    let db = write_database(&dir);

    let output = mmdb_cmd()
        .arg("inspect")
        .arg(&db)
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success());

    let info: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(info["metadata"]["database_type"], "CLI-Test-City");
    assert_eq!(info["metadata"]["ip_version"], 6);
    assert_eq!(info["metadata"]["binary_format_major_version"], 2);
    assert!(info["layout"]["tree_size"].as_u64().unwrap() > 0);
    assert!(info.get("raw_metadata").is_none());
}

#[test]
fn test_inspect_full() {
    let dir = TempDir::new().unwrap();
    let db = write_database(&dir);

    let output = mmdb_cmd()
        .arg("inspect")
        .arg(&db)
        .args(["--json", "--full"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let info: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(
        info["raw_metadata"]["node_count"],
        info["metadata"]["node_count"]
    );
}

#[test]
fn test_verify() {
    let dir = TempDir::new().unwrap();
    let db = write_database(&dir);

    mmdb_cmd()
        .arg("verify")
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains("Database is valid"));
}

#[test]
fn test_verify_json() {
    let dir = TempDir::new().unwrap();
    let db = write_database(&dir);

    let output = mmdb_cmd()
        .arg("verify")
        .arg(&db)
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["errors"].as_array().unwrap().len(), 0);
    assert_eq!(report["stats"]["network_count"], 2);
}

#[test]
fn test_verbose_logging_goes_to_stderr() {
    let dir = TempDir::new().unwrap();
    let db = write_database(&dir);

    mmdb_cmd()
        .env_remove("RUST_LOG")
        .arg("-v")
        .arg("query")
        .arg(&db)
        .arg("192.0.2.1")
        .assert()
        .success()
        .stdout(predicate::str::contains("DEBUG").not())
        .stderr(predicate::str::contains("DEBUG").and(predicate::str::contains("mmdb_reader")));
}

#[test]
fn test_quiet_by_default() {
    let dir = TempDir::new().unwrap();
    let db = write_database(&dir);

    mmdb_cmd()
        .env_remove("RUST_LOG")
        .arg("query")
        .arg(&db)
        .arg("192.0.2.1")
        .assert()
        .success()
        .stderr(predicate::str::contains("DEBUG").not());
}
