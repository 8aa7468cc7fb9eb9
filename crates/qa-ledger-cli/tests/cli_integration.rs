use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{now}"));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn run_qal<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_qal"))
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to execute qal binary: {err}"))
}

fn parse_stdout(output: &Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_qal(args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "qal command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }
    parse_stdout(&output)
}

fn as_i64(value: &Value, key: &str) -> i64 {
    value
        .get(key)
        .and_then(Value::as_i64)
        .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn write_file(path: &Path, body: &str) {
    fs::write(path, body)
        .unwrap_or_else(|err| panic!("failed to write {}: {err}", path.display()));
}

const SNAPSHOT: &str = r#"{
    "system": "scale",
    "projects": [{ "key": "QA", "name": "Quality" }],
    "versions": { "QA": [{ "id": "10", "name": "1.0" }] },
    "test_cases": [
        { "key": "QA-T1", "name": "Login", "projectKey": "QA" },
        { "key": "QA-T2", "name": "Logout", "projectKey": "QA" }
    ],
    "test_runs": [
        { "key": "QA-C1", "name": "Nightly", "folder": "Regression", "projectKey": "QA", "version": "1.0" },
        { "key": "QA-C2", "name": "Exploratory", "folder": "Manual", "projectKey": "QA" }
    ],
    "executions": {
        "QA-C1": [
            { "id": 1, "testCaseKey": "QA-T1", "status": "Pass", "executedBy": "jdoe" },
            { "id": 2, "testCaseKey": "QA-T2", "status": "Fail" },
            { "id": 3, "testCaseKey": "QA-T404", "status": "Pass" }
        ],
        "QA-C2": [
            { "id": 4, "testCaseKey": "QA-T1" }
        ]
    }
}"#;

#[test]
fn db_commands_report_schema_and_integrity() {
    let dir = unique_temp_dir("qal-db");
    let db = dir.join("ledger.sqlite3");

    let status = run_json(["--db", path_str(&db), "db", "schema-version"]);
    assert_eq!(as_str(&status, "contract_version"), "cli.v1");
    assert_eq!(as_i64(&status, "current_version"), 0);

    let dry_run = run_json(["--db", path_str(&db), "db", "migrate", "--dry-run"]);
    assert_eq!(dry_run["would_apply_versions"], serde_json::json!([1]));

    let migrated = run_json(["--db", path_str(&db), "db", "migrate"]);
    assert_eq!(as_i64(&migrated, "after_version"), 1);
    assert_eq!(migrated["up_to_date"], Value::Bool(true));

    let integrity = run_json(["--db", path_str(&db), "db", "integrity-check"]);
    assert_eq!(integrity["quick_check_ok"], Value::Bool(true));
    assert_eq!(integrity["foreign_key_violations"], serde_json::json!([]));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn sync_from_snapshot_populates_the_ledger() {
    let dir = unique_temp_dir("qal-sync");
    let db = dir.join("ledger.sqlite3");
    let snapshot = dir.join("scale.json");
    write_file(&snapshot, SNAPSHOT);

    let report = run_json(["--db", path_str(&db), "sync", "--snapshot", path_str(&snapshot)]);
    assert_eq!(as_str(&report, "contract_version"), "cli.v1");
    assert_eq!(as_str(&report, "outcome"), "completed");
    assert_eq!(as_i64(&report, "committed_executions"), 3);
    assert_eq!(as_i64(&report, "skipped_executions"), 1);

    let counts = run_json(["--db", path_str(&db), "report", "counts"]);
    let counts = &counts["counts"];
    assert_eq!(as_i64(counts, "project"), 1);
    assert_eq!(as_i64(counts, "cycle"), 2);
    assert_eq!(as_i64(counts, "execution"), 3);
    assert_eq!(as_i64(counts, "user"), 2);

    let again = run_json(["--db", path_str(&db), "sync", "--snapshot", path_str(&snapshot)]);
    assert_eq!(as_i64(&again, "committed_executions"), 3);
    let recount = run_json(["--db", path_str(&db), "report", "counts"]);
    assert_eq!(recount["counts"], *counts);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn sync_honours_yaml_folder_scope() {
    let dir = unique_temp_dir("qal-scope");
    let db = dir.join("ledger.sqlite3");
    let snapshot = dir.join("scale.json");
    let config = dir.join("sync.yaml");
    write_file(&snapshot, SNAPSHOT);
    write_file(
        &config,
        "partition_size: 2\nworkers: 1\nprojects: [QA]\nfolder_scope:\n  scale: [Regression]\n",
    );

    let report = run_json([
        "--db",
        path_str(&db),
        "sync",
        "--snapshot",
        path_str(&snapshot),
        "--config",
        path_str(&config),
    ]);
    let units = report["units"].as_array().unwrap_or_else(|| panic!("units missing: {report}"));
    assert_eq!(units.len(), 1);
    assert_eq!(units[0]["total_partitions"], Value::from(1));

    let counts = run_json(["--db", path_str(&db), "report", "counts"]);
    assert_eq!(as_i64(&counts["counts"], "cycle"), 1);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn invalid_config_is_rejected_before_syncing() {
    let dir = unique_temp_dir("qal-bad-config");
    let db = dir.join("ledger.sqlite3");
    let snapshot = dir.join("scale.json");
    let config = dir.join("sync.yaml");
    write_file(&snapshot, SNAPSHOT);
    write_file(&config, "partition_size: 0\n");

    let output = run_qal([
        "--db",
        path_str(&db),
        "sync",
        "--snapshot",
        path_str(&snapshot),
        "--config",
        path_str(&config),
    ]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("partition_size MUST be >= 1"), "stderr:\n{stderr}");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn failed_run_exits_non_zero_with_a_report() {
    let dir = unique_temp_dir("qal-failed");
    let db = dir.join("ledger.sqlite3");
    let snapshot = dir.join("scale.json");
    write_file(
        &snapshot,
        r#"{
            "system": "scale",
            "projects": [{ "key": "QA", "name": "Quality" }],
            "test_cases": [{ "key": "QA-T1", "projectKey": "QA" }],
            "test_runs": [{ "key": "QA-C1", "name": "Nightly", "projectKey": "QA" }],
            "executions": { "QA-C1": [{ "testCaseKey": "QA-T1" }] }
        }"#,
    );

    let output = run_qal(["--db", path_str(&db), "sync", "--snapshot", path_str(&snapshot)]);
    assert!(!output.status.success());
    let report = parse_stdout(&output);
    assert_eq!(as_str(&report, "outcome"), "failed");
    assert_eq!(report["units"][0]["status"], Value::from("failed"));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn export_writes_manifest_and_tables() {
    let dir = unique_temp_dir("qal-export");
    let db = dir.join("ledger.sqlite3");
    let snapshot = dir.join("scale.json");
    let out = dir.join("export");
    write_file(&snapshot, SNAPSHOT);

    run_json(["--db", path_str(&db), "sync", "--snapshot", path_str(&snapshot)]);
    let exported = run_json(["--db", path_str(&db), "db", "export", "--out", path_str(&out)]);
    let files = exported["manifest"]["files"]
        .as_array()
        .unwrap_or_else(|| panic!("manifest files missing: {exported}"));
    assert_eq!(files.len(), 7);
    assert!(out.join("manifest.json").exists());
    assert!(out.join("execution.ndjson").exists());

    let _ = fs::remove_dir_all(&dir);
}
