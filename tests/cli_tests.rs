mod support;

use std::process::{Command, Output};

fn rlscheck(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rlscheck"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("should run rlscheck binary")
}

fn fixture(name: &str, file: &str) -> String {
    support::fixture_path(name, file).display().to_string()
}

fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout should be json ({e}):\n{}",
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

#[test]
fn analyze_clean_fixture_exits_zero() {
    let output = rlscheck(&[
        "analyze",
        &fixture("clean", "schema.json"),
        &fixture("clean", "policies.json"),
    ]);
    assert_eq!(output.status.code(), Some(0), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("# rlscheck Analysis Report"), "{stdout}");
    assert!(stdout.contains("No findings."), "{stdout}");
}

#[test]
fn analyze_with_findings_exits_one_and_emits_json() {
    let output = rlscheck(&[
        "analyze",
        &fixture("null_lockout", "schema.json"),
        &fixture("null_lockout", "policies.json"),
        "--format",
        "json",
    ]);
    assert_eq!(output.status.code(), Some(1), "{output:?}");
    let report = stdout_json(&output);
    assert_eq!(report["clean"], serde_json::Value::Bool(false));
    let categories: Vec<&str> = report["findings"]
        .as_array()
        .expect("findings should be an array")
        .iter()
        .filter_map(|f| f["category"].as_str())
        .collect();
    assert!(categories.contains(&"NullLockout"), "{categories:?}");
}

#[test]
fn analyze_writes_report_to_output_path() {
    let temp = support::unique_temp_dir("rlscheck_cli_output");
    let target = temp.join("reports").join("cycle.md");
    let output = rlscheck(&[
        "analyze",
        &fixture("policy_cycle", "schema.json"),
        &fixture("policy_cycle", "policies.json"),
        "--output",
        &target.display().to_string(),
    ]);
    assert_eq!(output.status.code(), Some(1), "{output:?}");
    assert!(output.stdout.is_empty());

    let report = std::fs::read_to_string(&target)
        .unwrap_or_else(|e| panic!("failed to read {}: {e}", target.display()));
    assert!(report.contains("PolicyCycle"), "{report}");
    assert!(report.contains("## Dependency Graph"), "{report}");
}

#[test]
fn simulate_request_file_reports_row_verdicts() {
    let output = rlscheck(&[
        "simulate",
        &fixture("tenant_leak", "schema.json"),
        &fixture("tenant_leak", "policies.json"),
        "--request",
        &fixture("tenant_leak", "request.json"),
        "--format",
        "json",
    ]);
    assert_eq!(output.status.code(), Some(0), "{output:?}");
    let result = stdout_json(&output);
    assert_eq!(result["table"], "orders");
    let verdicts: Vec<&str> = result["rows"]
        .as_array()
        .expect("rows should be an array")
        .iter()
        .filter_map(|r| r["resolution"]["verdict"].as_str())
        .collect();
    assert_eq!(verdicts, vec!["true", "false", "true"]);
}

#[test]
fn simulate_context_flag_overrides_the_request() {
    let output = rlscheck(&[
        "simulate",
        &fixture("tenant_leak", "schema.json"),
        &fixture("tenant_leak", "policies.json"),
        "--request",
        &fixture("tenant_leak", "request.json"),
        "--context",
        "tenant_id=t2",
        "--format",
        "json",
    ]);
    assert_eq!(output.status.code(), Some(0), "{output:?}");
    let result = stdout_json(&output);
    assert_eq!(result["context"], "tenant_id=t2");
    let verdicts: Vec<&str> = result["rows"]
        .as_array()
        .expect("rows should be an array")
        .iter()
        .filter_map(|r| r["resolution"]["verdict"].as_str())
        .collect();
    assert_eq!(verdicts, vec!["true", "true", "false"]);
}

#[test]
fn simulate_flags_work_without_a_request_file() {
    let temp = support::unique_temp_dir("rlscheck_cli_rows");
    let rows = temp.join("rows.json");
    std::fs::write(&rows, r#"[{"id": 1, "owner_id": "u1"}, {"id": 2, "owner_id": "u2"}]"#)
        .expect("should write rows file");

    let output = rlscheck(&[
        "simulate",
        &fixture("missing_with_check", "schema.json"),
        &fixture("missing_with_check", "policies.json"),
        "--table",
        "notes",
        "--command",
        "update",
        "--context",
        "user_id=u2",
        "--rows",
        &rows.display().to_string(),
    ]);
    assert_eq!(output.status.code(), Some(0), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("# rlscheck Simulation: UPDATE on `notes`"), "{stdout}");
    assert!(stdout.contains("granted: 1 of 2"), "{stdout}");
}

#[test]
fn simulate_runtime_cycle_exits_one() {
    let output = rlscheck(&[
        "simulate",
        &fixture("policy_cycle", "schema.json"),
        &fixture("policy_cycle", "policies.json"),
        "--request",
        &fixture("policy_cycle", "request.json"),
        "--format",
        "json",
    ]);
    assert_eq!(output.status.code(), Some(1), "{output:?}");
    let result = stdout_json(&output);
    assert_eq!(result["findings"][0]["category"], "RuntimeCycle");
}

#[test]
fn simulate_unknown_table_is_a_usage_error() {
    let output = rlscheck(&[
        "simulate",
        &fixture("clean", "schema.json"),
        &fixture("clean", "policies.json"),
        "--table",
        "missing",
    ]);
    assert_eq!(output.status.code(), Some(2), "{output:?}");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Error: simulation table `missing` is not in the schema"),
        "{stderr}"
    );
}

#[test]
fn missing_input_file_exits_two() {
    let output = rlscheck(&[
        "analyze",
        "tests/fixtures/does_not_exist/schema.json",
        &fixture("clean", "policies.json"),
    ]);
    assert_eq!(output.status.code(), Some(2), "{output:?}");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with("Error: failed to read"), "{stderr}");
}

#[test]
fn graph_command_exports_edges_and_signals_cycles() {
    let cyclic = rlscheck(&[
        "graph",
        &fixture("policy_cycle", "schema.json"),
        &fixture("policy_cycle", "policies.json"),
    ]);
    assert_eq!(cyclic.status.code(), Some(1), "{cyclic:?}");
    let edges = String::from_utf8_lossy(&cyclic.stdout);
    assert!(edges.contains("documents\tmemberships\tmember_documents"), "{edges}");

    let acyclic = rlscheck(&[
        "graph",
        &fixture("clean", "schema.json"),
        &fixture("clean", "policies.json"),
        "--format",
        "json",
    ]);
    assert_eq!(acyclic.status.code(), Some(0), "{acyclic:?}");
    let graph = stdout_json(&acyclic);
    assert_eq!(graph["nodes"][0], "articles");
}

#[test]
fn invalid_format_is_rejected_by_argument_parsing() {
    let output = rlscheck(&[
        "analyze",
        &fixture("clean", "schema.json"),
        &fixture("clean", "policies.json"),
        "--format",
        "yaml",
    ]);
    assert_eq!(output.status.code(), Some(2), "{output:?}");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid output format 'yaml'"), "{stderr}");
}
