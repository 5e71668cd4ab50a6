mod support;

use rlscheck::eval::Trilean;
use rlscheck::model::Value;
use rlscheck::rules::{Category, Finding, Severity};

fn of_category(findings: &[Finding], category: Category) -> Vec<&Finding> {
    findings.iter().filter(|f| f.category == category).collect()
}

#[test]
fn null_session_variable_locks_out_every_profile() {
    let result = support::simulate_fixture("null_lockout");
    assert_eq!(result.rows.len(), 2);
    assert!(
        result.rows.iter().all(|r| !r.verdict().is_true()),
        "no row should be visible with user_id unknown: {result:?}"
    );
    assert_eq!(result.granted(), 0);
    assert!(result.findings.is_empty());
    assert_eq!(result.context, "user_id=null");

    let report = support::analyze_fixture("null_lockout");
    let lockouts = of_category(&report.findings, Category::NullLockout);
    assert_eq!(lockouts.len(), 1, "{:?}", report.findings);
    assert_eq!(lockouts[0].table, "profiles");
    assert_eq!(lockouts[0].severity, Severity::High);
    assert_eq!(lockouts[0].policies, vec!["own_profile".to_string()]);
    assert_eq!(lockouts[0].reproduction.as_deref(), Some("user_id=null"));
    assert!(!report.is_clean());
}

#[test]
fn mutual_subqueries_form_one_two_table_cycle() {
    let report = support::analyze_fixture("policy_cycle");
    assert_eq!(report.cycles.len(), 1);
    assert_eq!(
        report.cycles[0].tables,
        vec!["documents".to_string(), "memberships".to_string()]
    );
    assert_eq!(
        report.cycles[0].policies(),
        vec![
            "documents.member_documents".to_string(),
            "memberships.visible_documents".to_string()
        ]
    );

    let first = &report.findings[0];
    assert_eq!(first.category, Category::PolicyCycle);
    assert_eq!(first.severity, Severity::Critical);
    assert!(first.cycle.is_some());
}

#[test]
fn simulating_a_cyclic_table_reports_a_runtime_cycle() {
    let result = support::simulate_fixture("policy_cycle");
    assert_eq!(result.rows.len(), 1);
    assert!(result.rows[0].resolution.is_none());
    assert_eq!(result.rows[0].verdict(), Trilean::Unknown);
    let error = result.rows[0].error.as_deref().unwrap_or_default();
    assert!(
        error.contains("documents -> memberships -> documents"),
        "unexpected error: {error}"
    );

    assert_eq!(result.findings.len(), 1);
    assert_eq!(result.findings[0].category, Category::RuntimeCycle);
    assert_eq!(result.findings[0].reproduction.as_deref(), Some("user_id=u1"));
}

#[test]
fn raw_text_equality_against_session_input_is_case_sensitive() {
    let report = support::analyze_fixture("case_mismatch");
    let mismatches = of_category(&report.findings, Category::CaseSensitivityMismatch);
    assert_eq!(mismatches.len(), 1, "{:?}", report.findings);
    assert_eq!(mismatches[0].table, "users");
    assert_eq!(mismatches[0].severity, Severity::Medium);

    let result = support::simulate_fixture("case_mismatch");
    let verdicts: Vec<Trilean> = result.rows.iter().map(|r| r.verdict()).collect();
    assert_eq!(verdicts, vec![Trilean::False, Trilean::True]);
}

#[test]
fn lowercasing_both_sides_clears_the_case_finding() {
    let report = support::analyze_fixture_with("case_mismatch", "normalized.json");
    assert!(
        of_category(&report.findings, Category::CaseSensitivityMismatch).is_empty(),
        "{:?}",
        report.findings
    );

    let result = support::simulate_fixture_with("case_mismatch", "normalized.json");
    assert_eq!(result.granted(), 2);
}

#[test]
fn permissive_public_policy_leaks_rows_of_other_tenants() {
    let result = support::simulate_fixture("tenant_leak");
    let verdicts: Vec<Trilean> = result.rows.iter().map(|r| r.verdict()).collect();
    assert_eq!(verdicts, vec![Trilean::True, Trilean::False, Trilean::True]);

    let leaked = &result.rows[0];
    let outcomes = &leaked
        .resolution
        .as_ref()
        .expect("row should resolve")
        .outcomes;
    let tenant = outcomes
        .iter()
        .find(|o| o.policy == "tenant_scope")
        .expect("tenant policy should participate");
    assert_eq!(tenant.result, Trilean::False);

    let report = support::analyze_fixture("tenant_leak");
    let leaks = of_category(&report.findings, Category::PermissiveOnlyTenantIsolation);
    assert_eq!(leaks.len(), 1, "{:?}", report.findings);
    assert_eq!(leaks[0].severity, Severity::High);
    assert_eq!(
        leaks[0].policies,
        vec!["public_orders".to_string(), "tenant_scope".to_string()]
    );
    assert_eq!(leaks[0].reproduction.as_deref(), Some("tenant_id=tenant_a"));
    let row = leaks[0]
        .counterexample
        .as_ref()
        .expect("leak should carry a counter-example");
    assert_eq!(row.get("tenant_id"), Some(&Value::Text("tenant_b".to_string())));
    assert_eq!(row.get("is_public"), Some(&Value::Bool(true)));
}

#[test]
fn restrictive_tenant_policy_closes_the_leak() {
    let report = support::analyze_fixture_with("tenant_leak", "restrictive.json");
    assert!(of_category(&report.findings, Category::PermissiveOnlyTenantIsolation).is_empty());

    let result = support::simulate_fixture_with("tenant_leak", "restrictive.json");
    let verdicts: Vec<Trilean> = result.rows.iter().map(|r| r.verdict()).collect();
    assert_eq!(verdicts, vec![Trilean::False, Trilean::False, Trilean::False]);
}

#[test]
fn update_policy_without_with_check_is_flagged() {
    let report = support::analyze_fixture("missing_with_check");
    let missing = of_category(&report.findings, Category::MissingWithCheck);
    assert_eq!(missing.len(), 1, "{:?}", report.findings);
    assert_eq!(missing[0].severity, Severity::High);
    assert_eq!(missing[0].policies, vec!["edit_own".to_string()]);

    let fixed = support::analyze_fixture_with("missing_with_check", "with_check.json");
    assert!(of_category(&fixed.findings, Category::MissingWithCheck).is_empty());
}

#[test]
fn update_without_with_check_falls_back_to_using() {
    let result = support::simulate_fixture("missing_with_check");
    let verdicts: Vec<Trilean> = result.rows.iter().map(|r| r.verdict()).collect();
    assert_eq!(verdicts, vec![Trilean::True, Trilean::False]);
}

#[test]
fn indexed_flag_policy_is_clean() {
    let report = support::analyze_fixture("clean");
    assert!(report.is_clean(), "{:?}", report.findings);
    assert!(report.cycles.is_empty());

    let result = support::simulate_fixture("clean");
    assert_eq!(result.granted(), 1);
    assert!(result.findings.is_empty());
}
