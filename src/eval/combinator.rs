use serde::Serialize;

use crate::eval::context::{Dataset, Row, SessionContext};
use crate::eval::error::EvalError;
use crate::eval::evaluator::Evaluator;
use crate::eval::trilean::Trilean;
use crate::model::{Clause, Command, Disposition, Phase, PolicySet};

/// Result of one policy's governing expression for one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyOutcome {
    /// Policy name.
    pub policy: String,
    /// Permissive or restrictive.
    pub disposition: Disposition,
    /// Clause that was evaluated.
    pub clause: Clause,
    /// Truth value it produced.
    pub result: Trilean,
}

/// Combined verdict plus the per-policy outcomes that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    /// `(OR permissive) AND (AND restrictive)`; only `True` grants access.
    pub verdict: Trilean,
    /// Outcomes in policy order.
    pub outcomes: Vec<PolicyOutcome>,
}

impl Resolution {
    /// Apply the combination rule: permissive outcomes are OR-ed (`False`
    /// when there are none), restrictive ones AND-ed (`True` when there are
    /// none), and the two results AND-ed.
    pub fn combine(outcomes: Vec<PolicyOutcome>) -> Self {
        let permissive = Trilean::any(
            outcomes
                .iter()
                .filter(|o| o.disposition == Disposition::Permissive)
                .map(|o| o.result),
        );
        let restrictive = Trilean::all(
            outcomes
                .iter()
                .filter(|o| o.disposition == Disposition::Restrictive)
                .map(|o| o.result),
        );
        Self {
            verdict: permissive & restrictive,
            outcomes,
        }
    }

    /// Whether the row passes.
    pub fn is_granted(&self) -> bool {
        self.verdict.is_true()
    }

    /// Both checks must pass; outcomes are concatenated.
    pub fn and(mut self, other: Resolution) -> Resolution {
        self.verdict = self.verdict & other.verdict;
        self.outcomes.extend(other.outcomes);
        self
    }

    /// Outcomes that decided the verdict: the passing permissive policies
    /// and failing restrictive ones when granted or denied respectively,
    /// otherwise every outcome.
    pub fn deciding(&self) -> Vec<&PolicyOutcome> {
        let deciding: Vec<&PolicyOutcome> = match self.verdict {
            Trilean::True => self
                .outcomes
                .iter()
                .filter(|o| o.disposition == Disposition::Permissive && o.result.is_true())
                .collect(),
            Trilean::False => self
                .outcomes
                .iter()
                .filter(|o| o.disposition == Disposition::Restrictive && o.result == Trilean::False)
                .collect(),
            Trilean::Unknown => Vec::new(),
        };
        if deciding.is_empty() {
            self.outcomes.iter().collect()
        } else {
            deciding
        }
    }
}

/// Row visibility (`USING`) for `command` on `table`, with no related rows.
pub fn resolve_visibility(
    policies: &PolicySet,
    table: &str,
    command: Command,
    ctx: &SessionContext,
    row: &Row,
) -> Result<Resolution, EvalError> {
    let data = Dataset::new();
    Evaluator::new(policies, &data, ctx).resolve(table, command, Phase::Read, row)
}

/// New-row validity (`WITH CHECK`, else `USING`) for `command` on `table`,
/// with no related rows.
pub fn resolve_write(
    policies: &PolicySet,
    table: &str,
    command: Command,
    ctx: &SessionContext,
    row: &Row,
) -> Result<Resolution, EvalError> {
    let data = Dataset::new();
    Evaluator::new(policies, &data, ctx).resolve(table, command, Phase::Write, row)
}

/// Every check `command` performs on `row`, with no related rows.
pub fn resolve_command(
    policies: &PolicySet,
    table: &str,
    command: Command,
    ctx: &SessionContext,
    row: &Row,
) -> Result<Resolution, EvalError> {
    let data = Dataset::new();
    Evaluator::new(policies, &data, ctx).resolve_command(table, command, row)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::model::{load_policies, load_schema, Value};
    use crate::parser::document::parse_json;

    const SCHEMA: &str = r#"{"tables":[
        {"name":"orders","columns":[{"name":"id","type":"int"},{"name":"tenant_id","type":"text"},{"name":"is_public","type":"boolean"},{"name":"owner_id","type":"text"}]},
        {"name":"members","columns":[{"name":"order_id","type":"int"},{"name":"user_id","type":"text"}]}
    ]}"#;

    fn policies(json: &str) -> PolicySet {
        let schema = load_schema(parse_json("schema", SCHEMA).expect("schema json should parse"))
            .expect("schema should load");
        load_policies(&schema, parse_json("policy", json).expect("policy json should parse"))
            .expect("policies should load")
    }

    fn order(tenant: &str, public: bool) -> Row {
        let mut row = BTreeMap::new();
        row.insert("id".to_string(), Value::Int(1));
        row.insert("tenant_id".to_string(), Value::Text(tenant.to_string()));
        row.insert("is_public".to_string(), Value::Bool(public));
        row.insert("owner_id".to_string(), Value::Text("u1".to_string()));
        row
    }

    fn tenant(t: &str) -> SessionContext {
        SessionContext::new().with_value("tenant_id", Value::Text(t.to_string()))
    }

    #[test]
    fn no_permissive_policy_means_no_access() {
        let set = policies(
            r#"{"policies":[{"table":"orders","policy_name":"tenant","disposition":"RESTRICTIVE","commands":["SELECT"],"using_expr":"tenant_id = sessionvar(tenant_id)"}]}"#,
        );
        let res = resolve_visibility(&set, "orders", Command::Select, &tenant("a"), &order("a", false))
            .expect("resolution should succeed");
        assert_eq!(res.verdict, Trilean::False);
        assert_eq!(res.outcomes.len(), 1);

        let empty = PolicySet::default();
        let res = resolve_visibility(&empty, "orders", Command::Select, &tenant("a"), &order("a", true))
            .expect("resolution should succeed");
        assert_eq!(res.verdict, Trilean::False);
        assert!(res.outcomes.is_empty());
    }

    #[test]
    fn permissive_policies_or_together() {
        let set = policies(
            r#"{"policies":[
                {"table":"orders","policy_name":"tenant","commands":["SELECT"],"using_expr":"tenant_id = sessionvar(tenant_id)"},
                {"table":"orders","policy_name":"public","commands":["SELECT"],"using_expr":"is_public = true"}]}"#,
        );
        let res = resolve_visibility(&set, "orders", Command::Select, &tenant("a"), &order("b", true))
            .expect("resolution should succeed");
        assert!(res.is_granted());
        let deciding: Vec<_> = res.deciding().iter().map(|o| o.policy.as_str()).collect();
        assert_eq!(deciding, vec!["public"]);
    }

    #[test]
    fn restrictive_policy_closes_the_leak() {
        let set = policies(
            r#"{"policies":[
                {"table":"orders","policy_name":"tenant","disposition":"RESTRICTIVE","commands":["SELECT"],"using_expr":"tenant_id = sessionvar(tenant_id)"},
                {"table":"orders","policy_name":"public","commands":["SELECT"],"using_expr":"is_public = true"}]}"#,
        );
        let leak = resolve_visibility(&set, "orders", Command::Select, &tenant("a"), &order("b", true))
            .expect("resolution should succeed");
        assert_eq!(leak.verdict, Trilean::False);
        assert_eq!(leak.deciding()[0].policy, "tenant");

        let own = resolve_visibility(&set, "orders", Command::Select, &tenant("a"), &order("a", true))
            .expect("resolution should succeed");
        assert!(own.is_granted());
    }

    #[test]
    fn unknown_restrictive_result_withholds_the_row() {
        let set = policies(
            r#"{"policies":[
                {"table":"orders","policy_name":"tenant","disposition":"RESTRICTIVE","commands":["SELECT"],"using_expr":"tenant_id = sessionvar(tenant_id)"},
                {"table":"orders","policy_name":"public","commands":["SELECT"],"using_expr":"is_public = true"}]}"#,
        );
        let ctx = SessionContext::new().with_unknown("tenant_id");
        let res = resolve_visibility(&set, "orders", Command::Select, &ctx, &order("a", true))
            .expect("resolution should succeed");
        assert_eq!(res.verdict, Trilean::Unknown);
        assert!(!res.is_granted());
    }

    #[test]
    fn write_phase_prefers_with_check_and_update_needs_both() {
        let set = policies(
            r#"{"policies":[{"table":"orders","policy_name":"owner","commands":["UPDATE"],
                "using_expr":"owner_id = sessionvar(user_id)",
                "with_check_expr":"tenant_id = sessionvar(tenant_id)"}]}"#,
        );
        let ctx = tenant("a").with_value("user_id", Value::Text("u1".to_string()));
        let write = resolve_write(&set, "orders", Command::Update, &ctx, &order("b", false))
            .expect("resolution should succeed");
        assert_eq!(write.verdict, Trilean::False);
        assert_eq!(write.outcomes[0].clause, Clause::WithCheck);

        let update = resolve_command(&set, "orders", Command::Update, &ctx, &order("a", false))
            .expect("resolution should succeed");
        assert!(update.is_granted());
        assert_eq!(update.outcomes.len(), 2);

        let update = resolve_command(&set, "orders", Command::Update, &ctx, &order("b", false))
            .expect("resolution should succeed");
        assert_eq!(update.verdict, Trilean::False);
    }

    #[test]
    fn policies_for_other_roles_do_not_participate() {
        let set = policies(
            r#"{"policies":[{"table":"orders","policy_name":"admin","roles":["admin"],"commands":["SELECT"],"using_expr":"TRUE"}]}"#,
        );
        let row = order("a", false);
        let anon = resolve_visibility(&set, "orders", Command::Select, &SessionContext::new(), &row)
            .expect("resolution should succeed");
        assert_eq!(anon.verdict, Trilean::False);

        let admin = SessionContext::new().with_role("admin");
        let res = resolve_visibility(&set, "orders", Command::Select, &admin, &row)
            .expect("resolution should succeed");
        assert!(res.is_granted());
    }

    #[test]
    fn subquery_rows_pass_through_their_own_policies() {
        let set = policies(
            r#"{"policies":[
                {"table":"orders","policy_name":"member","commands":["SELECT"],
                 "using_expr":"EXISTS (SELECT 1 FROM members m WHERE m.order_id = orders.id AND m.user_id = sessionvar(user_id))"},
                {"table":"members","policy_name":"own_rows","commands":["SELECT"],"using_expr":"user_id = sessionvar(user_id)"}]}"#,
        );
        let mut member = BTreeMap::new();
        member.insert("order_id".to_string(), Value::Int(1));
        member.insert("user_id".to_string(), Value::Text("u1".to_string()));
        let data = Dataset::new().with_rows("members", vec![member]);

        let ctx = SessionContext::new().with_value("user_id", Value::Text("u1".to_string()));
        let res = Evaluator::new(&set, &data, &ctx)
            .resolve("orders", Command::Select, Phase::Read, &order("a", false))
            .expect("resolution should succeed");
        assert!(res.is_granted());

        let other = SessionContext::new().with_value("user_id", Value::Text("u2".to_string()));
        let res = Evaluator::new(&set, &data, &other)
            .resolve("orders", Command::Select, Phase::Read, &order("a", false))
            .expect("resolution should succeed");
        assert_eq!(res.verdict, Trilean::False);
    }

    #[test]
    fn nested_scans_of_the_same_table_are_not_a_cycle() {
        let set = policies(
            r#"{"policies":[
                {"table":"orders","policy_name":"co_member","commands":["SELECT"],
                 "using_expr":"EXISTS (SELECT 1 FROM members m1 WHERE m1.order_id = orders.id AND m1.user_id IN (SELECT m2.user_id FROM members m2 WHERE m2.user_id = sessionvar(user_id)))"},
                {"table":"members","policy_name":"own_rows","commands":["SELECT"],"using_expr":"user_id = sessionvar(user_id)"}]}"#,
        );
        assert!(crate::graph::detect_cycles(&crate::graph::build_graph(&set)).is_empty());

        let mut member = BTreeMap::new();
        member.insert("order_id".to_string(), Value::Int(1));
        member.insert("user_id".to_string(), Value::Text("u1".to_string()));
        let data = Dataset::new().with_rows("members", vec![member]);

        let ctx = SessionContext::new().with_value("user_id", Value::Text("u1".to_string()));
        let res = Evaluator::new(&set, &data, &ctx)
            .resolve("orders", Command::Select, Phase::Read, &order("a", false))
            .expect("nested scans should not be reported as a cycle");
        assert!(res.is_granted());
    }

    #[test]
    fn mutual_references_fail_with_runtime_cycle() {
        let set = policies(
            r#"{"policies":[
                {"table":"orders","policy_name":"member","commands":["SELECT"],
                 "using_expr":"EXISTS (SELECT 1 FROM members m WHERE m.order_id = orders.id)"},
                {"table":"members","policy_name":"via_order","commands":["SELECT"],
                 "using_expr":"order_id IN (SELECT id FROM orders)"}]}"#,
        );
        let err = resolve_visibility(&set, "orders", Command::Select, &SessionContext::new(), &order("a", false))
            .expect_err("cycle should be detected");
        assert_eq!(
            err,
            EvalError::CycleDetectedAtRuntime {
                path: vec!["orders".to_string(), "members".to_string(), "orders".to_string()]
            }
        );
    }

    #[test]
    fn depth_budget_bounds_subquery_chains() {
        let set = policies(
            r#"{"policies":[
                {"table":"orders","policy_name":"member","commands":["SELECT"],
                 "using_expr":"EXISTS (SELECT 1 FROM members m WHERE m.order_id = orders.id)"}]}"#,
        );
        let data = Dataset::new();
        let ctx = SessionContext::new();
        let err = Evaluator::new(&set, &data, &ctx)
            .with_max_depth(1)
            .resolve("orders", Command::Select, Phase::Read, &order("a", false))
            .expect_err("depth budget should be exceeded");
        assert!(matches!(err, EvalError::DepthExceeded { max_depth: 1, .. }));
    }
}
