use crate::rules::engine::{AnalysisInput, Rule};
use crate::rules::finding::{Category, Finding, Severity};

/// Reports every cycle of the dependency graph on the cycle's first table.
pub struct PolicyCycleRule;

impl Rule for PolicyCycleRule {
    fn category(&self) -> Category {
        Category::PolicyCycle
    }

    fn check_table(&self, input: &AnalysisInput<'_>, table: &str) -> Vec<Finding> {
        input
            .cycles
            .iter()
            .filter(|cycle| cycle.tables.first().is_some_and(|first| first == table))
            .map(|cycle| {
                let explanation = if cycle.tables.len() == 1 {
                    format!(
                        "a policy on `{table}` queries `{table}` itself; evaluating it recurses without end"
                    )
                } else {
                    format!(
                        "policies reference each other along {}; evaluating any of them recurses without end",
                        cycle.describe()
                    )
                };
                Finding::new(Category::PolicyCycle, Severity::Critical, table, cycle.policies(), explanation)
                    .with_cycle(cycle.clone())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalyzerConfig;
    use crate::graph::{build_graph, detect_cycles};
    use crate::model::{load_policies, load_schema};
    use crate::parser::document::parse_json;

    #[test]
    fn two_table_cycle_is_reported_once() {
        let schema = load_schema(
            parse_json(
                "schema",
                r#"{"tables":[
                    {"name":"documents","columns":[{"name":"id","type":"int"}]},
                    {"name":"memberships","columns":[{"name":"doc_id","type":"int"}]}]}"#,
            )
            .expect("schema json should parse"),
        )
        .expect("schema should load");
        let set = load_policies(
            &schema,
            parse_json(
                "policy",
                r#"{"policies":[
                    {"table":"documents","policy_name":"member","commands":["SELECT"],"using_expr":"id IN (SELECT doc_id FROM memberships)"},
                    {"table":"memberships","policy_name":"doc","commands":["SELECT"],"using_expr":"EXISTS (SELECT 1 FROM documents d WHERE d.id = memberships.doc_id)"}]}"#,
            )
            .expect("policy json should parse"),
        )
        .expect("policies should load");
        let graph = build_graph(&set);
        let cycles = detect_cycles(&graph);
        let config = AnalyzerConfig::default();
        let input = AnalysisInput {
            schema: &schema,
            policies: &set,
            graph: &graph,
            cycles: &cycles,
            config: &config,
        };

        let findings = PolicyCycleRule.check_table(&input, "documents");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[0].policies, vec!["documents.member", "memberships.doc"]);
        assert!(findings[0].cycle.is_some());
        assert!(PolicyCycleRule.check_table(&input, "memberships").is_empty());
    }
}
