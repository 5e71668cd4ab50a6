use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{debug, info_span, warn};

use crate::config::AnalyzerConfig;
use crate::graph::{Cycle, DependencyGraph};
use crate::model::{PolicySet, Schema};
use crate::rules::finding::{Category, Finding};
use crate::rules::{
    case_sensitivity::CaseSensitivityRule, cycles::PolicyCycleRule,
    load_diagnostics::LoadDiagnosticsRule, missing_with_check::MissingWithCheckRule,
    null_lockout::NullLockoutRule, tenant_isolation::TenantIsolationRule,
    unindexed::UnindexedPredicateRule, unsupported::UnsupportedConstructRule,
};

/// Immutable inputs shared by every rule.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisInput<'a> {
    /// Loaded schema.
    pub schema: &'a Schema,
    /// Loaded policies.
    pub policies: &'a PolicySet,
    /// Table reference graph.
    pub graph: &'a DependencyGraph,
    /// Cycles found in `graph`.
    pub cycles: &'a [Cycle],
    /// Run configuration.
    pub config: &'a AnalyzerConfig,
}

/// One anti-pattern check.
///
/// Rules are pure: the same input always yields the same findings, and no
/// rule sees another rule's output.
pub trait Rule: Send + Sync {
    /// Category of the findings this rule produces.
    fn category(&self) -> Category;

    /// Findings scoped to `table`.
    fn check_table(&self, _input: &AnalysisInput<'_>, _table: &str) -> Vec<Finding> {
        Vec::new()
    }

    /// Findings that are not tied to a single table.
    fn check_global(&self, _input: &AnalysisInput<'_>) -> Vec<Finding> {
        Vec::new()
    }
}

/// Every built-in rule.
pub fn default_rules() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(NullLockoutRule),
        Box::new(PolicyCycleRule),
        Box::new(CaseSensitivityRule),
        Box::new(LoadDiagnosticsRule),
        Box::new(MissingWithCheckRule),
        Box::new(TenantIsolationRule),
        Box::new(UnindexedPredicateRule),
        Box::new(UnsupportedConstructRule),
    ]
}

#[derive(Clone, Copy)]
enum Task<'r> {
    Table(&'r dyn Rule, &'r str),
    Global(&'r dyn Rule),
}

impl Task<'_> {
    fn run(self, input: &AnalysisInput<'_>) -> Vec<Finding> {
        match self {
            Task::Table(rule, table) => {
                let findings = rule.check_table(input, table);
                debug!(rule = %rule.category(), table, count = findings.len(), "rule checked table");
                findings
            }
            Task::Global(rule) => {
                let findings = rule.check_global(input);
                debug!(rule = %rule.category(), count = findings.len(), "rule checked policy set");
                findings
            }
        }
    }
}

/// Run `rules` on a pool of `config.worker_threads` threads, one task per
/// (table, rule) pair plus one global task per rule, and return the merged
/// findings in report order.
pub fn run_rules(input: &AnalysisInput<'_>, rules: &[Box<dyn Rule>]) -> Vec<Finding> {
    let span = info_span!("rules", rules = rules.len(), threads = input.config.worker_threads);
    let _guard = span.enter();

    let tables = input.schema.table_names();
    let mut tasks = Vec::with_capacity(rules.len() * (tables.len() + 1));
    for rule in rules {
        tasks.push(Task::Global(rule.as_ref()));
        for table in &tables {
            tasks.push(Task::Table(rule.as_ref(), table));
        }
    }

    let mut findings: Vec<Finding> = match ThreadPoolBuilder::new()
        .num_threads(input.config.worker_threads)
        .build()
    {
        Ok(pool) => pool.install(|| {
            tasks
                .par_iter()
                .flat_map_iter(|task| task.run(input))
                .collect()
        }),
        Err(err) => {
            warn!(error = %err, "worker pool unavailable, running rules sequentially");
            tasks.iter().flat_map(|task| task.run(input)).collect()
        }
    };
    findings.sort_by(Finding::report_order);
    findings.dedup();
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{build_graph, detect_cycles};
    use crate::model::{load_policies, load_schema};
    use crate::parser::document::parse_json;
    use crate::rules::finding::Severity;

    struct Fixed;

    impl Rule for Fixed {
        fn category(&self) -> Category {
            Category::UnsupportedConstruct
        }

        fn check_table(&self, _input: &AnalysisInput<'_>, table: &str) -> Vec<Finding> {
            let severity = if table == "a" { Severity::Low } else { Severity::High };
            vec![Finding::new(self.category(), severity, table, Vec::new(), "fixed")]
        }

        fn check_global(&self, _input: &AnalysisInput<'_>) -> Vec<Finding> {
            vec![Finding::new(self.category(), Severity::Info, "*", Vec::new(), "global")]
        }
    }

    #[test]
    fn findings_are_merged_in_report_order_for_any_pool_size() {
        let schema = load_schema(
            parse_json(
                "schema",
                r#"{"tables":[{"name":"b","columns":[{"name":"x","type":"int"}]},{"name":"a","columns":[{"name":"x","type":"int"}]}]}"#,
            )
            .expect("schema json should parse"),
        )
        .expect("schema should load");
        let policies = load_policies(&schema, parse_json("policy", r#"{"policies":[]}"#).expect("policy json should parse"))
            .expect("policies should load");
        let graph = build_graph(&policies);
        let cycles = detect_cycles(&graph);
        let rules: Vec<Box<dyn Rule>> = vec![Box::new(Fixed)];

        let mut outputs = Vec::new();
        for threads in [1, 4] {
            let config = AnalyzerConfig::default().with_overrides(Some(threads), None, None);
            let input = AnalysisInput {
                schema: &schema,
                policies: &policies,
                graph: &graph,
                cycles: &cycles,
                config: &config,
            };
            outputs.push(run_rules(&input, &rules));
        }
        assert_eq!(outputs[0], outputs[1]);
        let order: Vec<_> = outputs[0].iter().map(|f| f.table.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "*"]);
    }
}
