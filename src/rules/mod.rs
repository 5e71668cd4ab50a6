/// Text comparisons that ignore letter case on one side only, or on neither.
pub mod case_sensitivity;
/// Dependency-graph cycles reported as findings.
pub mod cycles;
/// Rule trait, shared input, and the worker-pool runner.
pub mod engine;
/// Finding, category and severity types.
pub mod finding;
/// Non-fatal load diagnostics re-reported as findings.
pub mod load_diagnostics;
/// `UPDATE` policies on owner/tenant columns without `WITH CHECK`.
pub mod missing_with_check;
/// Lone permissive policies that lock out NULL sessions.
pub mod null_lockout;
/// Predicate shape helpers shared by the rules.
pub mod predicates;
/// Synthetic row generation for simulation-based rules.
pub mod sampling;
/// Tenant predicates expressed only as permissive policies.
pub mod tenant_isolation;
/// Predicate columns without a covering index.
pub mod unindexed;
/// Opaque constructs and unknown functions.
pub mod unsupported;

pub use engine::{default_rules, run_rules, AnalysisInput, Rule};
pub use finding::{has_actionable, Category, Finding, Severity};

#[cfg(test)]
pub(crate) mod testing {
    use crate::config::AnalyzerConfig;
    use crate::graph::{build_graph, detect_cycles, Cycle, DependencyGraph};
    use crate::model::{load_policies, load_schema, PolicySet, Schema};
    use crate::parser::document::parse_json;
    use crate::rules::{AnalysisInput, Finding, Rule};

    /// Owned inputs for rule unit tests.
    pub struct Fixture {
        pub schema: Schema,
        pub policies: PolicySet,
        pub graph: DependencyGraph,
        pub cycles: Vec<Cycle>,
        pub config: AnalyzerConfig,
    }

    impl Fixture {
        pub fn new(schema: &str, policies: &str) -> Self {
            let schema = load_schema(parse_json("schema", schema).expect("schema json should parse"))
                .expect("schema should load");
            let policies = load_policies(&schema, parse_json("policy", policies).expect("policy json should parse"))
                .expect("policies should load");
            let graph = build_graph(&policies);
            let cycles = detect_cycles(&graph);
            Self {
                schema,
                policies,
                graph,
                cycles,
                config: AnalyzerConfig::default(),
            }
        }

        pub fn input(&self) -> AnalysisInput<'_> {
            AnalysisInput {
                schema: &self.schema,
                policies: &self.policies,
                graph: &self.graph,
                cycles: &self.cycles,
                config: &self.config,
            }
        }

        pub fn check(&self, rule: &dyn Rule, table: &str) -> Vec<Finding> {
            rule.check_table(&self.input(), table)
        }

        pub fn check_global(&self, rule: &dyn Rule) -> Vec<Finding> {
            rule.check_global(&self.input())
        }
    }
}
