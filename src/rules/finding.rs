use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;

use crate::eval::context::Row;
use crate::graph::Cycle;

/// Anti-pattern category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Category {
    /// The only permissive policy can never pass when a session variable is NULL.
    NullLockout,
    /// Tables whose policies reference each other.
    PolicyCycle,
    /// Byte-exact text comparison against session input or another text column.
    CaseSensitivityMismatch,
    /// Column reference that resolves to no declared column.
    DanglingColumnRef,
    /// `UPDATE` policy restricting by owner/tenant with no `WITH CHECK`.
    MissingWithCheck,
    /// Tenant predicate expressed only as a permissive policy.
    PermissiveOnlyTenantIsolation,
    /// Predicate column not covered by an index.
    UnindexedPredicateColumn,
    /// Construct outside the supported grammar, or an unknown function.
    UnsupportedConstruct,
    /// Unqualified subquery column bound to the inner table although the
    /// outer table declares the same name.
    ShadowedColumnRef,
    /// Cycle or depth budget hit while simulating.
    RuntimeCycle,
}

impl Category {
    /// Every category, in report order.
    pub const ALL: [Category; 10] = [
        Category::NullLockout,
        Category::PolicyCycle,
        Category::CaseSensitivityMismatch,
        Category::DanglingColumnRef,
        Category::MissingWithCheck,
        Category::PermissiveOnlyTenantIsolation,
        Category::UnindexedPredicateColumn,
        Category::UnsupportedConstruct,
        Category::ShadowedColumnRef,
        Category::RuntimeCycle,
    ];

    /// Category name as used in reports.
    pub fn as_str(self) -> &'static str {
        match self {
            Category::NullLockout => "NullLockout",
            Category::PolicyCycle => "PolicyCycle",
            Category::CaseSensitivityMismatch => "CaseSensitivityMismatch",
            Category::DanglingColumnRef => "DanglingColumnRef",
            Category::MissingWithCheck => "MissingWithCheck",
            Category::PermissiveOnlyTenantIsolation => "PermissiveOnlyTenantIsolation",
            Category::UnindexedPredicateColumn => "UnindexedPredicateColumn",
            Category::UnsupportedConstruct => "UnsupportedConstruct",
            Category::ShadowedColumnRef => "ShadowedColumnRef",
            Category::RuntimeCycle => "RuntimeCycle",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finding severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational; never affects the exit status.
    Info,
    /// Low
    Low,
    /// Medium
    Medium,
    /// High
    High,
    /// Critical
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => f.write_str("info"),
            Severity::Low => f.write_str("low"),
            Severity::Medium => f.write_str("medium"),
            Severity::High => f.write_str("high"),
            Severity::Critical => f.write_str("critical"),
        }
    }
}

/// One reported problem.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    /// Category.
    pub category: Category,
    /// Severity.
    pub severity: Severity,
    /// Table the finding is attached to.
    pub table: String,
    /// Policies involved, sorted.
    pub policies: Vec<String>,
    /// Human-readable explanation.
    pub explanation: String,
    /// Cycle, for `PolicyCycle`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle: Option<Cycle>,
    /// Session context reproducing the problem, as `k=v,...` for `simulate --context`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reproduction: Option<String>,
    /// Row demonstrating the problem under `reproduction`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterexample: Option<Row>,
}

impl Finding {
    /// A finding with no cycle, reproduction or counter-example.
    pub fn new(
        category: Category,
        severity: Severity,
        table: impl Into<String>,
        policies: impl IntoIterator<Item = String>,
        explanation: impl Into<String>,
    ) -> Self {
        let mut policies: Vec<String> = policies.into_iter().collect();
        policies.sort();
        policies.dedup();
        Self {
            category,
            severity,
            table: table.into(),
            policies,
            explanation: explanation.into(),
            cycle: None,
            reproduction: None,
            counterexample: None,
        }
    }

    /// Attach a reproduction context.
    pub fn with_reproduction(mut self, context: impl Into<String>) -> Self {
        self.reproduction = Some(context.into());
        self
    }

    /// Attach a counter-example row.
    pub fn with_counterexample(mut self, row: Row) -> Self {
        self.counterexample = Some(row);
        self
    }

    /// Attach a cycle.
    pub fn with_cycle(mut self, cycle: Cycle) -> Self {
        self.cycle = Some(cycle);
        self
    }

    /// Report order: severity descending, then table, category, policies
    /// and explanation.
    pub fn report_order(&self, other: &Finding) -> Ordering {
        other
            .severity
            .cmp(&self.severity)
            .then_with(|| self.table.cmp(&other.table))
            .then_with(|| self.category.cmp(&other.category))
            .then_with(|| self.policies.cmp(&other.policies))
            .then_with(|| self.explanation.cmp(&other.explanation))
    }
}

/// Whether any finding should fail the run (anything above `Info`).
pub fn has_actionable(findings: &[Finding]) -> bool {
    findings.iter().any(|f| f.severity > Severity::Info)
}
