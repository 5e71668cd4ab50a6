use std::collections::BTreeSet;

use crate::eval::context::{Dataset, Row, SessionContext};
use crate::eval::evaluator::Evaluator;
use crate::model::{Command, Disposition, Policy, Table, Value};
use crate::rules::engine::{AnalysisInput, Rule};
use crate::rules::finding::{Category, Finding, Severity};
use crate::rules::predicates::{governing_exprs, tenant_columns, tenant_session_vars};
use crate::rules::sampling::SampleSpace;

/// Tenant value the synthetic session belongs to.
const SESSION_TENANT: &str = "tenant_a";
/// Tenant value given to synthetic rows of another tenant.
const OTHER_TENANT: &str = "tenant_b";

/// Tenant scoping expressed only through permissive policies, which any
/// other permissive policy on the same command can bypass.
pub struct TenantIsolationRule;

struct Leak {
    context: String,
    row: Row,
}

fn tenant_columns_of<'p>(policy: &'p Policy, table: &str) -> BTreeSet<&'p str> {
    policy
        .expressions()
        .flat_map(|(_, expr)| tenant_columns(expr, table))
        .collect()
}

/// Search synthetic rows for one that `command` admits although no tenant
/// policy passes it.
fn find_leak(
    input: &AnalysisInput<'_>,
    table: &Table,
    command: Command,
    tenant_policies: &[&Policy],
    leaking: &Policy,
) -> Option<Leak> {
    let mut ctx = tenant_policies
        .iter()
        .flat_map(|p| {
            p.expressions()
                .flat_map(move |(_, e)| tenant_session_vars(e, &table.name))
        })
        .fold(SessionContext::new(), |ctx, var| {
            ctx.with_value(var, Value::Text(SESSION_TENANT.to_string()))
        });
    if !leaking.is_public() {
        if let Some(role) = leaking.roles.iter().next() {
            ctx = ctx.with_role(role);
        }
    }

    let participating: Vec<&Policy> = input
        .policies
        .on_table(&table.name)
        .filter(|p| p.applies_to_command(command))
        .collect();
    let mut space = SampleSpace::for_table(
        table,
        participating.iter().flat_map(|p| governing_exprs(p, command)),
    );
    for policy in tenant_policies {
        for column in tenant_columns_of(policy, &table.name) {
            space = space.with_values(column, [Value::Text(OTHER_TENANT.to_string())]);
        }
    }

    let tenant_names: BTreeSet<&str> = tenant_policies.iter().map(|p| p.name.as_str()).collect();
    let data = Dataset::new();
    let evaluator =
        Evaluator::new(input.policies, &data, &ctx).with_max_depth(input.config.max_depth);
    space
        .rows(input.config.max_sample_rows)
        .into_iter()
        .find(|row| {
            evaluator
                .resolve_command(&table.name, command, row)
                .is_ok_and(|res| {
                    res.is_granted()
                        && res
                            .outcomes
                            .iter()
                            .filter(|o| tenant_names.contains(o.policy.as_str()))
                            .all(|o| !o.result.is_true())
                })
        })
        .map(|row| Leak {
            context: ctx.to_assignments(),
            row,
        })
}

impl Rule for TenantIsolationRule {
    fn category(&self) -> Category {
        Category::PermissiveOnlyTenantIsolation
    }

    fn check_table(&self, input: &AnalysisInput<'_>, table: &str) -> Vec<Finding> {
        let Some(table_def) = input.schema.table(table) else {
            return Vec::new();
        };
        let policies: Vec<&Policy> = input.policies.on_table(table).collect();
        let (tenant_policies, others): (Vec<&Policy>, Vec<&Policy>) = policies
            .iter()
            .copied()
            .partition(|p| !tenant_columns_of(p, table).is_empty());
        if tenant_policies.is_empty()
            || tenant_policies
                .iter()
                .any(|p| p.disposition == Disposition::Restrictive)
        {
            return Vec::new();
        }

        let columns: BTreeSet<&str> = tenant_policies
            .iter()
            .flat_map(|p| tenant_columns_of(p, table))
            .collect();
        let columns = columns.into_iter().collect::<Vec<_>>().join("`, `");
        let tenant_names: Vec<String> = tenant_policies.iter().map(|p| p.name.clone()).collect();

        let tenant_commands: BTreeSet<Command> = tenant_policies
            .iter()
            .flat_map(|p| p.commands.iter().copied())
            .collect();
        let leaking: Vec<(&Policy, Vec<Command>)> = others
            .iter()
            .filter(|p| p.disposition == Disposition::Permissive)
            .filter_map(|p| {
                let shared: Vec<Command> = p
                    .commands
                    .iter()
                    .copied()
                    .filter(|c| tenant_commands.contains(c) && !governing_exprs(p, *c).is_empty())
                    .collect();
                (!shared.is_empty()).then_some((*p, shared))
            })
            .collect();

        if leaking.is_empty() {
            return vec![Finding::new(
                Category::PermissiveOnlyTenantIsolation,
                Severity::Medium,
                table,
                tenant_names,
                format!(
                    "tenant predicate on `{columns}` of `{table}` is only expressed as PERMISSIVE; \
                     any permissive policy added later is OR-ed with it and bypasses tenant isolation. \
                     Re-express it as RESTRICTIVE"
                ),
            )];
        }

        leaking
            .into_iter()
            .map(|(policy, commands)| {
                let listed: Vec<&str> = commands.iter().map(|c| c.as_str()).collect();
                let mut finding = Finding::new(
                    Category::PermissiveOnlyTenantIsolation,
                    Severity::High,
                    table,
                    tenant_names.iter().cloned().chain([policy.name.clone()]),
                    format!(
                        "tenant predicate on `{columns}` of `{table}` is only expressed as PERMISSIVE, \
                         and permissive `{}` ({}) is OR-ed with it, admitting rows of other tenants. \
                         Re-express the tenant check as RESTRICTIVE",
                        policy.name,
                        listed.join(", ")
                    ),
                );
                let leak = commands
                    .iter()
                    .find_map(|c| find_leak(input, table_def, *c, &tenant_policies, policy));
                if let Some(leak) = leak {
                    finding = finding
                        .with_reproduction(leak.context)
                        .with_counterexample(leak.row);
                }
                finding
            })
            .collect()
    }
}
