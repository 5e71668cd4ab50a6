use std::collections::{BTreeMap, BTreeSet};

use crate::eval::context::{Dataset, Row, SessionContext};
use crate::eval::evaluator::Evaluator;
use crate::model::{Command, Disposition, Policy};
use crate::rules::engine::{AnalysisInput, Rule};
use crate::rules::finding::{Category, Finding, Severity};
use crate::rules::predicates::{equality_session_vars, governing_exprs, has_null_guard};
use crate::rules::sampling::SampleSpace;

/// A lone permissive policy that compares session input with `=`/`<>` and
/// never passes when that input is NULL.
pub struct NullLockoutRule;

impl Rule for NullLockoutRule {
    fn category(&self) -> Category {
        Category::NullLockout
    }

    fn check_table(&self, input: &AnalysisInput<'_>, table: &str) -> Vec<Finding> {
        let Some(table_def) = input.schema.table(table) else {
            return Vec::new();
        };
        let data = Dataset::new();
        let mut locked: BTreeMap<&str, (Vec<Command>, String)> = BTreeMap::new();

        for command in Command::ALL {
            let participating: Vec<&Policy> = input
                .policies
                .on_table(table)
                .filter(|p| p.applies_to_command(command))
                .filter(|p| !governing_exprs(p, command).is_empty())
                .collect();
            let permissive: Vec<&Policy> = participating
                .iter()
                .copied()
                .filter(|p| p.disposition == Disposition::Permissive)
                .collect();
            let &[policy] = permissive.as_slice() else {
                continue;
            };

            let exprs = governing_exprs(policy, command);
            let vars: BTreeSet<&str> = exprs.iter().flat_map(|e| equality_session_vars(e)).collect();
            if vars.is_empty() || exprs.iter().any(|e| has_null_guard(e)) {
                continue;
            }

            let mut ctx = vars
                .iter()
                .fold(SessionContext::new(), |ctx, var| ctx.with_unknown(var));
            if !policy.is_public() {
                if let Some(role) = policy.roles.iter().next() {
                    ctx = ctx.with_role(role);
                }
            }

            let space = SampleSpace::for_table(
                table_def,
                participating.iter().flat_map(|p| governing_exprs(p, command)),
            );
            let mut rows = space.rows(input.config.max_sample_rows);
            if rows.is_empty() {
                rows.push(Row::new());
            }

            let evaluator = Evaluator::new(input.policies, &data, &ctx)
                .with_max_depth(input.config.max_depth);
            let mut any_granted = false;
            let mut conclusive = true;
            for row in &rows {
                match evaluator.resolve_command(table, command, row) {
                    Ok(resolution) if resolution.is_granted() => {
                        any_granted = true;
                        break;
                    }
                    Ok(_) => {}
                    Err(_) => {
                        conclusive = false;
                        break;
                    }
                }
            }
            if any_granted || !conclusive {
                continue;
            }

            let entry = locked
                .entry(policy.name.as_str())
                .or_insert_with(|| (Vec::new(), ctx.to_assignments()));
            entry.0.push(command);
        }

        locked
            .into_iter()
            .map(|(policy, (commands, reproduction))| {
                let commands: Vec<&str> = commands.iter().map(|c| c.as_str()).collect();
                Finding::new(
                    Category::NullLockout,
                    Severity::High,
                    table,
                    [policy.to_string()],
                    format!(
                        "`{policy}` is the only permissive policy for {} on `{table}` and no row passes it \
                         when its session input is NULL; sessions without that input see nothing",
                        commands.join(", ")
                    ),
                )
                .with_reproduction(reproduction)
            })
            .collect()
    }
}
