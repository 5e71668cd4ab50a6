use crate::model::Command;
use crate::parser::names::is_identity_column_name;
use crate::rules::engine::{AnalysisInput, Rule};
use crate::rules::finding::{Category, Finding, Severity};
use crate::rules::predicates::{equality_columns, restricts_identity};

/// `UPDATE` policies that scope rows by owner or tenant in `USING` but
/// never check the rewritten row.
pub struct MissingWithCheckRule;

impl Rule for MissingWithCheckRule {
    fn category(&self) -> Category {
        Category::MissingWithCheck
    }

    fn check_table(&self, input: &AnalysisInput<'_>, table: &str) -> Vec<Finding> {
        input
            .policies
            .on_table(table)
            .filter(|p| p.applies_to_command(Command::Update) && p.with_check.is_none())
            .filter_map(|p| {
                let using = p.using.as_ref()?;
                if !restricts_identity(using, table) {
                    return None;
                }
                let mut columns: Vec<&str> = equality_columns(using, table)
                    .into_iter()
                    .map(|c| c.column.as_str())
                    .filter(|c| is_identity_column_name(c))
                    .collect();
                columns.sort_unstable();
                columns.dedup();
                Some(Finding::new(
                    Category::MissingWithCheck,
                    Severity::High,
                    table,
                    [p.name.clone()],
                    format!(
                        "`{}` covers UPDATE and restricts `{}` in USING without a WITH CHECK; \
                         an updated row can be reassigned to a different owner or tenant",
                        p.name,
                        columns.join("`, `")
                    ),
                ))
            })
            .collect()
    }
}
