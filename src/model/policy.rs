use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, warn};

use crate::model::ast::{ColumnRef, Expr, SubqueryMode};
use crate::model::error::PolicyError;
use crate::model::schema::Schema;
use crate::parser::document::{ExprSource, PolicyDefinition, PolicyDocument};
use crate::parser::expr::ExprParser;
use crate::parser::names::{fold_identifier, normalize_identifier, normalize_relation_name};

/// The role every session has.
pub const PUBLIC_ROLE: &str = "public";

/// SQL command a policy applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Command {
    /// `SELECT`
    Select,
    /// `INSERT`
    Insert,
    /// `UPDATE`
    Update,
    /// `DELETE`
    Delete,
}

impl Command {
    /// Every command, in declaration order. `ALL` expands to this.
    pub const ALL: [Command; 4] = [
        Command::Select,
        Command::Insert,
        Command::Update,
        Command::Delete,
    ];

    /// Upper-case SQL keyword.
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Select => "SELECT",
            Command::Insert => "INSERT",
            Command::Update => "UPDATE",
            Command::Delete => "DELETE",
        }
    }

    /// Parse one command keyword; `ALL` yields every command.
    pub fn parse_list_entry(raw: &str) -> Option<Vec<Command>> {
        if raw.trim().eq_ignore_ascii_case("all") {
            return Some(Command::ALL.to_vec());
        }
        raw.parse().ok().map(|cmd| vec![cmd])
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SELECT" => Ok(Command::Select),
            "INSERT" => Ok(Command::Insert),
            "UPDATE" => Ok(Command::Update),
            "DELETE" => Ok(Command::Delete),
            other => Err(format!("unknown command `{other}`")),
        }
    }
}

/// How a policy combines with its siblings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Disposition {
    /// OR-combined with other permissive policies.
    #[default]
    Permissive,
    /// AND-combined with every other restrictive policy.
    Restrictive,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Permissive => f.write_str("PERMISSIVE"),
            Disposition::Restrictive => f.write_str("RESTRICTIVE"),
        }
    }
}

impl FromStr for Disposition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PERMISSIVE" => Ok(Disposition::Permissive),
            "RESTRICTIVE" => Ok(Disposition::Restrictive),
            other => Err(format!("unknown disposition `{other}`")),
        }
    }
}

/// Evaluation phase: checking existing rows or validating new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Row visibility (`SELECT`, `DELETE`, the old row of `UPDATE`).
    Read,
    /// New-row validity (`INSERT`, the new row of `UPDATE`).
    Write,
}

/// Policy expression clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Clause {
    /// `USING (...)`
    Using,
    /// `WITH CHECK (...)`
    WithCheck,
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Clause::Using => f.write_str("USING"),
            Clause::WithCheck => f.write_str("WITH CHECK"),
        }
    }
}

/// A loaded, validated policy.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    /// Policy name, unique per table.
    pub name: String,
    /// Table the policy is attached to.
    pub table: String,
    /// Commands the policy applies to.
    pub commands: BTreeSet<Command>,
    /// Combination mode.
    pub disposition: Disposition,
    /// Roles the policy applies to; contains [`PUBLIC_ROLE`] for everyone.
    pub roles: BTreeSet<String>,
    /// Read filter.
    pub using: Option<Expr>,
    /// Write filter.
    pub with_check: Option<Expr>,
}

impl Policy {
    /// Whether the policy covers `command`.
    pub fn applies_to_command(&self, command: Command) -> bool {
        self.commands.contains(&command)
    }

    /// Whether the policy applies to everyone.
    pub fn is_public(&self) -> bool {
        self.roles.contains(PUBLIC_ROLE)
    }

    /// Whether the policy applies to a session with the given role.
    /// Without a role only `PUBLIC` policies apply.
    pub fn applies_to_role(&self, role: Option<&str>) -> bool {
        self.is_public() || role.is_some_and(|r| self.roles.contains(&normalize_identifier(r)))
    }

    /// The expression that governs `phase`. The write phase falls back to
    /// `USING` when no `WITH CHECK` is present.
    pub fn governing(&self, phase: Phase) -> Option<(Clause, &Expr)> {
        match phase {
            Phase::Read => self.using.as_ref().map(|e| (Clause::Using, e)),
            Phase::Write => self
                .with_check
                .as_ref()
                .map(|e| (Clause::WithCheck, e))
                .or_else(|| self.using.as_ref().map(|e| (Clause::Using, e))),
        }
    }

    /// Present expressions with their clause.
    pub fn expressions(&self) -> impl Iterator<Item = (Clause, &Expr)> {
        [
            self.using.as_ref().map(|e| (Clause::Using, e)),
            self.with_check.as_ref().map(|e| (Clause::WithCheck, e)),
        ]
        .into_iter()
        .flatten()
    }

    /// Commands rendered as a comma-separated list.
    pub fn command_list(&self) -> String {
        self.commands
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Kind of non-fatal load diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Column reference that resolves to no declared column.
    DanglingColumn,
    /// Unqualified subquery column that binds to the inner table while an
    /// outer table declares the same name.
    ShadowedColumn,
}

/// Non-fatal problem found while binding a policy expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// Kind.
    pub kind: DiagnosticKind,
    /// Table the policy is attached to.
    pub table: String,
    /// Policy name.
    pub policy: String,
    /// Clause containing the reference.
    pub clause: Clause,
    /// Column reference as written.
    pub column: String,
    /// Table the reference was bound to.
    pub bound_table: String,
    /// Human-readable explanation.
    pub explanation: String,
}

/// All policies of one analysis run plus their load diagnostics.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    policies: Vec<Policy>,
    diagnostics: Vec<Diagnostic>,
}

impl PolicySet {
    /// Build a set from already-bound policies.
    pub fn new(policies: Vec<Policy>) -> Self {
        Self {
            policies,
            diagnostics: Vec::new(),
        }
    }

    /// Every policy, in document order.
    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    /// Load diagnostics, in discovery order.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Policies attached to `table`.
    pub fn on_table<'a>(&'a self, table: &str) -> impl Iterator<Item = &'a Policy> + 'a {
        let table = table.to_string();
        self.policies.iter().filter(move |p| p.table == table)
    }

    /// Policies on `table` that cover `command` and match `role`.
    pub fn applicable(&self, table: &str, command: Command, role: Option<&str>) -> Vec<&Policy> {
        self.on_table(table)
            .filter(|p| p.applies_to_command(command) && p.applies_to_role(role))
            .collect()
    }

    /// Tables that carry at least one policy.
    pub fn tables(&self) -> BTreeSet<&str> {
        self.policies.iter().map(|p| p.table.as_str()).collect()
    }

    /// Look up a policy by table and name.
    pub fn get(&self, table: &str, name: &str) -> Option<&Policy> {
        self.on_table(table).find(|p| p.name == name)
    }
}

/// Parse, bind and validate every policy in the document.
pub fn load_policies(schema: &Schema, doc: PolicyDocument) -> Result<PolicySet, PolicyError> {
    let parser = ExprParser::new(&doc.session_functions);
    let mut set = PolicySet::default();

    for def in &doc.policies {
        let policy = build_policy(schema, &parser, def, &mut set.diagnostics)?;
        if set.get(&policy.table, &policy.name).is_some() {
            return Err(PolicyError::DuplicatePolicy {
                table: policy.table,
                policy: policy.name,
            });
        }
        debug!(
            table = %policy.table,
            policy = %policy.name,
            commands = %policy.command_list(),
            disposition = %policy.disposition,
            "policy loaded"
        );
        set.policies.push(policy);
    }

    for diag in &set.diagnostics {
        warn!(
            table = %diag.table,
            policy = %diag.policy,
            column = %diag.column,
            kind = ?diag.kind,
            "{}",
            diag.explanation
        );
    }
    Ok(set)
}

fn build_policy(
    schema: &Schema,
    parser: &ExprParser,
    def: &PolicyDefinition,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<Policy, PolicyError> {
    let table = normalize_relation_name(&def.table);
    let name = def.policy_name.trim().to_string();
    if name.is_empty() {
        return Err(PolicyError::EmptyPolicyName { table });
    }
    if schema.table(&table).is_none() {
        return Err(PolicyError::UnknownTable {
            table,
            policy: name,
        });
    }

    if def.commands.is_empty() {
        return Err(PolicyError::NoCommands {
            table,
            policy: name,
        });
    }
    let mut commands = BTreeSet::new();
    for raw in &def.commands {
        let Some(parsed) = Command::parse_list_entry(raw) else {
            return Err(PolicyError::InvalidCommand {
                table,
                policy: name,
                command: raw.clone(),
            });
        };
        commands.extend(parsed);
    }

    let disposition = match &def.disposition {
        None => Disposition::default(),
        Some(raw) => raw
            .parse::<Disposition>()
            .map_err(|_| PolicyError::InvalidDisposition {
                table: table.clone(),
                policy: name.clone(),
                disposition: raw.clone(),
            })?,
    };

    let mut roles: BTreeSet<String> = def
        .roles
        .iter()
        .map(|r| normalize_identifier(r))
        .filter(|r| !r.is_empty())
        .collect();
    if roles.is_empty() {
        roles.insert(PUBLIC_ROLE.to_string());
    }

    let mut using = parse_clause(parser, &table, &name, Clause::Using, def.using_expr.as_ref())?;
    let mut with_check = parse_clause(
        parser,
        &table,
        &name,
        Clause::WithCheck,
        def.with_check_expr.as_ref(),
    )?;

    validate_clauses(&table, &name, &commands, using.is_some(), with_check.is_some())?;

    let mut binder = Binder {
        schema,
        table: &table,
        policy: &name,
        clause: Clause::Using,
        diagnostics,
    };
    if let Some(expr) = using.as_mut() {
        binder.bind_root(expr)?;
    }
    if let Some(expr) = with_check.as_mut() {
        binder.clause = Clause::WithCheck;
        binder.bind_root(expr)?;
    }

    Ok(Policy {
        name,
        table,
        commands,
        disposition,
        roles,
        using,
        with_check,
    })
}

fn parse_clause(
    parser: &ExprParser,
    table: &str,
    policy: &str,
    clause: Clause,
    source: Option<&ExprSource>,
) -> Result<Option<Expr>, PolicyError> {
    match source {
        None => Ok(None),
        Some(ExprSource::Ast(expr)) => Ok(Some(parser.normalize(expr))),
        Some(ExprSource::Text(text)) => {
            parser
                .parse(text)
                .map(Some)
                .map_err(|message| PolicyError::Parse {
                    table: table.to_string(),
                    policy: policy.to_string(),
                    clause,
                    message,
                })
        }
    }
}

fn validate_clauses(
    table: &str,
    policy: &str,
    commands: &BTreeSet<Command>,
    has_using: bool,
    has_check: bool,
) -> Result<(), PolicyError> {
    let missing = |clause: Clause, reason: &'static str| PolicyError::MissingClause {
        table: table.to_string(),
        policy: policy.to_string(),
        clause,
        reason,
    };
    let forbidden = |clause: Clause, reason: &'static str| PolicyError::ForbiddenClause {
        table: table.to_string(),
        policy: policy.to_string(),
        clause,
        reason,
    };

    if !has_using && !has_check {
        return Err(PolicyError::MissingExpression {
            table: table.to_string(),
            policy: policy.to_string(),
        });
    }

    let only = |cmd: Command| commands.len() == 1 && commands.contains(&cmd);
    if only(Command::Insert) {
        if has_using {
            return Err(forbidden(Clause::Using, "INSERT policies only check new rows"));
        }
        if !has_check {
            return Err(missing(Clause::WithCheck, "INSERT policies check new rows"));
        }
    }
    if only(Command::Select) && has_check {
        return Err(forbidden(
            Clause::WithCheck,
            "SELECT policies only filter existing rows",
        ));
    }
    if commands.contains(&Command::Select) && !has_using {
        return Err(missing(Clause::Using, "policies covering SELECT filter visible rows"));
    }
    Ok(())
}

struct Scope {
    binding: String,
    table: String,
}

struct Binder<'a> {
    schema: &'a Schema,
    table: &'a str,
    policy: &'a str,
    clause: Clause,
    diagnostics: &'a mut Vec<Diagnostic>,
}

impl Binder<'_> {
    fn bind_root(&mut self, expr: &mut Expr) -> Result<(), PolicyError> {
        let mut scopes = vec![Scope {
            binding: self.table.to_string(),
            table: self.table.to_string(),
        }];
        self.bind(expr, &mut scopes)
    }

    fn bind(&mut self, expr: &mut Expr, scopes: &mut Vec<Scope>) -> Result<(), PolicyError> {
        match expr {
            Expr::ColumnRef(col) => {
                self.resolve(col, scopes);
                Ok(())
            }
            Expr::UnaryOp { expr, .. } => self.bind(expr, scopes),
            Expr::BinaryOp { left, right, .. } => {
                self.bind(left, scopes)?;
                self.bind(right, scopes)
            }
            Expr::InList { expr, list } => {
                self.bind(expr, scopes)?;
                for item in list {
                    self.bind(item, scopes)?;
                }
                Ok(())
            }
            Expr::FunctionCall { args, .. } => {
                for arg in args {
                    self.bind(arg, scopes)?;
                }
                Ok(())
            }
            Expr::Subquery(sub) => {
                sub.table = normalize_relation_name(&sub.table);
                if self.schema.table(&sub.table).is_none() {
                    return Err(PolicyError::UnknownSubqueryTable {
                        table: self.table.to_string(),
                        policy: self.policy.to_string(),
                        clause: self.clause,
                        referenced: sub.table.clone(),
                    });
                }
                if let SubqueryMode::In { expr } = &mut sub.mode {
                    self.bind(expr, scopes)?;
                }
                if let Some(column) = &sub.column {
                    let projected = fold_identifier(column);
                    let declared = self
                        .schema
                        .table(&sub.table)
                        .is_some_and(|t| t.has_column(&projected));
                    if !declared {
                        self.report(
                            DiagnosticKind::DanglingColumn,
                            format!("{}.{projected}", sub.binding_name()),
                            &sub.table,
                            format!("table `{}` has no column `{projected}`", sub.table),
                        );
                    }
                    sub.column = Some(projected);
                }
                scopes.push(Scope {
                    binding: sub.binding_name().to_string(),
                    table: sub.table.clone(),
                });
                let result = match sub.filter.as_mut() {
                    Some(filter) => self.bind(filter, scopes),
                    None => Ok(()),
                };
                scopes.pop();
                result
            }
            Expr::Literal { .. } | Expr::SessionVar { .. } | Expr::Opaque { .. } => Ok(()),
        }
    }

    fn resolve(&mut self, col: &mut ColumnRef, scopes: &[Scope]) {
        let written = match &col.qualifier {
            Some(q) => format!("{q}.{}", col.column),
            None => col.column.clone(),
        };
        let innermost = scopes.len() - 1;

        let chosen = match &col.qualifier {
            Some(qualifier) => {
                let wanted = normalize_relation_name(qualifier);
                match scopes
                    .iter()
                    .rposition(|s| s.binding == wanted || s.table == wanted)
                {
                    Some(idx) => {
                        if !self.declares(&scopes[idx].table, &col.column) {
                            self.report(
                                DiagnosticKind::DanglingColumn,
                                written,
                                &scopes[idx].table,
                                format!(
                                    "table `{}` has no column `{}`",
                                    scopes[idx].table, col.column
                                ),
                            );
                        }
                        idx
                    }
                    None => {
                        self.report(
                            DiagnosticKind::DanglingColumn,
                            written,
                            &scopes[innermost].table,
                            format!("`{qualifier}` does not name a table in scope"),
                        );
                        innermost
                    }
                }
            }
            None => match scopes
                .iter()
                .rposition(|s| self.declares(&s.table, &col.column))
            {
                Some(idx) => {
                    if let Some(outer) = scopes[..idx]
                        .iter()
                        .rev()
                        .find(|s| self.declares(&s.table, &col.column))
                    {
                        self.report(
                            DiagnosticKind::ShadowedColumn,
                            written,
                            &scopes[idx].table,
                            format!(
                                "unqualified `{}` binds to `{}`, not to `{}` which also declares it",
                                col.column, scopes[idx].table, outer.table
                            ),
                        );
                    }
                    idx
                }
                None => {
                    self.report(
                        DiagnosticKind::DanglingColumn,
                        written,
                        &scopes[innermost].table,
                        format!(
                            "no table in scope declares column `{}`",
                            col.column
                        ),
                    );
                    innermost
                }
            },
        };

        col.table = Some(scopes[chosen].table.clone());
        col.binding = Some(scopes[chosen].binding.clone());
    }

    fn declares(&self, table: &str, column: &str) -> bool {
        self.schema.table(table).is_some_and(|t| t.has_column(column))
    }

    fn report(&mut self, kind: DiagnosticKind, column: String, bound_table: &str, explanation: String) {
        self.diagnostics.push(Diagnostic {
            kind,
            table: self.table.to_string(),
            policy: self.policy.to_string(),
            clause: self.clause,
            column,
            bound_table: bound_table.to_string(),
            explanation,
        });
    }
}
