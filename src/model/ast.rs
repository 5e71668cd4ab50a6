use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Scalar value appearing in literals, session variables and candidate rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL `NULL`.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Text value, compared byte-for-byte.
    Text(String),
}

impl Value {
    /// Returns `true` for SQL `NULL`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the value's type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
        }
    }

    /// Parse a loosely typed value as written on a command line.
    ///
    /// `null` maps to `Null`, `true`/`false` to booleans, numbers to `Int` or
    /// `Float`, single- or double-quoted strings to their unquoted text, and
    /// anything else to text as-is.
    pub fn parse_loose(raw: &str) -> Value {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("null") {
            return Value::Null;
        }
        if trimmed.eq_ignore_ascii_case("true") {
            return Value::Bool(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Value::Bool(false);
        }
        if let Ok(int) = trimmed.parse::<i64>() {
            return Value::Int(int);
        }
        if let Ok(float) = trimmed.parse::<f64>() {
            if float.is_finite() {
                return Value::Float(float);
            }
        }
        for quote in ['\'', '"'] {
            if let Some(inner) = trimmed
                .strip_prefix(quote)
                .and_then(|s| s.strip_suffix(quote))
            {
                return Value::Text(inner.to_string());
            }
        }
        Value::Text(trimmed.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(true) => write!(f, "TRUE"),
            Value::Bool(false) => write!(f, "FALSE"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

/// Unary operators supported by the policy grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOperator {
    /// `NOT expr`
    Not,
    /// `expr IS NULL`
    IsNull,
    /// `expr IS NOT NULL`
    IsNotNull,
}

/// Binary operators supported by the policy grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOperator {
    /// `=`
    Eq,
    /// `<>`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `AND`
    And,
    /// `OR`
    Or,
    /// `LIKE`
    Like,
}

impl BinaryOperator {
    /// True for `=`, `<>`, `<`, `<=`, `>`, `>=` and `LIKE`.
    pub fn is_comparison(self) -> bool {
        !matches!(self, BinaryOperator::And | BinaryOperator::Or)
    }

    fn symbol(self) -> &'static str {
        match self {
            BinaryOperator::Eq => "=",
            BinaryOperator::NotEq => "<>",
            BinaryOperator::Lt => "<",
            BinaryOperator::LtEq => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::GtEq => ">=",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
            BinaryOperator::Like => "LIKE",
        }
    }
}

/// A column reference inside a policy predicate.
///
/// `qualifier` is the prefix as written (`m.user_id` → `m`). `table` and
/// `binding` are filled in when the policy set is loaded: `table` is the
/// schema table the column resolves to, `binding` the scope name (alias or
/// table name) that supplies the row during evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    /// Qualifier as written in the expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualifier: Option<String>,
    /// Column name.
    pub column: String,
    /// Resolved schema table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Resolved scope binding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<String>,
}

impl ColumnRef {
    /// Unresolved column reference.
    pub fn new(qualifier: Option<String>, column: impl Into<String>) -> Self {
        Self {
            qualifier,
            column: column.into(),
            table: None,
            binding: None,
        }
    }
}

/// How a subquery result is reduced to a truth value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubqueryMode {
    /// `EXISTS (SELECT ...)`
    Exists,
    /// `expr IN (SELECT column ...)`
    In {
        /// Left-hand side of the membership test.
        expr: Box<Expr>,
    },
}

/// A (possibly correlated) subquery over another table.
///
/// The referenced table is held by name only; it is resolved through the
/// schema when needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subquery {
    /// Reduction mode.
    pub mode: SubqueryMode,
    /// Referenced table.
    pub table: String,
    /// Optional alias introduced in `FROM`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Projected column, required for `IN`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    /// Correlation predicate (`WHERE` clause).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Box<Expr>>,
}

impl Subquery {
    /// Scope name that inner column references bind to.
    pub fn binding_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }
}

/// Policy predicate expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    /// Column of the row being checked (or of a subquery row).
    ColumnRef(ColumnRef),
    /// Constant.
    Literal {
        /// Literal value.
        value: Value,
    },
    /// Session variable lookup, e.g. `current_setting('app.user_id')`.
    SessionVar {
        /// Variable name (lowercase).
        name: String,
    },
    /// Unary operator application.
    UnaryOp {
        /// Operator.
        op: UnaryOperator,
        /// Operand.
        expr: Box<Expr>,
    },
    /// Binary operator application.
    BinaryOp {
        /// Operator.
        op: BinaryOperator,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// `expr IN (a, b, ...)`
    InList {
        /// Tested value.
        expr: Box<Expr>,
        /// Candidate values.
        list: Vec<Expr>,
    },
    /// Function call.
    FunctionCall {
        /// Normalized function name.
        name: String,
        /// Arguments.
        args: Vec<Expr>,
    },
    /// Subquery reference to another table.
    Subquery(Subquery),
    /// Construct outside the supported grammar; evaluates to UNKNOWN.
    Opaque {
        /// Original SQL text.
        sql: String,
    },
}

/// Functions that fold letter case.
pub const CASE_NORMALIZING_FUNCTIONS: &[&str] = &["lower", "upper"];

/// Functions the evaluator understands.
pub const KNOWN_FUNCTIONS: &[&str] = &["lower", "upper", "coalesce", "nullif", "trim", "btrim"];

impl Expr {
    /// Unqualified column reference.
    pub fn column(name: &str) -> Expr {
        Expr::ColumnRef(ColumnRef::new(None, name))
    }

    /// Qualified column reference.
    pub fn qualified_column(qualifier: &str, name: &str) -> Expr {
        Expr::ColumnRef(ColumnRef::new(Some(qualifier.to_string()), name))
    }

    /// Literal constant.
    pub fn literal(value: Value) -> Expr {
        Expr::Literal { value }
    }

    /// Session variable lookup.
    pub fn session_var(name: &str) -> Expr {
        Expr::SessionVar {
            name: name.to_ascii_lowercase(),
        }
    }

    /// Binary operator node.
    pub fn binary(op: BinaryOperator, left: Expr, right: Expr) -> Expr {
        Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// `left = right`
    pub fn equals(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinaryOperator::Eq, left, right)
    }

    /// `left AND right`
    pub fn and(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinaryOperator::And, left, right)
    }

    /// `left OR right`
    pub fn or(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinaryOperator::Or, left, right)
    }

    /// Unary operator node.
    pub fn unary(op: UnaryOperator, expr: Expr) -> Expr {
        Expr::UnaryOp {
            op,
            expr: Box::new(expr),
        }
    }

    /// `NOT expr`
    pub fn negate(expr: Expr) -> Expr {
        Expr::unary(UnaryOperator::Not, expr)
    }

    /// Function call node with a normalized name.
    pub fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::FunctionCall {
            name: name.to_ascii_lowercase(),
            args,
        }
    }

    /// Pre-order traversal over this node and every descendant, including
    /// subquery filters and `IN` operands.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Expr)) {
        visit(self);
        match self {
            Expr::UnaryOp { expr, .. } => expr.walk(visit),
            Expr::BinaryOp { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Expr::InList { expr, list } => {
                expr.walk(visit);
                for item in list {
                    item.walk(visit);
                }
            }
            Expr::FunctionCall { args, .. } => {
                for arg in args {
                    arg.walk(visit);
                }
            }
            Expr::Subquery(sub) => {
                if let SubqueryMode::In { expr } = &sub.mode {
                    expr.walk(visit);
                }
                if let Some(filter) = &sub.filter {
                    filter.walk(visit);
                }
            }
            Expr::ColumnRef(_)
            | Expr::Literal { .. }
            | Expr::SessionVar { .. }
            | Expr::Opaque { .. } => {}
        }
    }

    /// Every column reference in the tree.
    pub fn column_refs(&self) -> Vec<&ColumnRef> {
        let mut refs = Vec::new();
        self.walk(&mut |node| {
            if let Expr::ColumnRef(col) = node {
                refs.push(col);
            }
        });
        refs
    }

    /// Names of all session variables referenced in the tree.
    pub fn session_vars(&self) -> BTreeSet<&str> {
        let mut vars = BTreeSet::new();
        self.walk(&mut |node| {
            if let Expr::SessionVar { name } = node {
                vars.insert(name.as_str());
            }
        });
        vars
    }

    /// Every subquery node in the tree, outermost first.
    pub fn subqueries(&self) -> Vec<&Subquery> {
        let mut subs = Vec::new();
        self.walk(&mut |node| {
            if let Expr::Subquery(sub) = node {
                subs.push(sub);
            }
        });
        subs
    }

    /// Flatten nested `AND` nodes into their operands.
    pub fn conjuncts(&self) -> Vec<&Expr> {
        self.flatten(BinaryOperator::And)
    }

    /// Flatten nested `OR` nodes into their operands.
    pub fn disjuncts(&self) -> Vec<&Expr> {
        self.flatten(BinaryOperator::Or)
    }

    fn flatten(&self, target: BinaryOperator) -> Vec<&Expr> {
        match self {
            Expr::BinaryOp { op, left, right } if *op == target => {
                let mut parts = left.flatten(target);
                parts.extend(right.flatten(target));
                parts
            }
            _ => vec![self],
        }
    }

    /// Strip case-normalizing function wrappers, returning the inner operand
    /// and whether any wrapper was present.
    pub fn peel_case_normalization(&self) -> (&Expr, bool) {
        match self {
            Expr::FunctionCall { name, args }
                if args.len() == 1 && CASE_NORMALIZING_FUNCTIONS.contains(&name.as_str()) =>
            {
                (args[0].peel_case_normalization().0, true)
            }
            _ => (self, false),
        }
    }

    fn is_boolean_connective(&self) -> bool {
        matches!(
            self,
            Expr::BinaryOp {
                op: BinaryOperator::And | BinaryOperator::Or,
                ..
            }
        )
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::ColumnRef(col) => match &col.qualifier {
                Some(q) => write!(f, "{q}.{}", col.column),
                None => write!(f, "{}", col.column),
            },
            Expr::Literal { value } => write!(f, "{value}"),
            Expr::SessionVar { name } => write!(f, "sessionvar('{name}')"),
            Expr::UnaryOp { op, expr } => match op {
                UnaryOperator::Not => {
                    if expr.is_boolean_connective() {
                        write!(f, "NOT ({expr})")
                    } else {
                        write!(f, "NOT {expr}")
                    }
                }
                UnaryOperator::IsNull => write!(f, "{expr} IS NULL"),
                UnaryOperator::IsNotNull => write!(f, "{expr} IS NOT NULL"),
            },
            Expr::BinaryOp { op, left, right } => {
                for (idx, side) in [left, right].into_iter().enumerate() {
                    if idx == 1 {
                        write!(f, " {} ", op.symbol())?;
                    }
                    let wrap = side.is_boolean_connective()
                        && !matches!(side.as_ref(), Expr::BinaryOp { op: inner, .. } if inner == op);
                    if wrap {
                        write!(f, "({side})")?;
                    } else {
                        write!(f, "{side}")?;
                    }
                }
                Ok(())
            }
            Expr::InList { expr, list } => {
                write!(f, "{expr} IN (")?;
                for (idx, item) in list.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Expr::FunctionCall { name, args } => {
                write!(f, "{name}(")?;
                for (idx, arg) in args.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Expr::Subquery(sub) => {
                let projection = sub.column.as_deref().unwrap_or("1");
                let from = match &sub.alias {
                    Some(alias) => format!("{} {alias}", sub.table),
                    None => sub.table.clone(),
                };
                let body = match &sub.filter {
                    Some(filter) => format!("SELECT {projection} FROM {from} WHERE {filter}"),
                    None => format!("SELECT {projection} FROM {from}"),
                };
                match &sub.mode {
                    SubqueryMode::Exists => write!(f, "EXISTS ({body})"),
                    SubqueryMode::In { expr } => write!(f, "{expr} IN ({body})"),
                }
            }
            Expr::Opaque { sql } => write!(f, "{sql}"),
        }
    }
}
