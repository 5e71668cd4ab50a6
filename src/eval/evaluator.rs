use std::cmp::Ordering;
use std::sync::LazyLock;

use tracing::trace;

use crate::eval::combinator::{PolicyOutcome, Resolution};
use crate::eval::context::{Dataset, Row, SessionContext};
use crate::eval::error::EvalError;
use crate::eval::trilean::Trilean;
use crate::model::{BinaryOperator, Command, Expr, Phase, PolicySet, Subquery, SubqueryMode, UnaryOperator, Value};

/// Default nesting budget for correlated subqueries.
pub const DEFAULT_MAX_DEPTH: usize = 16;

static EMPTY_POLICIES: LazyLock<PolicySet> = LazyLock::new(PolicySet::default);
static EMPTY_DATASET: LazyLock<Dataset> = LazyLock::new(Dataset::default);

#[derive(Clone, Copy)]
struct Frame<'r> {
    binding: &'r str,
    row: &'r Row,
}

/// Rows in scope plus the tables whose policies are being evaluated.
#[derive(Clone)]
struct Env<'r> {
    frames: Vec<Frame<'r>>,
    stack: Vec<&'r str>,
}

/// Evaluates policy expressions under SQL three-valued logic.
///
/// Holds only borrowed, immutable inputs; the recursion stack used for
/// cycle and depth checks lives in each call.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator<'a> {
    policies: &'a PolicySet,
    data: &'a Dataset,
    ctx: &'a SessionContext,
    max_depth: usize,
}

impl<'a> Evaluator<'a> {
    /// Evaluator over a policy set, related rows and a session.
    pub fn new(policies: &'a PolicySet, data: &'a Dataset, ctx: &'a SessionContext) -> Self {
        Self {
            policies,
            data,
            ctx,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Evaluator with no policies and no related rows; subqueries see no rows.
    pub fn standalone(ctx: &'a SessionContext) -> Self {
        Self::new(&EMPTY_POLICIES, &EMPTY_DATASET, ctx)
    }

    /// Copy with a different subquery nesting budget.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    /// Session the evaluator runs under.
    pub fn context(&self) -> &'a SessionContext {
        self.ctx
    }

    /// Truth value of `expr` for `row` of `table`.
    pub fn evaluate(&self, expr: &Expr, table: &str, row: &Row) -> Result<Trilean, EvalError> {
        let env = Env {
            frames: vec![Frame {
                binding: table,
                row,
            }],
            stack: vec![table],
        };
        self.truth(expr, &env)
    }

    /// Combine the policies governing `phase` of `command` on `table` for `row`.
    ///
    /// Before any row is looked at, the subquery tables reachable from the
    /// applicable policies are expanded, so a policy cycle fails the call even
    /// when the data would never reach it.
    pub fn resolve(
        &self,
        table: &str,
        command: Command,
        phase: Phase,
        row: &Row,
    ) -> Result<Resolution, EvalError> {
        let stack = vec![table];
        self.expand(table, command, phase, &stack)?;
        self.resolve_in(table, command, phase, row, &stack)
    }

    /// Full check for one command: `UPDATE` needs the existing row visible
    /// and the new row valid; other commands have a single phase.
    pub fn resolve_command(
        &self,
        table: &str,
        command: Command,
        row: &Row,
    ) -> Result<Resolution, EvalError> {
        match command {
            Command::Select | Command::Delete => self.resolve(table, command, Phase::Read, row),
            Command::Insert => self.resolve(table, command, Phase::Write, row),
            Command::Update => {
                let read = self.resolve(table, command, Phase::Read, row)?;
                let write = self.resolve(table, command, Phase::Write, row)?;
                Ok(read.and(write))
            }
        }
    }

    fn expand<'r>(
        &'r self,
        table: &str,
        command: Command,
        phase: Phase,
        stack: &[&'r str],
    ) -> Result<(), EvalError> {
        for policy in self.policies.applicable(table, command, self.ctx.role()) {
            let Some((_, expr)) = policy.governing(phase) else {
                continue;
            };
            for sub in expr.subqueries() {
                let inner = self.enter(stack, &sub.table)?;
                self.expand(&sub.table, Command::Select, Phase::Read, &inner)?;
            }
        }
        Ok(())
    }

    fn enter<'r>(&self, stack: &[&'r str], table: &'r str) -> Result<Vec<&'r str>, EvalError> {
        if stack.contains(&table) {
            let mut path: Vec<String> = stack.iter().map(|t| t.to_string()).collect();
            path.push(table.to_string());
            return Err(EvalError::CycleDetectedAtRuntime { path });
        }
        if stack.len() >= self.max_depth {
            return Err(EvalError::DepthExceeded {
                max_depth: self.max_depth,
                table: table.to_string(),
            });
        }
        let mut inner = stack.to_vec();
        inner.push(table);
        Ok(inner)
    }

    fn resolve_in<'r>(
        &'r self,
        table: &'r str,
        command: Command,
        phase: Phase,
        row: &'r Row,
        stack: &[&'r str],
    ) -> Result<Resolution, EvalError> {
        let env = Env {
            frames: vec![Frame {
                binding: table,
                row,
            }],
            stack: stack.to_vec(),
        };
        let mut outcomes = Vec::new();
        for policy in self.policies.applicable(table, command, self.ctx.role()) {
            let Some((clause, expr)) = policy.governing(phase) else {
                continue;
            };
            let result = self.truth(expr, &env)?;
            trace!(table, policy = %policy.name, %clause, %result, "policy evaluated");
            outcomes.push(PolicyOutcome {
                policy: policy.name.clone(),
                disposition: policy.disposition,
                clause,
                result,
            });
        }
        Ok(Resolution::combine(outcomes))
    }

    fn truth<'r>(&'r self, expr: &'r Expr, env: &Env<'r>) -> Result<Trilean, EvalError> {
        match expr {
            Expr::UnaryOp { op, expr: inner } => match op {
                UnaryOperator::Not => Ok(!self.truth(inner, env)?),
                UnaryOperator::IsNull => Ok(self.scalar(inner, env)?.is_null().into()),
                UnaryOperator::IsNotNull => Ok((!self.scalar(inner, env)?.is_null()).into()),
            },
            Expr::BinaryOp { op, left, right } => match op {
                BinaryOperator::And => {
                    let l = self.truth(left, env)?;
                    if l == Trilean::False {
                        return Ok(Trilean::False);
                    }
                    Ok(l & self.truth(right, env)?)
                }
                BinaryOperator::Or => {
                    let l = self.truth(left, env)?;
                    if l == Trilean::True {
                        return Ok(Trilean::True);
                    }
                    Ok(l | self.truth(right, env)?)
                }
                cmp => {
                    let l = self.scalar(left, env)?;
                    let r = self.scalar(right, env)?;
                    compare(*cmp, &l, &r)
                }
            },
            Expr::InList { expr: subject, list } => {
                let needle = self.scalar(subject, env)?;
                let mut items = Vec::with_capacity(list.len());
                for item in list {
                    items.push(self.scalar(item, env)?);
                }
                membership(&needle, items.iter())
            }
            Expr::Subquery(sub) => self.subquery(sub, env),
            Expr::Opaque { .. } => Ok(Trilean::Unknown),
            Expr::ColumnRef(_)
            | Expr::Literal { .. }
            | Expr::SessionVar { .. }
            | Expr::FunctionCall { .. } => match self.scalar(expr, env)? {
                Value::Null => Ok(Trilean::Unknown),
                Value::Bool(b) => Ok(b.into()),
                Value::Text(ref s) => match parse_bool(s) {
                    Some(b) => Ok(b.into()),
                    None => Err(EvalError::NotBoolean {
                        found: "text",
                        expr: expr.to_string(),
                    }),
                },
                other => Err(EvalError::NotBoolean {
                    found: other.type_name(),
                    expr: expr.to_string(),
                }),
            },
        }
    }

    fn scalar<'r>(&'r self, expr: &'r Expr, env: &Env<'r>) -> Result<Value, EvalError> {
        match expr {
            Expr::ColumnRef(col) => {
                let frame = col
                    .binding
                    .as_deref()
                    .and_then(|b| env.frames.iter().rev().find(|f| f.binding == b))
                    .or_else(|| env.frames.last());
                Ok(frame
                    .and_then(|f| f.row.get(&col.column))
                    .cloned()
                    .unwrap_or(Value::Null))
            }
            Expr::Literal { value } => Ok(value.clone()),
            Expr::SessionVar { name } => Ok(self.ctx.lookup(name)),
            Expr::FunctionCall { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.scalar(arg, env)?);
                }
                call_function(name, values)
            }
            Expr::Opaque { .. } => Ok(Value::Null),
            _ => Ok(match self.truth(expr, env)? {
                Trilean::True => Value::Bool(true),
                Trilean::False => Value::Bool(false),
                Trilean::Unknown => Value::Null,
            }),
        }
    }

    fn subquery<'r>(&'r self, sub: &'r Subquery, env: &Env<'r>) -> Result<Trilean, EvalError> {
        let table = sub.table.as_str();
        // Only the scanned table's own policies run one level deeper; the
        // filter still belongs to the enclosing policy.
        let entered = self.enter(&env.stack, table)?;
        let mut inner = Env {
            frames: env.frames.clone(),
            stack: env.stack.clone(),
        };
        let needle = match &sub.mode {
            SubqueryMode::In { expr } => Some(self.scalar(expr, env)?),
            SubqueryMode::Exists => None,
        };
        let protected = self.policies.on_table(table).next().is_some();

        let mut projected = Vec::new();
        for row in self.data.rows(table) {
            if protected {
                let visible = self.resolve_in(table, Command::Select, Phase::Read, row, &entered)?;
                if !visible.verdict.is_true() {
                    continue;
                }
            }
            inner.frames.push(Frame {
                binding: sub.binding_name(),
                row,
            });
            let passes = match &sub.filter {
                Some(filter) => self.truth(filter, &inner),
                None => Ok(Trilean::True),
            };
            inner.frames.pop();
            if !passes?.is_true() {
                continue;
            }
            match &needle {
                None => return Ok(Trilean::True),
                Some(_) => projected.push(
                    sub.column
                        .as_ref()
                        .and_then(|c| row.get(c))
                        .cloned()
                        .unwrap_or(Value::Null),
                ),
            }
        }

        match needle {
            None => Ok(Trilean::False),
            Some(value) => membership(&value, projected.iter()),
        }
    }
}

/// Evaluate `expr` against a single row with no related tables.
///
/// Column references are read from `row` regardless of their qualifier, and
/// subqueries see no rows.
pub fn evaluate(expr: &Expr, ctx: &SessionContext, row: &Row) -> Result<Trilean, EvalError> {
    Evaluator::standalone(ctx).evaluate(expr, "", row)
}

/// SQL `needle IN (items)` with NULL-aware semantics.
fn membership<'v>(needle: &Value, items: impl Iterator<Item = &'v Value>) -> Result<Trilean, EvalError> {
    let mut result = Trilean::False;
    for item in items {
        result = result | compare(BinaryOperator::Eq, needle, item)?;
        if result == Trilean::True {
            break;
        }
    }
    Ok(result)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "on" | "1" => Some(true),
        "false" | "f" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(x) => Some(*x),
        Value::Text(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn order(op: BinaryOperator, l: &Value, r: &Value) -> Result<Option<Ordering>, EvalError> {
    let mismatch = || EvalError::TypeMismatch {
        op: format!("{op:?}"),
        left: l.type_name(),
        right: r.type_name(),
    };
    let ordering = match (l, r) {
        (Value::Null, _) | (_, Value::Null) => return Ok(None),
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Text(a), Value::Text(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Text(s)) => Some(a.cmp(&parse_bool(s).ok_or_else(mismatch)?)),
        (Value::Text(s), Value::Bool(b)) => Some(parse_bool(s).ok_or_else(mismatch)?.cmp(b)),
        (Value::Int(_) | Value::Float(_) | Value::Text(_), Value::Int(_) | Value::Float(_) | Value::Text(_)) => {
            let a = as_number(l).ok_or_else(mismatch)?;
            let b = as_number(r).ok_or_else(mismatch)?;
            a.partial_cmp(&b)
        }
        _ => return Err(mismatch()),
    };
    Ok(ordering)
}

fn compare(op: BinaryOperator, l: &Value, r: &Value) -> Result<Trilean, EvalError> {
    if l.is_null() || r.is_null() {
        return Ok(Trilean::Unknown);
    }
    if op == BinaryOperator::Like {
        return match (l, r) {
            (Value::Text(text), Value::Text(pattern)) => Ok(like(text, pattern).into()),
            _ => Err(EvalError::TypeMismatch {
                op: "LIKE".to_string(),
                left: l.type_name(),
                right: r.type_name(),
            }),
        };
    }
    let Some(ordering) = order(op, l, r)? else {
        return Ok(Trilean::Unknown);
    };
    let result = match op {
        BinaryOperator::Eq => ordering == Ordering::Equal,
        BinaryOperator::NotEq => ordering != Ordering::Equal,
        BinaryOperator::Lt => ordering == Ordering::Less,
        BinaryOperator::LtEq => ordering != Ordering::Greater,
        BinaryOperator::Gt => ordering == Ordering::Greater,
        BinaryOperator::GtEq => ordering != Ordering::Less,
        BinaryOperator::And | BinaryOperator::Or | BinaryOperator::Like => {
            return Ok(Trilean::Unknown)
        }
    };
    Ok(result.into())
}

/// Byte-exact `LIKE` with `%`, `_` and backslash escapes.
fn like(text: &str, pattern: &str) -> bool {
    #[derive(Clone, Copy, PartialEq)]
    enum Token {
        Any,
        One,
        Byte(u8),
    }
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut bytes = pattern.bytes();
    while let Some(b) = bytes.next() {
        tokens.push(match b {
            b'%' => Token::Any,
            b'_' => Token::One,
            b'\\' => Token::Byte(bytes.next().unwrap_or(b'\\')),
            other => Token::Byte(other),
        });
    }

    let text = text.as_bytes();
    // matches[j]: pattern prefix of length j matches the text prefix so far.
    let mut matches = vec![false; tokens.len() + 1];
    matches[0] = true;
    for j in 1..=tokens.len() {
        matches[j] = matches[j - 1] && tokens[j - 1] == Token::Any;
    }
    for &c in text {
        let mut next = vec![false; tokens.len() + 1];
        for j in 1..=tokens.len() {
            next[j] = match tokens[j - 1] {
                Token::Any => next[j - 1] || matches[j],
                Token::One => matches[j - 1],
                Token::Byte(p) => matches[j - 1] && p == c,
            };
        }
        matches = next;
    }
    matches[tokens.len()]
}

fn call_function(name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
    let value = match (name, args.as_slice()) {
        ("lower", [Value::Text(s)]) => Value::Text(s.to_lowercase()),
        ("upper", [Value::Text(s)]) => Value::Text(s.to_uppercase()),
        ("lower" | "upper", [other]) => other.clone(),
        ("coalesce", _) => args.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null),
        ("nullif", [a, b]) => {
            if compare(BinaryOperator::Eq, a, b)?.is_true() {
                Value::Null
            } else {
                a.clone()
            }
        }
        ("trim" | "btrim", [Value::Text(s)]) => Value::Text(s.trim_matches(' ').to_string()),
        ("trim" | "btrim", [Value::Text(s), Value::Text(chars)]) => {
            Value::Text(s.trim_matches(|c: char| chars.contains(c)).to_string())
        }
        _ => Value::Null,
    };
    Ok(value)
}
