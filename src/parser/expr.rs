use std::collections::BTreeMap;

use sqlparser::ast::{
    BinaryOperator as SqlBinaryOperator, Expr as SqlExpr, FunctionArg, FunctionArgExpr,
    FunctionArguments, Ident, Query, SelectItem, SetExpr, TableFactor,
    UnaryOperator as SqlUnaryOperator, Value as SqlValue,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;

use crate::model::ast::{BinaryOperator, ColumnRef, Expr, Subquery, SubqueryMode, UnaryOperator, Value};
use crate::parser::names::{normalize_relation_name, normalize_session_var};

/// Built-in spellings that read the session context.
const SESSION_BUILTINS: &[&str] = &["current_user", "session_user"];

/// Lowers policy expression text into the closed [`Expr`] grammar.
///
/// Text is parsed with the `PostgreSQL` dialect of `sqlparser`; constructs
/// outside the grammar become [`Expr::Opaque`] leaves rather than errors.
#[derive(Debug, Clone, Default)]
pub struct ExprParser {
    session_functions: BTreeMap<String, String>,
}

impl ExprParser {
    /// Create a parser that maps the given functions to session variables.
    pub fn new(session_functions: &BTreeMap<String, String>) -> Self {
        Self {
            session_functions: session_functions
                .iter()
                .map(|(func, var)| (normalize_relation_name(func), normalize_session_var(var)))
                .collect(),
        }
    }

    /// Parse a single expression. The whole input must be consumed.
    pub fn parse(&self, text: &str) -> Result<Expr, String> {
        let dialect = PostgreSqlDialect {};
        let mut parser = Parser::new(&dialect)
            .try_with_sql(text)
            .map_err(|e| e.to_string())?;
        let expr = parser.parse_expr().map_err(|e| e.to_string())?;
        let trailing = parser.peek_token();
        if trailing.token != Token::EOF {
            return Err(format!(
                "unexpected trailing input starting at `{}`",
                trailing.token
            ));
        }
        Ok(self.lower(&expr))
    }

    fn lower(&self, expr: &SqlExpr) -> Expr {
        match expr {
            SqlExpr::Identifier(ident) => {
                let name = ident_name(ident);
                if SESSION_BUILTINS.contains(&name.as_str()) {
                    return Expr::session_var(&name);
                }
                Expr::ColumnRef(ColumnRef::new(None, name))
            }
            SqlExpr::CompoundIdentifier(parts) => match parts.as_slice() {
                [] => opaque(expr),
                [only] => Expr::ColumnRef(ColumnRef::new(None, ident_name(only))),
                [.., qualifier, column] => Expr::ColumnRef(ColumnRef::new(
                    Some(ident_name(qualifier)),
                    ident_name(column),
                )),
            },
            SqlExpr::Nested(inner) | SqlExpr::Cast { expr: inner, .. } => self.lower(inner),
            SqlExpr::Value(v) => lower_value(&v.value).map_or_else(|| opaque(expr), Expr::literal),
            SqlExpr::UnaryOp { op, expr: inner } => match op {
                SqlUnaryOperator::Not => Expr::negate(self.lower(inner)),
                SqlUnaryOperator::Plus => self.lower(inner),
                SqlUnaryOperator::Minus => match self.lower(inner) {
                    Expr::Literal {
                        value: Value::Int(i),
                    } => Expr::literal(Value::Int(-i)),
                    Expr::Literal {
                        value: Value::Float(x),
                    } => Expr::literal(Value::Float(-x)),
                    _ => opaque(expr),
                },
                _ => opaque(expr),
            },
            SqlExpr::IsNull(inner) => Expr::unary(UnaryOperator::IsNull, self.lower(inner)),
            SqlExpr::IsNotNull(inner) => Expr::unary(UnaryOperator::IsNotNull, self.lower(inner)),
            // `x IS TRUE` never yields UNKNOWN: `x IS NOT NULL AND x`.
            SqlExpr::IsTrue(inner) => {
                let lowered = self.lower(inner);
                Expr::and(
                    Expr::unary(UnaryOperator::IsNotNull, lowered.clone()),
                    lowered,
                )
            }
            SqlExpr::IsFalse(inner) => {
                let lowered = self.lower(inner);
                Expr::and(
                    Expr::unary(UnaryOperator::IsNotNull, lowered.clone()),
                    Expr::negate(lowered),
                )
            }
            SqlExpr::BinaryOp { left, op, right } => {
                let Some(op) = lower_binary_operator(op) else {
                    return opaque(expr);
                };
                Expr::binary(op, self.lower(left), self.lower(right))
            }
            SqlExpr::Like {
                negated,
                expr: subject,
                pattern,
                ..
            } => negate_if(
                *negated,
                Expr::binary(BinaryOperator::Like, self.lower(subject), self.lower(pattern)),
            ),
            SqlExpr::ILike {
                negated,
                expr: subject,
                pattern,
                ..
            } => negate_if(
                *negated,
                Expr::binary(
                    BinaryOperator::Like,
                    Expr::call("lower", vec![self.lower(subject)]),
                    Expr::call("lower", vec![self.lower(pattern)]),
                ),
            ),
            SqlExpr::InList {
                expr: subject,
                list,
                negated,
            } => negate_if(
                *negated,
                Expr::InList {
                    expr: Box::new(self.lower(subject)),
                    list: list.iter().map(|item| self.lower(item)).collect(),
                },
            ),
            SqlExpr::InSubquery {
                expr: subject,
                subquery,
                negated,
            } => {
                let mode = SubqueryMode::In {
                    expr: Box::new(self.lower(subject)),
                };
                negate_if(*negated, self.lower_subquery(subquery, mode, expr))
            }
            SqlExpr::Exists { subquery, negated } => negate_if(
                *negated,
                self.lower_subquery(subquery, SubqueryMode::Exists, expr),
            ),
            SqlExpr::Subquery(query) => self
                .lower_scalar_select(query)
                .unwrap_or_else(|| opaque(expr)),
            SqlExpr::Function(func) => {
                let name = normalize_relation_name(&func.name.to_string());
                let args = match &func.args {
                    FunctionArguments::None => Vec::new(),
                    FunctionArguments::List(list) => {
                        let lowered: Option<Vec<Expr>> = list
                            .args
                            .iter()
                            .map(|arg| function_arg_expr(arg).map(|e| self.lower(e)))
                            .collect();
                        match lowered {
                            Some(args) => args,
                            None => return opaque(expr),
                        }
                    }
                    FunctionArguments::Subquery(_) => return opaque(expr),
                };
                self.lower_function(&name, args)
                    .unwrap_or_else(|| opaque(expr))
            }
            SqlExpr::Trim {
                expr: inner,
                trim_where: None,
                trim_what: None,
                trim_characters: None,
            } => Expr::call("trim", vec![self.lower(inner)]),
            _ => opaque(expr),
        }
    }

    /// Apply the name folding of [`ExprParser::parse`] to a pre-parsed tree:
    /// function, session variable and subquery table names are normalized,
    /// and session functions become session variables.
    pub fn normalize(&self, expr: &Expr) -> Expr {
        match expr {
            Expr::SessionVar { name } => Expr::session_var(&normalize_session_var(name)),
            Expr::UnaryOp { op, expr: inner } => Expr::unary(*op, self.normalize(inner)),
            Expr::BinaryOp { op, left, right } => {
                Expr::binary(*op, self.normalize(left), self.normalize(right))
            }
            Expr::InList { expr: subject, list } => Expr::InList {
                expr: Box::new(self.normalize(subject)),
                list: list.iter().map(|item| self.normalize(item)).collect(),
            },
            Expr::FunctionCall { name, args } => {
                let name = normalize_relation_name(name);
                let args: Vec<Expr> = args.iter().map(|arg| self.normalize(arg)).collect();
                self.lower_function(&name, args.clone())
                    .unwrap_or_else(|| Expr::call(&name, args))
            }
            Expr::Subquery(sub) => Expr::Subquery(Subquery {
                mode: match &sub.mode {
                    SubqueryMode::Exists => SubqueryMode::Exists,
                    SubqueryMode::In { expr: subject } => SubqueryMode::In {
                        expr: Box::new(self.normalize(subject)),
                    },
                },
                table: normalize_relation_name(&sub.table),
                alias: sub.alias.clone(),
                column: sub.column.clone(),
                filter: sub.filter.as_ref().map(|f| Box::new(self.normalize(f))),
            }),
            Expr::ColumnRef(_) | Expr::Literal { .. } | Expr::Opaque { .. } => expr.clone(),
        }
    }

    fn lower_function(&self, name: &str, args: Vec<Expr>) -> Option<Expr> {
        if let Some(var) = self.session_functions.get(name) {
            return Some(Expr::session_var(var));
        }
        if SESSION_BUILTINS.contains(&name) && args.is_empty() {
            return Some(Expr::session_var(name));
        }
        match name {
            "sessionvar" => match args.as_slice() {
                [Expr::ColumnRef(col)] => {
                    let var = match &col.qualifier {
                        Some(q) => format!("{q}.{}", col.column),
                        None => col.column.clone(),
                    };
                    Some(Expr::session_var(&normalize_session_var(&var)))
                }
                [Expr::Literal {
                    value: Value::Text(var),
                }] => Some(Expr::session_var(&normalize_session_var(var))),
                _ => None,
            },
            // current_setting('name' [, missing_ok])
            "current_setting" => match args.first() {
                Some(Expr::Literal {
                    value: Value::Text(var),
                }) if args.len() <= 2 => Some(Expr::session_var(&normalize_session_var(var))),
                _ => None,
            },
            _ => Some(Expr::call(name, args)),
        }
    }

    /// `(SELECT expr)` without a `FROM` clause, e.g. `(SELECT auth.uid())`.
    fn lower_scalar_select(&self, query: &Query) -> Option<Expr> {
        let SetExpr::Select(select) = query.body.as_ref() else {
            return None;
        };
        if !select.from.is_empty() || select.selection.is_some() {
            return None;
        }
        match select.projection.as_slice() {
            [SelectItem::UnnamedExpr(inner)] | [SelectItem::ExprWithAlias { expr: inner, .. }] => {
                Some(self.lower(inner))
            }
            _ => None,
        }
    }

    fn lower_subquery(&self, query: &Query, mode: SubqueryMode, original: &SqlExpr) -> Expr {
        let SetExpr::Select(select) = query.body.as_ref() else {
            return opaque(original);
        };
        let [from] = select.from.as_slice() else {
            return opaque(original);
        };
        if !from.joins.is_empty() {
            return opaque(original);
        }
        let TableFactor::Table { name, alias, .. } = &from.relation else {
            return opaque(original);
        };

        let column = match &mode {
            SubqueryMode::Exists => None,
            SubqueryMode::In { .. } => {
                let projected = match select.projection.as_slice() {
                    [SelectItem::UnnamedExpr(e)] | [SelectItem::ExprWithAlias { expr: e, .. }] => {
                        self.lower(e)
                    }
                    _ => return opaque(original),
                };
                match projected {
                    Expr::ColumnRef(col) => Some(col.column),
                    _ => return opaque(original),
                }
            }
        };

        Expr::Subquery(Subquery {
            mode,
            table: normalize_relation_name(&name.to_string()),
            alias: alias.as_ref().map(|a| ident_name(&a.name)),
            column,
            filter: select
                .selection
                .as_ref()
                .map(|selection| Box::new(self.lower(selection))),
        })
    }
}

/// Parse policy expression text with no extra session functions.
pub fn parse_expression(text: &str) -> Result<Expr, String> {
    ExprParser::default().parse(text)
}

/// Extract the expression payload from a SQL function argument.
pub fn function_arg_expr(arg: &FunctionArg) -> Option<&SqlExpr> {
    match arg {
        FunctionArg::Unnamed(FunctionArgExpr::Expr(expr))
        | FunctionArg::Named {
            arg: FunctionArgExpr::Expr(expr),
            ..
        }
        | FunctionArg::ExprNamed {
            arg: FunctionArgExpr::Expr(expr),
            ..
        } => Some(expr),
        _ => None,
    }
}

/// Unquoted identifiers fold to lowercase; quoted ones keep their spelling.
fn ident_name(ident: &Ident) -> String {
    if ident.quote_style.is_some() {
        ident.value.clone()
    } else {
        ident.value.to_ascii_lowercase()
    }
}

fn lower_value(value: &SqlValue) -> Option<Value> {
    match value {
        SqlValue::Null => Some(Value::Null),
        SqlValue::Boolean(b) => Some(Value::Bool(*b)),
        SqlValue::Number(n, _) => n
            .parse::<i64>()
            .map(Value::Int)
            .ok()
            .or_else(|| n.parse::<f64>().ok().map(Value::Float)),
        SqlValue::SingleQuotedString(s) | SqlValue::EscapedStringLiteral(s) => {
            Some(Value::Text(s.clone()))
        }
        _ => None,
    }
}

fn lower_binary_operator(op: &SqlBinaryOperator) -> Option<BinaryOperator> {
    match op {
        SqlBinaryOperator::Eq => Some(BinaryOperator::Eq),
        SqlBinaryOperator::NotEq => Some(BinaryOperator::NotEq),
        SqlBinaryOperator::Lt => Some(BinaryOperator::Lt),
        SqlBinaryOperator::LtEq => Some(BinaryOperator::LtEq),
        SqlBinaryOperator::Gt => Some(BinaryOperator::Gt),
        SqlBinaryOperator::GtEq => Some(BinaryOperator::GtEq),
        SqlBinaryOperator::And => Some(BinaryOperator::And),
        SqlBinaryOperator::Or => Some(BinaryOperator::Or),
        _ => None,
    }
}

fn negate_if(negated: bool, expr: Expr) -> Expr {
    if negated {
        Expr::negate(expr)
    } else {
        expr
    }
}

fn opaque(expr: &SqlExpr) -> Expr {
    Expr::Opaque {
        sql: expr.to_string(),
    }
}
