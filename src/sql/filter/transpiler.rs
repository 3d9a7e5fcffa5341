use chrono::{DateTime, Utc};
use tracing::trace;

use super::{
    CheckedExpr, Constant, Expr, ExprKind, FUNCTION_AND, FUNCTION_EQUALS, FUNCTION_GREATER_EQUALS,
    FUNCTION_GREATER_THAN, FUNCTION_HAS, FUNCTION_LESS_EQUALS, FUNCTION_LESS_THAN, FUNCTION_NOT,
    FUNCTION_NOT_EQUALS, FUNCTION_OR, FUNCTION_TIMESTAMP, Filter, FilterType, TranspileOptions,
};
use crate::{
    error::{Result, TranspileError},
    sql::{
        ast::{self, ComparisonOp, LogicalOp, Params},
        types::Value,
    },
};

const TOKEN_COLUMN_SUFFIX: &str = "_tokens";
const MIN_SEARCH_NGRAMS_QUERY_LENGTH: usize = 2;

type TranspileResult<T> = std::result::Result<T, TranspileError>;

/// Output of a transpilation
#[derive(Debug, Clone, PartialEq)]
pub struct TranspiledFilter {
    pub predicate: ast::Expr,
    /// `None` when no parameter was generated
    pub params: Option<Params>,
}

/// Transpiles a filter to a native predicate and its parameters.
///
/// An empty filter is `TRUE` with no parameters.
pub fn transpile(filter: &Filter, options: &TranspileOptions) -> Result<TranspiledFilter> {
    let Some(checked) = &filter.checked else {
        return Ok(TranspiledFilter {
            predicate: ast::Expr::True,
            params: None,
        });
    };
    let transpiled = Transpiler::new(checked, options).transpile()?;
    Ok(transpiled)
}

/// Single-use transpiler. Parameter names are `param_0`, `param_1`, ...
/// in the order literals are visited.
pub struct Transpiler<'a> {
    checked: &'a CheckedExpr,
    options: &'a TranspileOptions,
    params: Params,
    param_counter: usize,
}

impl<'a> Transpiler<'a> {
    pub fn new(checked: &'a CheckedExpr, options: &'a TranspileOptions) -> Self {
        Self {
            checked,
            options,
            params: Params::new(),
            param_counter: 0,
        }
    }

    pub fn transpile(mut self) -> TranspileResult<TranspiledFilter> {
        let checked = self.checked;
        let root = &checked.expr;
        let predicate = self.transpile_expr(root)?;
        if !self.is_bool(root) {
            return Err(TranspileError::NotABooleanExpression(predicate.to_string()));
        }
        trace!(%predicate, params = self.param_counter, "transpiled filter");
        let params = (self.param_counter > 0).then_some(self.params);
        Ok(TranspiledFilter { predicate, params })
    }

    fn transpile_expr(&mut self, e: &Expr) -> TranspileResult<ast::Expr> {
        match &e.kind {
            ExprKind::Call { function, args } => {
                Ok(self.transpile_call(e, function, args)?.paren())
            }
            ExprKind::Ident(name) => self.transpile_ident(e, name),
            ExprKind::Select { operand, field } => {
                match self.transpile_expr(operand)? {
                    ast::Expr::Ident(name) => Ok(ast::Expr::Path(vec![name, field.clone()])),
                    ast::Expr::Path(mut parts) => {
                        parts.push(field.clone());
                        Ok(ast::Expr::Path(parts))
                    }
                    other => Err(TranspileError::UnsupportedExpression(format!(
                        "unsupported select expr operand {}",
                        other
                    ))),
                }
            }
            ExprKind::Const(constant) => Ok(self.transpile_const(constant)),
        }
    }

    fn transpile_const(&mut self, constant: &Constant) -> ast::Expr {
        let value = match constant {
            Constant::Bool(v) => Value::Bool(*v),
            Constant::Int64(v) => Value::Int64(*v),
            // no unsigned type on the store side
            Constant::Uint64(v) => Value::Int64(*v as i64),
            Constant::Double(v) => Value::Float64(*v),
            Constant::String(v) => Value::String(v.clone()),
            Constant::Bytes(v) => Value::Bytes(v.clone()),
        };
        self.param(value)
    }

    fn transpile_ident(&mut self, e: &Expr, name: &str) -> TranspileResult<ast::Expr> {
        let checked = self.checked;
        let typ = checked.type_map.get(&e.id).ok_or_else(|| {
            TranspileError::UnsupportedExpression(format!("unknown type of ident expr {}", e.id))
        })?;
        if let FilterType::Enum(enum_type) = typ {
            if let Some(number) = enum_type.value(name) {
                let value = if self.options.enum_values_as_strings {
                    Value::String(name.to_string())
                } else {
                    Value::Int64(i64::from(number))
                };
                return Ok(self.param(value));
            }
        }
        Ok(ast::Expr::Ident(name.to_string()))
    }

    fn transpile_call(
        &mut self,
        e: &Expr,
        function: &str,
        args: &[Expr],
    ) -> TranspileResult<ast::Expr> {
        match function {
            FUNCTION_HAS => self.transpile_has(args),
            FUNCTION_EQUALS => match substring_match(args) {
                Some((column, pattern)) => self.transpile_substring_match(function, column, pattern),
                None => self.transpile_comparison(function, args, ComparisonOp::Eq),
            },
            FUNCTION_NOT_EQUALS => self.transpile_comparison(function, args, ComparisonOp::Ne),
            FUNCTION_LESS_THAN => self.transpile_comparison(function, args, ComparisonOp::Lt),
            FUNCTION_LESS_EQUALS => self.transpile_comparison(function, args, ComparisonOp::Le),
            FUNCTION_GREATER_THAN => self.transpile_comparison(function, args, ComparisonOp::Gt),
            FUNCTION_GREATER_EQUALS => self.transpile_comparison(function, args, ComparisonOp::Ge),
            FUNCTION_AND => self.transpile_logical(function, args, LogicalOp::And),
            FUNCTION_OR => self.transpile_logical(function, args, LogicalOp::Or),
            FUNCTION_NOT => {
                let [arg] = args else {
                    return Err(arg_count(function, args.len()));
                };
                let rhs = self.transpile_expr(arg)?;
                if !self.is_bool(arg) {
                    return Err(TranspileError::NotABooleanExpression(format!(
                        "unexpected argument to `{}`: {}",
                        function, rhs
                    )));
                }
                Ok(ast::Expr::Not(Box::new(rhs)))
            }
            FUNCTION_TIMESTAMP => self.transpile_timestamp(function, args),
            _ if self.options.search_ngrams.as_deref() == Some(function) => {
                self.transpile_search_ngrams(function, args)
            }
            _ => {
                trace!(id = e.id, function, "unsupported filter function");
                Err(TranspileError::UnsupportedFunction(function.to_string()))
            }
        }
    }

    fn transpile_comparison(
        &mut self,
        function: &str,
        args: &[Expr],
        op: ComparisonOp,
    ) -> TranspileResult<ast::Expr> {
        let [lhs, rhs] = args else {
            return Err(arg_count(function, args.len()));
        };
        let lhs = self.transpile_expr(lhs)?;
        let rhs = self.transpile_expr(rhs)?;
        Ok(ast::Expr::compare(op, lhs, rhs))
    }

    fn transpile_substring_match(
        &mut self,
        function: &str,
        column: &str,
        pattern: &str,
    ) -> TranspileResult<ast::Expr> {
        let inner = pattern.strip_prefix('*').unwrap_or(pattern);
        let inner = inner.strip_suffix('*').unwrap_or(inner);
        if inner.contains('*') {
            return Err(TranspileError::InvalidWildcardPosition(function.to_string()));
        }
        let pattern = self.param(Value::String(pattern.replace('*', "%")));
        Ok(ast::Expr::compare(
            ComparisonOp::Like,
            ast::Expr::ident(column),
            pattern,
        ))
    }

    fn transpile_logical(
        &mut self,
        function: &str,
        args: &[Expr],
        op: LogicalOp,
    ) -> TranspileResult<ast::Expr> {
        let [lhs_arg, rhs_arg] = args else {
            return Err(arg_count(function, args.len()));
        };
        let lhs = self.transpile_expr(lhs_arg)?;
        let rhs = self.transpile_expr(rhs_arg)?;
        for (side, arg, expr) in [("lhs", lhs_arg, &lhs), ("rhs", rhs_arg, &rhs)] {
            if !self.is_bool(arg) {
                return Err(TranspileError::NotABooleanExpression(format!(
                    "unexpected arguments to `{}`: {} {}",
                    function, side, expr
                )));
            }
        }
        Ok(ast::Expr::Logical {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn transpile_has(&mut self, args: &[Expr]) -> TranspileResult<ast::Expr> {
        let [ident, constant] = args else {
            return Err(arg_count(FUNCTION_HAS, args.len()));
        };
        let (ExprKind::Ident(name), ExprKind::Const(value)) = (&ident.kind, &constant.kind) else {
            return Err(TranspileError::UnsupportedExpression(
                "`:` is only supported between an identifier and a constant".to_string(),
            ));
        };
        let checked = self.checked;
        match checked.type_map.get(&ident.id) {
            Some(FilterType::List(elem)) if elem.is_primitive() => {
                let array = self.transpile_ident(ident, name)?;
                let lhs = self.transpile_const(value);
                Ok(ast::Expr::InUnnest {
                    lhs: Box::new(lhs),
                    array: Box::new(array),
                })
            }
            Some(_) => Err(TranspileError::UnsupportedExpression(
                "`:` is only supported on repeated primitive fields".to_string(),
            )),
            None => Err(TranspileError::UnsupportedExpression(format!(
                "unknown type of ident expr {}",
                ident.id
            ))),
        }
    }

    fn transpile_timestamp(&mut self, function: &str, args: &[Expr]) -> TranspileResult<ast::Expr> {
        let [arg] = args else {
            return Err(arg_count(function, args.len()));
        };
        let ExprKind::Const(Constant::String(text)) = &arg.kind else {
            return Err(TranspileError::InvalidTimestampLiteral {
                function: function.to_string(),
                reason: "expected constant string arg".to_string(),
            });
        };
        let timestamp = DateTime::parse_from_rfc3339(text).map_err(|err| {
            TranspileError::InvalidTimestampLiteral {
                function: function.to_string(),
                reason: err.to_string(),
            }
        })?;
        Ok(self.param(Value::Timestamp(timestamp.with_timezone(&Utc))))
    }

    fn transpile_search_ngrams(
        &mut self,
        function: &str,
        args: &[Expr],
    ) -> TranspileResult<ast::Expr> {
        let invalid = |reason: String| TranspileError::InvalidSearchArgument {
            function: function.to_string(),
            reason,
        };
        if args.len() != 2 && args.len() != 5 {
            return Err(invalid(format!(
                "unexpected number of arguments: {} (expected 2 or 5)",
                args.len()
            )));
        }
        let ExprKind::Ident(column) = &args[0].kind else {
            return Err(invalid("first argument must be an identifier".to_string()));
        };
        let ExprKind::Const(Constant::String(query)) = &args[1].kind else {
            return Err(invalid("second argument must be a string constant".to_string()));
        };
        let len = query.chars().count();
        if len < MIN_SEARCH_NGRAMS_QUERY_LENGTH {
            return Err(invalid(format!(
                "search query must be at least {} characters, got {}",
                MIN_SEARCH_NGRAMS_QUERY_LENGTH, len
            )));
        }
        let mut sql_args = vec![
            ast::Expr::Ident(format!("{}{}", column, TOKEN_COLUMN_SUFFIX)),
            self.param(Value::String(query.clone())),
        ];
        if let [_, _, language, min_ngrams, min_percent] = args {
            // unset optional arguments are left out
            let optional: [(&str, &Expr, fn(&Constant) -> bool); 3] = [
                ("language_tag", language, |c| matches!(c, Constant::String(s) if !s.is_empty())),
                ("min_ngrams", min_ngrams, |c| matches!(c, Constant::Int64(n) if *n != 0)),
                ("min_ngrams_percent", min_percent, |c| matches!(c, Constant::Double(p) if *p != 0.0)),
            ];
            for (key, arg, is_set) in optional {
                if let ExprKind::Const(constant) = &arg.kind {
                    if is_set(constant) {
                        let value = self.transpile_const(constant);
                        sql_args.push(ast::Expr::Named {
                            key: key.to_string(),
                            value: Box::new(value),
                        });
                    }
                }
            }
        }
        Ok(ast::Expr::Func {
            name: "SEARCH_NGRAMS".to_string(),
            args: sql_args,
        })
    }

    /// Whether a filter node evaluates to a bool, by its checked type or,
    /// failing that, by its shape
    fn is_bool(&self, e: &Expr) -> bool {
        if let Some(typ) = self.checked.type_map.get(&e.id) {
            return *typ == FilterType::Bool;
        }
        match &e.kind {
            ExprKind::Const(constant) => matches!(constant, Constant::Bool(_)),
            ExprKind::Call { function, .. } => function != FUNCTION_TIMESTAMP,
            ExprKind::Ident(_) | ExprKind::Select { .. } => true,
        }
    }

    fn param(&mut self, value: Value) -> ast::Expr {
        let name = format!("param_{}", self.param_counter);
        self.param_counter += 1;
        self.params.insert(name.clone(), value);
        ast::Expr::Param(name)
    }
}

/// `ident = "*text*"` with a leading or trailing wildcard
fn substring_match(args: &[Expr]) -> Option<(&str, &str)> {
    let [lhs, rhs] = args else { return None };
    match (&lhs.kind, &rhs.kind) {
        (ExprKind::Ident(column), ExprKind::Const(Constant::String(pattern)))
            if pattern.starts_with('*') || pattern.ends_with('*') =>
        {
            Some((column, pattern))
        }
        _ => None,
    }
}

fn arg_count(function: &str, count: usize) -> TranspileError {
    TranspileError::UnsupportedExpression(format!(
        "unexpected number of arguments to `{}`: {}",
        function, count
    ))
}
