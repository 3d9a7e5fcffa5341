use std::cmp::Ordering;

use crate::{
    error::{Error, Result},
    sql::{
        ast::{ComparisonOp, Expr, LogicalOp},
        types::Value,
    },
};

use super::Scope;

/// Evaluates an expression against a scope, with SQL three-valued logic:
/// comparisons involving NULL are NULL, and NULL is neither true nor false.
pub fn evaluate(expr: &Expr, scope: &Scope<'_>) -> Result<Value> {
    Ok(match expr {
        Expr::True => Value::Bool(true),
        Expr::Ident(name) => scope.column(name)?.clone(),
        Expr::Path(parts) => path(parts, scope)?,
        Expr::Param(name) => scope.param(name)?.clone(),
        Expr::Paren(expr) => evaluate(expr, scope)?,
        Expr::Comparison { op, lhs, rhs } => {
            let lhs = evaluate(lhs, scope)?;
            let rhs = evaluate(rhs, scope)?;
            if lhs.is_null() || rhs.is_null() {
                return Ok(Value::Null);
            }
            Value::Bool(compare(*op, &lhs, &rhs)?)
        }
        Expr::Logical { op, lhs, rhs } => {
            let lhs = truth(evaluate(lhs, scope)?)?;
            // short circuit
            match (op, lhs) {
                (LogicalOp::And, Some(false)) => return Ok(Value::Bool(false)),
                (LogicalOp::Or, Some(true)) => return Ok(Value::Bool(true)),
                _ => {}
            }
            let rhs = truth(evaluate(rhs, scope)?)?;
            let result = match op {
                LogicalOp::And => match (lhs, rhs) {
                    (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                },
                LogicalOp::Or => match (lhs, rhs) {
                    (_, Some(true)) => Some(true),
                    (Some(false), Some(false)) => Some(false),
                    _ => None,
                },
            };
            result.map_or(Value::Null, Value::Bool)
        }
        Expr::Not(expr) => truth(evaluate(expr, scope)?)?.map_or(Value::Null, |b| Value::Bool(!b)),
        Expr::IsNull { expr, negated } => Value::Bool(evaluate(expr, scope)?.is_null() != *negated),
        Expr::InUnnest { lhs, array } => {
            let lhs = evaluate(lhs, scope)?;
            let items = match evaluate(array, scope)? {
                Value::Array(items) => items,
                Value::Null => return Ok(Value::Bool(false)),
                other => return Err(Error::Internal(format!("cannot unnest {}", other))),
            };
            if lhs.is_null() {
                return Ok(Value::Null);
            }
            if items.contains(&lhs) {
                Value::Bool(true)
            } else if items.iter().any(Value::is_null) {
                Value::Null
            } else {
                Value::Bool(false)
            }
        }
        Expr::Func { name, .. } => {
            return Err(Error::Internal(format!("unsupported function {}", name)));
        }
        Expr::Named { key, .. } => {
            return Err(Error::Internal(format!("unexpected named argument {}", key)));
        }
    })
}

/// Resolves `table.column[.field...]` or `column.field[.field...]`
fn path(parts: &[String], scope: &Scope<'_>) -> Result<Value> {
    let Some((first, rest)) = parts.split_first() else {
        return Err(Error::Internal("empty path".to_string()));
    };
    let (mut value, fields) = match (scope.row_of(first), rest.split_first()) {
        (Some(row), Some((column, fields))) => {
            let value = row
                .get(column)
                .ok_or_else(|| Error::Internal(format!("column {}.{} does not exist", first, column)))?;
            (value.clone(), fields)
        }
        _ => (scope.column(first)?.clone(), rest),
    };
    for field in fields {
        value = match value {
            Value::Null => Value::Null,
            Value::Struct(row) => row.get(field).cloned().unwrap_or(Value::Null),
            other => return Err(Error::Internal(format!("cannot access field {} of {}", field, other))),
        };
    }
    Ok(value)
}

fn truth(value: Value) -> Result<Option<bool>> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(b)),
        other => Err(Error::Internal(format!("expected boolean, got {}", other))),
    }
}

fn compare(op: ComparisonOp, lhs: &Value, rhs: &Value) -> Result<bool> {
    let ordering = || {
        lhs.partial_cmp(rhs)
            .ok_or_else(|| Error::Internal(format!("cannot compare {} and {}", lhs, rhs)))
    };
    Ok(match op {
        ComparisonOp::Eq => ordering()? == Ordering::Equal,
        ComparisonOp::Ne => ordering()? != Ordering::Equal,
        ComparisonOp::Lt => ordering()? == Ordering::Less,
        ComparisonOp::Le => ordering()? != Ordering::Greater,
        ComparisonOp::Gt => ordering()? == Ordering::Greater,
        ComparisonOp::Ge => ordering()? != Ordering::Less,
        ComparisonOp::Like => match (lhs, rhs) {
            (Value::String(s), Value::String(pattern)) => like(s, pattern),
            (Value::Bytes(b), Value::Bytes(pattern)) => {
                like(&String::from_utf8_lossy(b), &String::from_utf8_lossy(pattern))
            }
            _ => return Err(Error::Internal(format!("cannot match {} LIKE {}", lhs, rhs))),
        },
    })
}

/// LIKE matching: `%` matches any run of characters, `_` exactly one, and
/// `\` escapes the next pattern character.
fn like(value: &str, pattern: &str) -> bool {
    let value: Vec<char> = value.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    like_at(&value, &pattern)
}

fn like_at(value: &[char], pattern: &[char]) -> bool {
    match pattern.split_first() {
        None => value.is_empty(),
        Some(('%', rest)) => (0..=value.len()).any(|i| like_at(&value[i..], rest)),
        Some(('_', rest)) => !value.is_empty() && like_at(&value[1..], rest),
        Some(('\\', [escaped, rest @ ..])) => {
            value.first() == Some(escaped) && like_at(&value[1..], rest)
        }
        Some((c, rest)) => value.first() == Some(c) && like_at(&value[1..], rest),
    }
}
