use std::cmp::Ordering;

use crate::{
    error::{Error, Result},
    sql::{
        ast::{self, Expr, SelectItem},
        types::{Row, Value},
    },
};

use super::{Executor, ResultSet, Scope, Source, evaluate};

/// Table scan executor (FROM ... WHERE)
pub struct Scan {
    table: String,
    filter: Option<Expr>,
}

impl Scan {
    pub fn new(table: String, filter: Option<Expr>) -> Box<Self> {
        Box::new(Self { table, filter })
    }
}

impl<S: Source + ?Sized> Executor<S> for Scan {
    fn execute(self: Box<Self>, source: &S, scope: &Scope<'_>) -> Result<ResultSet> {
        let mut rows = Vec::new();
        for row in source.scan(&self.table)? {
            let keep = match &self.filter {
                // rows are kept only when the predicate is TRUE, not NULL
                Some(filter) => evaluate(filter, &scope.with(&self.table, &row))? == Value::Bool(true),
                None => true,
            };
            if keep {
                rows.push(row);
            }
        }
        let columns = rows
            .first()
            .map(|row| row.columns().map(String::from).collect())
            .unwrap_or_default();
        Ok(ResultSet {
            table: self.table,
            columns,
            rows,
        })
    }
}

/// ORDER BY executor - sorts rows by the order expressions
pub struct Order<S: Source + ?Sized> {
    source: Box<dyn Executor<S>>,
    order_by: Vec<ast::Order>,
}

impl<S: Source + ?Sized> Order<S> {
    pub fn new(source: Box<dyn Executor<S>>, order_by: Vec<ast::Order>) -> Box<Self> {
        Box::new(Self { source, order_by })
    }
}

impl<S: Source + ?Sized> Executor<S> for Order<S> {
    fn execute(self: Box<Self>, source: &S, scope: &Scope<'_>) -> Result<ResultSet> {
        let ResultSet {
            table,
            columns,
            rows,
        } = self.source.execute(source, scope)?;

        let mut keyed = Vec::with_capacity(rows.len());
        for row in rows {
            let keys = {
                let frame = scope.with(&table, &row);
                self.order_by
                    .iter()
                    .map(|o| evaluate(&o.expr, &frame))
                    .collect::<Result<Vec<_>>>()?
            };
            keyed.push((keys, row));
        }

        // Multi-column sort: the first unequal column decides, NULLs first
        keyed.sort_by(|(a, _), (b, _)| {
            for (i, order) in self.order_by.iter().enumerate() {
                match a[i].partial_cmp(&b[i]) {
                    Some(Ordering::Equal) | None => {}
                    Some(o) => return if order.desc { o.reverse() } else { o },
                }
            }
            Ordering::Equal
        });

        Ok(ResultSet {
            table,
            columns,
            rows: keyed.into_iter().map(|(_, row)| row).collect(),
        })
    }
}

/// Evaluates a LIMIT or OFFSET operand to a row count
fn row_count(expr: &Expr, scope: &Scope<'_>, clause: &str) -> Result<usize> {
    match evaluate(expr, scope)? {
        Value::Int64(n) if n >= 0 => Ok(usize::try_from(n).unwrap_or(usize::MAX)),
        other => Err(Error::Internal(format!("invalid {} {}", clause, other))),
    }
}

/// LIMIT executor - restricts the number of rows returned
pub struct Limit<S: Source + ?Sized> {
    source: Box<dyn Executor<S>>,
    limit: Expr,
}

impl<S: Source + ?Sized> Limit<S> {
    pub fn new(source: Box<dyn Executor<S>>, limit: Expr) -> Box<Self> {
        Box::new(Self { source, limit })
    }
}

impl<S: Source + ?Sized> Executor<S> for Limit<S> {
    fn execute(self: Box<Self>, source: &S, scope: &Scope<'_>) -> Result<ResultSet> {
        let limit = row_count(&self.limit, scope, "LIMIT")?;
        let mut result = self.source.execute(source, scope)?;
        result.rows.truncate(limit);
        Ok(result)
    }
}

/// OFFSET executor - skips the first N rows
pub struct Offset<S: Source + ?Sized> {
    source: Box<dyn Executor<S>>,
    offset: Expr,
}

impl<S: Source + ?Sized> Offset<S> {
    pub fn new(source: Box<dyn Executor<S>>, offset: Expr) -> Box<Self> {
        Box::new(Self { source, offset })
    }
}

impl<S: Source + ?Sized> Executor<S> for Offset<S> {
    fn execute(self: Box<Self>, source: &S, scope: &Scope<'_>) -> Result<ResultSet> {
        let offset = row_count(&self.offset, scope, "OFFSET")?;
        let mut result = self.source.execute(source, scope)?;
        result.rows.drain(..offset.min(result.rows.len()));
        Ok(result)
    }
}

/// Select list executor; ARRAY items run their subquery once per row
pub struct Projection<S: Source + ?Sized> {
    source: Box<dyn Executor<S>>,
    list: Vec<SelectItem>,
}

impl<S: Source + ?Sized> Projection<S> {
    pub fn new(source: Box<dyn Executor<S>>, list: Vec<SelectItem>) -> Box<Self> {
        Box::new(Self { source, list })
    }
}

impl<S: Source + ?Sized + 'static> Executor<S> for Projection<S> {
    fn execute(self: Box<Self>, source: &S, scope: &Scope<'_>) -> Result<ResultSet> {
        let result = self.source.execute(source, scope)?;
        let mut rows = Vec::with_capacity(result.rows.len());
        for row in &result.rows {
            let mut out = Row::new();
            for item in &self.list {
                match item {
                    SelectItem::Column(name) => {
                        out.set(name.clone(), row.get(name).cloned().unwrap_or(Value::Null));
                    }
                    SelectItem::Array { query, alias } => {
                        let frame = scope.with(&result.table, row);
                        let inner = <dyn Executor<S>>::build(query).execute(source, &frame)?;
                        let items = inner.rows.into_iter().map(Value::Struct).collect();
                        out.set(alias.clone(), Value::Array(items));
                    }
                }
            }
            rows.push(out);
        }
        let columns = self
            .list
            .iter()
            .map(|item| match item {
                SelectItem::Column(name) => name.clone(),
                SelectItem::Array { alias, .. } => alias.clone(),
            })
            .collect();
        Ok(ResultSet {
            table: result.table,
            columns,
            rows,
        })
    }
}
