//! In-memory evaluation of generated read statements.
//!
//! A [`Query`] is built into a chain of executor nodes (scan, order, offset,
//! limit, projection) and run against a row [`Source`]. Correlated ARRAY
//! subqueries run once per outer row with that row pushed onto the [`Scope`].

use crate::{
    error::{Error, Result},
    sql::{
        ast::{Params, Query},
        types::{Row, Value},
    },
};

use query::{Limit, Offset, Order, Projection, Scan};

mod expr;
mod query;

pub use expr::evaluate;

/// Rows of a table, as the executor reads them
pub trait Source {
    /// Every row of `table`, in key order
    fn scan(&self, table: &str) -> Result<Vec<Row>>;
}

/// Executor node trait
pub trait Executor<S: Source + ?Sized> {
    fn execute(self: Box<Self>, source: &S, scope: &Scope<'_>) -> Result<ResultSet>;
}

impl<S: Source + ?Sized + 'static> dyn Executor<S> {
    /// Builds the executor chain of a query
    pub fn build(query: &Query) -> Box<dyn Executor<S>> {
        let select = &query.select;
        let mut node: Box<dyn Executor<S>> = Scan::new(select.from.clone(), select.filter.clone());
        if !query.order.is_empty() {
            node = Order::new(node, query.order.clone());
        }
        if let Some(offset) = &query.offset {
            node = Offset::new(node, offset.clone());
        }
        if let Some(limit) = &query.limit {
            node = Limit::new(node, limit.clone());
        }
        Projection::new(node, select.list.clone())
    }
}

/// Runs a query against a source with the given params
pub fn execute<S: Source + ?Sized + 'static>(source: &S, query: &Query, params: &Params) -> Result<ResultSet> {
    <dyn Executor<S>>::build(query).execute(source, &Scope::new(params))
}

/// Execution result set: the rows of one table, possibly projected
#[derive(Debug, PartialEq)]
pub struct ResultSet {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// Name resolution context: bound params and the rows of enclosing queries,
/// innermost last.
#[derive(Debug, Clone)]
pub struct Scope<'a> {
    params: &'a Params,
    frames: Vec<(&'a str, &'a Row)>,
}

impl<'a> Scope<'a> {
    pub fn new(params: &'a Params) -> Self {
        Self {
            params,
            frames: Vec::new(),
        }
    }

    /// This scope with `row` of `table` as the innermost frame
    pub fn with<'b>(&'b self, table: &'b str, row: &'b Row) -> Scope<'b>
    where
        'a: 'b,
    {
        let mut frames = self.frames.clone();
        frames.push((table, row));
        Scope {
            params: self.params,
            frames,
        }
    }

    pub fn param(&self, name: &str) -> Result<&'a Value> {
        self.params
            .get(name)
            .ok_or_else(|| Error::Internal(format!("param @{} is not bound", name)))
    }

    /// Resolves an unqualified column, innermost frame first
    pub fn column(&self, name: &str) -> Result<&'a Value> {
        self.frames
            .iter()
            .rev()
            .find_map(|(_, row)| row.get(name))
            .ok_or_else(|| Error::Internal(format!("column {} does not exist", name)))
    }

    /// The innermost row of `table`, if `table` is in scope
    pub fn row_of(&self, table: &str) -> Option<&'a Row> {
        self.frames
            .iter()
            .rev()
            .find(|(t, _)| *t == table)
            .map(|(_, row)| *row)
    }
}
