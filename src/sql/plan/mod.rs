//! Interleaved read planning.
//!
//! A [`ReadPlan`] is the tree of tables a read touches: the root table plus
//! every requested descendant and the ancestors connecting it to the root.
//! The [`Planner`] turns it into a single nested statement, and [`fanout`]
//! reads it one depth at a time and stitches the results.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    config::ReadConfig,
    error::{Error, Result},
    sql::{
        ast::{Expr, Order, Params},
        filter::TranspiledFilter,
        key::{Key, KeySet},
        schema::{Database, Table, TableId},
        types::{Row, Value},
    },
};

pub(crate) mod fanout;
mod planner;

pub use planner::Planner;

/// How descendant rows are read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReadStrategy {
    /// One statement with a correlated ARRAY subquery per level
    #[default]
    NestedSubquery,
    /// One key-set read per table, concurrent per depth
    FanOut,
}

/// Interleaved descendant tables requested by a read, by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descendants(BTreeSet<String>);

impl Descendants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, table: impl Into<String>) -> Self {
        self.0.insert(table.into());
        self
    }

    /// Every descendant of `root`
    pub fn all(db: &Database, root: &str) -> Self {
        Self(db.descendants(root).into_iter().map(|t| t.name.clone()).collect())
    }

    pub fn contains(&self, table: &str) -> bool {
        self.0.contains(table)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// A table in the plan tree, with the children the read descends into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Level {
    pub table: TableId,
    pub depth: usize,
    pub children: Vec<Level>,
}

#[derive(Debug, Clone)]
pub struct ReadPlan<'a> {
    db: &'a Database,
    root: Level,
}

impl<'a> ReadPlan<'a> {
    pub fn new(db: &'a Database, root: &str, descendants: &Descendants) -> Result<Self> {
        let root_id = db
            .table_id(root)
            .ok_or_else(|| Error::Internal(format!("table {} does not exist", root)))?;
        let reachable = db.descendants(root);
        if let Some(name) = descendants
            .iter()
            .find(|name| !reachable.iter().any(|t| t.name == *name))
        {
            return Err(Error::Internal(format!(
                "table {} is not interleaved in {}",
                name, root
            )));
        }
        let (root, _) = Self::build_level(db, root_id, 0, descendants);
        Ok(Self { db, root })
    }

    /// Builds a level and reports whether anything below it was requested
    fn build_level(db: &Database, id: TableId, depth: usize, requested: &Descendants) -> (Level, bool) {
        let mut children = Vec::new();
        for child_id in db.children_ids(id) {
            let (child, below) = Self::build_level(db, child_id, depth + 1, requested);
            if below || requested.contains(&db.table_at(child_id).name) {
                children.push(child);
            }
        }
        let wanted = !children.is_empty();
        (
            Level {
                table: id,
                depth,
                children,
            },
            wanted,
        )
    }

    pub fn db(&self) -> &'a Database {
        self.db
    }

    pub fn root(&self) -> &Level {
        &self.root
    }

    pub fn table(&self, level: &Level) -> &'a Table {
        self.db.table_at(level.table)
    }

    pub fn has_descendants(&self) -> bool {
        !self.root.children.is_empty()
    }

    /// Visits every level in pre-order together with its parent
    pub fn walk<'p>(&'p self, mut visit: impl FnMut(&'p Level, Option<&'p Level>)) {
        let mut stack: Vec<(&Level, Option<&Level>)> = vec![(&self.root, None)];
        while let Some((level, parent)) = stack.pop() {
            visit(level, parent);
            stack.extend(level.children.iter().rev().map(|c| (c, Some(level))));
        }
    }

    /// Non-root levels grouped by depth, shallowest first, each paired with its parent
    pub fn waves(&self) -> Vec<Vec<(&Level, &Level)>> {
        let mut waves: Vec<Vec<(&Level, &Level)>> = Vec::new();
        self.walk(|level, parent| {
            if let Some(parent) = parent {
                if waves.len() < level.depth {
                    waves.resize_with(level.depth, Vec::new);
                }
                waves[level.depth - 1].push((level, parent));
            }
        });
        waves
    }

    /// Serializable description of the plan
    pub fn describe(&self, config: &ReadConfig) -> PlanDescription {
        let planner = Planner::new(self.db, config);
        let mut levels = Vec::new();
        self.walk(|level, parent| {
            let table = self.table(level);
            let parent = parent.map(|p| self.table(p));
            levels.push(LevelDescription {
                table: table.name.clone(),
                parent: parent.map(|p| p.name.clone()),
                depth: level.depth,
                correlation: parent.map(|p| planner.correlation(p, table).to_string()),
                order: Key::order(table).iter().map(|o| o.to_string()).collect(),
                soft_delete_column: table
                    .soft_delete_column(&config.soft_delete_column)
                    .map(|c| c.name.clone()),
            });
        });
        PlanDescription {
            root: self.table(&self.root).name.clone(),
            levels,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDescription {
    pub root: String,
    pub levels: Vec<LevelDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelDescription {
    pub table: String,
    pub parent: Option<String>,
    pub depth: usize,
    /// Predicate tying a row of this table to its parent row
    pub correlation: Option<String>,
    pub order: Vec<String>,
    pub soft_delete_column: Option<String>,
}

/// A row together with its interleaved child rows, by child table name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterleavedRow {
    pub table: String,
    pub row: Row,
    pub interleaved: IndexMap<String, Vec<InterleavedRow>>,
}

impl InterleavedRow {
    pub fn new(table: impl Into<String>, row: Row) -> Self {
        Self {
            table: table.into(),
            row,
            interleaved: IndexMap::new(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.row.get(column)
    }

    /// Child rows from `table`; empty if none were read
    pub fn children(&self, table: &str) -> &[InterleavedRow] {
        self.interleaved.get(table).map(Vec::as_slice).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    pub table: String,
    pub predicate: Option<Expr>,
    pub params: Params,
    /// Defaults to the table's primary key order
    pub order: Vec<Order>,
    pub limit: Option<i64>,
    pub offset: i64,
    pub show_deleted: bool,
    pub descendants: Descendants,
    /// Overrides the configured strategy
    pub strategy: Option<ReadStrategy>,
    /// Params bound by key lookups, exempt from the collision check
    pub(crate) key_params: Params,
}

impl ListQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn filter(mut self, filter: TranspiledFilter) -> Self {
        self.predicate = Some(filter.predicate);
        self.params.extend(filter.params.unwrap_or_default());
        self
    }

    pub fn predicate(mut self, predicate: Expr, params: Params) -> Self {
        self.predicate = Some(predicate);
        self.params.extend(params);
        self
    }

    pub fn order_by(mut self, order: Vec<Order>) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub fn show_deleted(mut self, show_deleted: bool) -> Self {
        self.show_deleted = show_deleted;
        self
    }

    pub fn descendants(mut self, descendants: Descendants) -> Self {
        self.descendants = descendants;
        self
    }

    pub fn with_descendant(mut self, table: impl Into<String>) -> Self {
        self.descendants = self.descendants.with(table);
        self
    }

    pub fn strategy(mut self, strategy: ReadStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetQuery {
    pub table: String,
    pub key: Key,
    pub descendants: Descendants,
}

impl GetQuery {
    pub fn new(table: impl Into<String>, key: Key) -> Self {
        Self {
            table: table.into(),
            key,
            descendants: Descendants::new(),
        }
    }

    pub fn with_descendant(mut self, table: impl Into<String>) -> Self {
        self.descendants = self.descendants.with(table);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchGetQuery {
    pub table: String,
    pub keys: Vec<Key>,
    pub descendants: Descendants,
}

impl BatchGetQuery {
    pub fn new(table: impl Into<String>, keys: Vec<Key>) -> Self {
        Self {
            table: table.into(),
            keys,
            descendants: Descendants::new(),
        }
    }

    pub fn with_descendant(mut self, table: impl Into<String>) -> Self {
        self.descendants = self.descendants.with(table);
        self
    }
}

/// Fan-out read rooted at a key set of the root table
#[derive(Debug, Clone, PartialEq)]
pub struct ReadInterleavedQuery {
    pub table: String,
    pub key_set: KeySet,
    pub descendants: Descendants,
    pub show_deleted: bool,
}

impl ReadInterleavedQuery {
    pub fn new(table: impl Into<String>, key_set: KeySet) -> Self {
        Self {
            table: table.into(),
            key_set,
            descendants: Descendants::new(),
            show_deleted: false,
        }
    }

    pub fn with_descendant(mut self, table: impl Into<String>) -> Self {
        self.descendants = self.descendants.with(table);
        self
    }

    pub fn show_deleted(mut self, show_deleted: bool) -> Self {
        self.show_deleted = show_deleted;
        self
    }
}
