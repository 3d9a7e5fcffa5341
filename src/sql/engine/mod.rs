//! Read execution: the backend interface and the read transaction that plans
//! interleaved reads against it.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::{
    config::ReadConfig,
    error::{Error, PlanError, Result},
    sql::{
        ast::{Expr, Params, Statement},
        key::{Key, KeySet},
        plan::{
            BatchGetQuery, Descendants, GetQuery, InterleavedRow, ListQuery, Planner, ReadInterleavedQuery,
            ReadPlan, ReadStrategy, fanout,
        },
        schema::{Database, Table},
        types::Row,
    },
};

mod kv;

pub use kv::KvBackend;

/// Execution backend trait
///
/// Every call receives the caller's cancellable scope and should return
/// promptly once it is cancelled.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Reads the rows of `table` matched by `key_set`, in key order
    async fn read(
        &self,
        scope: &CancellationToken,
        table: &str,
        key_set: &KeySet,
        columns: &[String],
    ) -> Result<Vec<Row>>;

    /// Point read by full primary key
    async fn read_row(
        &self,
        scope: &CancellationToken,
        table: &str,
        key: &Key,
        columns: &[String],
    ) -> Result<Option<Row>>;

    /// Runs a generated statement
    async fn query(&self, scope: &CancellationToken, statement: &Statement) -> Result<Vec<Row>>;
}

/// Read transaction over a schema and a backend
pub struct ReadTransaction<'a, B: Backend + ?Sized> {
    db: &'a Database,
    backend: &'a B,
    config: ReadConfig,
    scope: CancellationToken,
}

impl<'a, B: Backend + ?Sized> ReadTransaction<'a, B> {
    pub fn new(db: &'a Database, backend: &'a B) -> Self {
        Self {
            db,
            backend,
            config: ReadConfig::default(),
            scope: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: ReadConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs every read under `scope`; cancelling it aborts in-flight reads
    pub fn with_scope(mut self, scope: CancellationToken) -> Self {
        self.scope = scope;
        self
    }

    pub fn config(&self) -> &ReadConfig {
        &self.config
    }

    /// Plain key-set read of one table, without descendants
    #[instrument(skip_all, fields(table = %table))]
    pub async fn read(&self, table: &str, key_set: &KeySet) -> Result<Vec<Row>> {
        let table = self.db.must_table(table)?;
        self.backend
            .read(&self.scope, &table.name, key_set, &table.column_names())
            .await
    }

    /// Lists rows of a table with the requested descendants
    #[instrument(skip_all, fields(table = %query.table))]
    pub async fn list(&self, query: ListQuery) -> Result<Vec<InterleavedRow>> {
        let plan = ReadPlan::new(self.db, &query.table, &query.descendants)?;
        let strategy = query.strategy.unwrap_or(self.config.strategy);
        let nested = plan.has_descendants() && strategy == ReadStrategy::NestedSubquery;
        let planner = Planner::new(self.db, &self.config);
        let statement = planner.list_statement(&plan, &query, nested);
        let rows = self.backend.query(&self.scope, &statement).await?;
        debug!(rows = rows.len(), ?strategy, "listed root rows");

        if plan.has_descendants() && !nested {
            return fanout::fan_out(
                self.backend,
                &self.scope,
                &plan,
                &self.config,
                rows,
                query.show_deleted,
            )
            .await;
        }
        rows.into_iter()
            .map(|row| planner.unmarshal(&plan, plan.root(), row))
            .collect()
    }

    /// Reads one row by key. Missing rows are `PlanError::NotFound`.
    #[instrument(skip_all, fields(table = %query.table, key = %query.key))]
    pub async fn get(&self, query: GetQuery) -> Result<InterleavedRow> {
        let table = self.db.must_table(&query.table)?;
        if query.descendants.is_empty() {
            let row = self
                .backend
                .read_row(&self.scope, &table.name, &query.key, &table.column_names())
                .await?;
            return row
                .map(|row| InterleavedRow::new(&table.name, row))
                .ok_or_else(|| not_found(table, &query.key));
        }

        let mut key_params = Params::new();
        let prefix = format!("{}_0", self.config.key_param_prefix);
        let predicate = query.key.bool_expr(table, &mut key_params, &prefix);
        let list = self.key_list(table, predicate, key_params, 1, query.descendants);
        self.list(list)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| not_found(table, &query.key))
    }

    /// Reads rows by key; missing keys are left out of the result
    #[instrument(skip_all, fields(table = %query.table, keys = query.keys.len()))]
    pub async fn batch_get(&self, query: BatchGetQuery) -> Result<HashMap<Key, InterleavedRow>> {
        let table = self.db.must_table(&query.table)?;
        if query.keys.is_empty() {
            return Ok(HashMap::new());
        }

        let rows: Vec<InterleavedRow> = if query.descendants.is_empty() {
            self.backend
                .read(
                    &self.scope,
                    &table.name,
                    &KeySet::List(query.keys.clone()),
                    &table.column_names(),
                )
                .await?
                .into_iter()
                .map(|row| InterleavedRow::new(&table.name, row))
                .collect()
        } else {
            let mut key_params = Params::new();
            let predicate = query
                .keys
                .iter()
                .enumerate()
                .map(|(i, key)| {
                    let prefix = format!("{}_{}", self.config.key_param_prefix, i);
                    key.bool_expr(table, &mut key_params, &prefix)
                })
                .reduce(Expr::or)
                .map(Expr::paren)
                .unwrap_or(Expr::True);
            let limit = query.keys.len() as i64;
            let list = self.key_list(table, predicate, key_params, limit, query.descendants);
            self.list(list).await?
        };

        Ok(rows
            .into_iter()
            .map(|row| (Key::from_row(table, &row.row), row))
            .collect())
    }

    /// Fan-out read rooted at a key set of the root table
    #[instrument(skip_all, fields(table = %query.table))]
    pub async fn read_interleaved(&self, query: ReadInterleavedQuery) -> Result<Vec<InterleavedRow>> {
        let plan = ReadPlan::new(self.db, &query.table, &query.descendants)?;
        let table = plan.table(plan.root());
        let mut rows = self
            .backend
            .read(&self.scope, &table.name, &query.key_set, &table.column_names())
            .await?;
        if !query.show_deleted {
            fanout::retain_visible(table, &self.config, &mut rows);
        }
        fanout::fan_out(
            self.backend,
            &self.scope,
            &plan,
            &self.config,
            rows,
            query.show_deleted,
        )
        .await
    }

    /// Key lookups see deleted rows
    fn key_list(
        &self,
        table: &Table,
        predicate: Expr,
        key_params: Params,
        limit: i64,
        descendants: Descendants,
    ) -> ListQuery {
        let mut list = ListQuery::new(&table.name)
            .descendants(descendants)
            .limit(limit)
            .show_deleted(true);
        list.predicate = Some(predicate);
        list.key_params = key_params;
        list
    }
}

fn not_found(table: &Table, key: &Key) -> Error {
    Error::Plan(PlanError::NotFound(format!("{}{}", table.name, key)))
}
