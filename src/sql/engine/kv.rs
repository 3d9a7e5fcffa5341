use std::{collections::BTreeMap, sync::RwLock};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
    error::{Error, Result},
    sql::{
        ast::Statement,
        ddl::OnDelete,
        executor::{self, Source},
        key::{Key, KeySet},
        mutation::Mutation,
        schema::{Database, Table},
        types::{Row, Value},
    },
    storage::{
        engine::{Engine as StorageEngine, WriteBatch},
        keycode,
    },
};

use super::Backend;

/// Key-value store backed execution backend
///
/// Rows are stored bincode-encoded under their table name and keycode-encoded
/// primary key. An interleaved child's key starts with its parent's key, so the
/// children of a parent row are one prefix scan.
pub struct KvBackend<E: StorageEngine> {
    db: Database,
    engine: RwLock<E>,
}

impl<E: StorageEngine> KvBackend<E> {
    pub fn new(db: Database, engine: E) -> Self {
        Self {
            db,
            engine: RwLock::new(engine),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Applies mutations in order. Either all of them take effect or, on the
    /// first failure, none do.
    pub fn apply(&self, mutations: impl IntoIterator<Item = Mutation>) -> Result<()> {
        let mut engine = self.engine.write()?;
        let mut view = View::new(&*engine);
        for mutation in mutations {
            let table = self.db.must_table(mutation.table())?;
            match mutation {
                Mutation::Insert { row, .. } => {
                    let row = self.complete_row(table, row)?;
                    let key = Key::from_row(table, &row);
                    let encoded = encode_key(table, &key)?;
                    if view.get(&encoded)?.is_some() {
                        return Err(Error::Internal(format!(
                            "row {}{} already exists",
                            table.name, key
                        )));
                    }
                    view.put(encoded, &row)?;
                }
                Mutation::Update { row, .. } => self.upsert(&mut view, table, row, true)?,
                Mutation::InsertOrUpdate { row, .. } => self.upsert(&mut view, table, row, false)?,
                Mutation::Delete { key_set, .. } => {
                    for key in collect_key_set(&view, table, &key_set)?.into_keys() {
                        self.delete_row(&mut view, table, key)?;
                    }
                }
            }
        }
        let batch = view.batch;
        debug!(writes = batch.len(), "applying mutations");
        engine.write(batch)
    }

    /// Merges `row` into the stored row with the same key
    fn upsert(&self, view: &mut View<'_, E>, table: &Table, row: Row, must_exist: bool) -> Result<()> {
        let key = Key::from_row(table, &row);
        let encoded = encode_key(table, &key)?;
        let merged = match view.get(&encoded)? {
            Some(existing) => {
                let mut existing: Row = bincode::deserialize(&existing)?;
                existing.merge(row);
                existing
            }
            None if must_exist => {
                return Err(Error::Internal(format!("row {}{} does not exist", table.name, key)));
            }
            None => row,
        };
        let merged = self.complete_row(table, merged)?;
        view.put(encoded, &merged)
    }

    /// Type-checks a row against the table and fills absent columns with NULL
    fn complete_row(&self, table: &Table, row: Row) -> Result<Row> {
        if let Some(column) = row.columns().find(|c| table.column(c).is_none()) {
            return Err(Error::Internal(format!(
                "column {}.{} does not exist",
                table.name, column
            )));
        }
        let mut out = Row::new();
        for col in &table.columns {
            let value = row.get(&col.name).cloned().unwrap_or(Value::Null);
            if value.is_null() && col.not_null {
                return Err(Error::Internal(format!("column {} cannot be null", col.name)));
            }
            if !col.column_type.accepts(&value) {
                return Err(Error::Internal(format!(
                    "column {} type mismatch: expected {}, got {}",
                    col.name, col.column_type, value
                )));
            }
            out.set(col.name.clone(), value);
        }
        Ok(out)
    }

    /// Deletes a row and its interleaved descendants
    fn delete_row(&self, view: &mut View<'_, E>, table: &Table, key: Vec<u8>) -> Result<()> {
        let Some(row) = view.get(&key)? else {
            return Ok(());
        };
        let row: Row = bincode::deserialize(&row)?;
        let row_key = Key::from_row(table, &row);
        for child in self.db.children(&table.name) {
            let child_keys = view.scan_prefix(&encode_key(child, &row_key)?)?;
            if child_keys.is_empty() {
                continue;
            }
            let on_delete = child.interleave.as_ref().map(|i| i.on_delete);
            if on_delete != Some(OnDelete::Cascade) {
                return Err(Error::Internal(format!(
                    "row {}{} has rows in interleaved table {}",
                    table.name, row_key, child.name
                )));
            }
            for child_key in child_keys.into_keys() {
                self.delete_row(view, child, child_key)?;
            }
        }
        trace!(table = %table.name, key = %row_key, "deleted row");
        view.delete(key);
        Ok(())
    }

    fn read_rows(&self, table: &Table, key_set: &KeySet, columns: &[String]) -> Result<Vec<Row>> {
        let engine = self.engine.read()?;
        collect_key_set(&View::new(&*engine), table, key_set)?
            .into_values()
            .map(|value| Ok(bincode::deserialize::<Row>(&value)?.project(columns)))
            .collect()
    }
}

/// Engine contents with the writes staged by an in-progress apply on top
struct View<'a, E: StorageEngine> {
    engine: &'a E,
    batch: WriteBatch,
}

impl<'a, E: StorageEngine> View<'a, E> {
    fn new(engine: &'a E) -> Self {
        Self {
            engine,
            batch: WriteBatch::new(),
        }
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.batch.get(key) {
            Some(staged) => Ok(staged.map(<[u8]>::to_vec)),
            None => self.engine.get(key),
        }
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
        let mut out = self.engine.scan_prefix(prefix).collect::<Result<BTreeMap<_, _>>>()?;
        for (key, staged) in self.batch.scan_prefix(prefix) {
            match staged {
                Some(value) => out.insert(key.clone(), value.clone()),
                None => out.remove(key),
            };
        }
        Ok(out)
    }

    fn put(&mut self, key: Vec<u8>, row: &Row) -> Result<()> {
        self.batch.put(key, bincode::serialize(row)?);
        Ok(())
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.batch.delete(key);
    }
}

/// Encodes a full key or key prefix of `table`
fn encode_key(table: &Table, key: &Key) -> Result<Vec<u8>> {
    keycode::encode_key(
        &table.name,
        key.values()
            .iter()
            .zip(&table.primary_key)
            .map(|(value, part)| (value, part.desc)),
    )
}

/// The rows matched by a key set, keyed and ordered by encoded key
fn collect_key_set<E: StorageEngine>(
    view: &View<'_, E>,
    table: &Table,
    key_set: &KeySet,
) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
    let mut out = BTreeMap::new();
    match key_set {
        KeySet::Single(key) => collect_key(view, table, key, &mut out)?,
        KeySet::List(keys) => {
            for key in keys {
                collect_key(view, table, key, &mut out)?;
            }
        }
        KeySet::Prefix(prefix) => out = view.scan_prefix(&encode_key(table, prefix)?)?,
        KeySet::Union(sets) => {
            for set in sets {
                out.extend(collect_key_set(view, table, set)?);
            }
        }
    }
    Ok(out)
}

fn collect_key<E: StorageEngine>(
    view: &View<'_, E>,
    table: &Table,
    key: &Key,
    out: &mut BTreeMap<Vec<u8>, Vec<u8>>,
) -> Result<()> {
    if key.len() != table.primary_key.len() {
        return Err(Error::Internal(format!(
            "key {} does not match the primary key of table {}",
            key, table.name
        )));
    }
    let encoded = encode_key(table, key)?;
    if let Some(value) = view.get(&encoded)? {
        out.insert(encoded, value);
    }
    Ok(())
}

fn check_scope(scope: &CancellationToken) -> Result<()> {
    if scope.is_cancelled() {
        return Err(Error::backend("read cancelled"));
    }
    Ok(())
}

#[async_trait]
impl<E: StorageEngine + 'static> Backend for KvBackend<E> {
    async fn read(
        &self,
        scope: &CancellationToken,
        table: &str,
        key_set: &KeySet,
        columns: &[String],
    ) -> Result<Vec<Row>> {
        check_scope(scope)?;
        let table = self.db.must_table(table)?;
        let rows = self.read_rows(table, key_set, columns)?;
        debug!(table = %table.name, rows = rows.len(), "read");
        Ok(rows)
    }

    async fn read_row(
        &self,
        scope: &CancellationToken,
        table: &str,
        key: &Key,
        columns: &[String],
    ) -> Result<Option<Row>> {
        check_scope(scope)?;
        let table = self.db.must_table(table)?;
        Ok(self
            .read_rows(table, &KeySet::Single(key.clone()), columns)?
            .into_iter()
            .next())
    }

    async fn query(&self, scope: &CancellationToken, statement: &Statement) -> Result<Vec<Row>> {
        check_scope(scope)?;
        trace!(sql = %statement.sql(), "query");
        let result = executor::execute(self, &statement.query, &statement.params)?;
        Ok(result.rows)
    }
}

impl<E: StorageEngine + 'static> Source for KvBackend<E> {
    fn scan(&self, table: &str) -> Result<Vec<Row>> {
        let table = self.db.must_table(table)?;
        self.read_rows(table, &KeySet::all(), &table.column_names())
    }
}
