use std::collections::HashMap;

use futures_util::future::try_join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
    config::ReadConfig,
    error::{Error, Result},
    sql::{
        engine::Backend,
        key::{Key, KeySet},
        schema::{Table, TableId},
        types::{Row, Value},
    },
};

use super::{InterleavedRow, Level, ReadPlan};

/// Reads every descendant level of `plan` below the already read root rows,
/// one depth at a time, and stitches the results into row trees.
///
/// All reads of a wave run concurrently under a child of `scope`. The first
/// failing read cancels the wave and its error is returned; nothing is
/// stitched until every wave succeeded.
pub(crate) async fn fan_out<B: Backend + ?Sized>(
    backend: &B,
    scope: &CancellationToken,
    plan: &ReadPlan<'_>,
    config: &ReadConfig,
    roots: Vec<Row>,
    show_deleted: bool,
) -> Result<Vec<InterleavedRow>> {
    let mut fetched: HashMap<TableId, Vec<Row>> = HashMap::new();
    fetched.insert(plan.root().table, roots);

    for (depth, wave) in plan.waves().into_iter().enumerate() {
        if scope.is_cancelled() {
            return Err(Error::backend("read cancelled"));
        }
        debug!(depth = depth + 1, tables = wave.len(), "fan-out wave");
        let wave_scope = scope.child_token();
        let mut reads = Vec::with_capacity(wave.len());
        for (level, parent) in wave {
            let table = plan.table(level);
            let parent_table = plan.table(parent);
            let key_set = KeySet::prefixes(
                fetched
                    .get(&parent.table)
                    .into_iter()
                    .flatten()
                    .map(|row| Key::from_row(parent_table, row)),
            );
            if key_set.is_empty() {
                trace!(table = %table.name, "no parent rows, skipping read");
                fetched.insert(level.table, Vec::new());
                continue;
            }
            let wave_scope = wave_scope.clone();
            reads.push(async move {
                let columns = table.column_names();
                let read = backend.read(&wave_scope, &table.name, &key_set, &columns);
                let result = tokio::select! {
                    biased;
                    _ = wave_scope.cancelled() => {
                        debug!(table = %table.name, "fan-out read cancelled");
                        Err(Error::backend(format!("read {} cancelled", table.name)))
                    }
                    rows = read => rows,
                };
                match result {
                    Ok(mut rows) => {
                        if !show_deleted {
                            retain_visible(table, config, &mut rows);
                        }
                        Ok((level.table, rows))
                    }
                    Err(err) => {
                        debug!(table = %table.name, error = %err, "fan-out read failed");
                        wave_scope.cancel();
                        Err(err)
                    }
                }
            });
        }
        for (table, rows) in try_join_all(reads).await? {
            fetched.insert(table, rows);
        }
    }

    let roots = fetched.remove(&plan.root().table).unwrap_or_default();
    Ok(assemble(plan, plan.root(), roots, &mut fetched))
}

/// Drops rows whose soft-delete column is set
pub(crate) fn retain_visible(table: &Table, config: &ReadConfig, rows: &mut Vec<Row>) {
    if let Some(column) = table.soft_delete_column(&config.soft_delete_column) {
        rows.retain(|row| row.get(&column.name).is_none_or(Value::is_null));
    }
}

/// Builds the trees of one level bottom-up: children are assembled first and
/// attached to their parent row by the parent portion of their key.
fn assemble(
    plan: &ReadPlan<'_>,
    level: &Level,
    rows: Vec<Row>,
    fetched: &mut HashMap<TableId, Vec<Row>>,
) -> Vec<InterleavedRow> {
    let table = plan.table(level);
    let mut out: Vec<InterleavedRow> = rows
        .into_iter()
        .map(|row| {
            let mut row = InterleavedRow::new(&table.name, row);
            for child in &level.children {
                row.interleaved.insert(plan.table(child).name.clone(), Vec::new());
            }
            row
        })
        .collect();
    let lookup: HashMap<Key, usize> = out
        .iter()
        .enumerate()
        .map(|(i, row)| (Key::from_row(table, &row.row), i))
        .collect();

    for child in &level.children {
        let child_table = plan.table(child);
        let child_rows = fetched.remove(&child.table).unwrap_or_default();
        for child_row in assemble(plan, child, child_rows, fetched) {
            let parent_key = Key::from_row(child_table, &child_row.row).parent_key(table);
            let Some(&i) = lookup.get(&parent_key) else {
                continue;
            };
            if let Some(children) = out[i].interleaved.get_mut(&child_table.name) {
                children.push(child_row);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use super::fan_out;
    use crate::{
        config::ReadConfig,
        error::{Error, Result},
        sql::{
            ast::Statement,
            engine::Backend,
            key::{Key, KeySet},
            plan::{Descendants, ReadPlan, tests::family},
            schema::Database,
            types::{Row, Value},
        },
    };

    /// Serves rows from memory; reads of `failing` fail.
    struct StaticBackend {
        db: Database,
        rows: HashMap<String, Vec<Row>>,
        failing: Option<String>,
        reads: AtomicUsize,
    }

    impl StaticBackend {
        fn new(db: Database) -> Self {
            Self {
                db,
                rows: HashMap::new(),
                failing: None,
                reads: AtomicUsize::new(0),
            }
        }

        fn insert(&mut self, table: &str, row: Row) {
            self.rows.entry(table.to_string()).or_default().push(row);
        }
    }

    #[async_trait]
    impl Backend for StaticBackend {
        async fn read(
            &self,
            _scope: &CancellationToken,
            table: &str,
            key_set: &KeySet,
            _columns: &[String],
        ) -> Result<Vec<Row>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.failing.as_deref() == Some(table) {
                return Err(Error::backend(format!("{} unavailable", table)));
            }
            let schema = self.db.must_table(table)?;
            Ok(self
                .rows
                .get(table)
                .into_iter()
                .flatten()
                .filter(|row| key_set.contains(&Key::from_row(schema, row)))
                .cloned()
                .collect())
        }

        async fn read_row(
            &self,
            scope: &CancellationToken,
            table: &str,
            key: &Key,
            columns: &[String],
        ) -> Result<Option<Row>> {
            let rows = self.read(scope, table, &KeySet::Single(key.clone()), columns).await?;
            Ok(rows.into_iter().next())
        }

        async fn query(&self, _scope: &CancellationToken, _statement: &Statement) -> Result<Vec<Row>> {
            Err(Error::backend("queries are not supported"))
        }
    }

    fn parent(id: i64) -> Row {
        Row::new().with("id", id).with("name", format!("p{}", id)).with("delete_time", Value::Null)
    }

    fn child(id: i64, child_id: i64) -> Row {
        Row::new().with("id", id).with("child_id", child_id).with("delete_time", Value::Null)
    }

    fn grand_child(id: i64, child_id: i64, grand_child_id: i64) -> Row {
        Row::new()
            .with("id", id)
            .with("child_id", child_id)
            .with("grand_child_id", grand_child_id)
    }

    fn backend() -> StaticBackend {
        let mut backend = StaticBackend::new(family());
        backend.insert("Child", child(1, 1));
        backend.insert("Child", child(1, 2));
        backend.insert("Child", child(2, 1));
        backend.insert("GrandChild", grand_child(1, 2, 7));
        backend.insert("GrandChild", grand_child(2, 1, 8));
        backend
    }

    #[tokio::test]
    async fn test_fan_out_stitches_by_parent_key() -> Result<()> {
        let backend = backend();
        let db = family();
        let plan = ReadPlan::new(&db, "Parent", &Descendants::new().with("GrandChild"))?;
        let scope = CancellationToken::new();
        let trees = fan_out(
            &backend,
            &scope,
            &plan,
            &ReadConfig::default(),
            vec![parent(1), parent(2), parent(3)],
            false,
        )
        .await?;

        assert_eq!(trees.len(), 3);
        let children = trees[0].children("Child");
        assert_eq!(children.len(), 2);
        assert!(children[0].children("GrandChild").is_empty());
        assert_eq!(children[1].children("GrandChild")[0].row, grand_child(1, 2, 7));
        assert_eq!(trees[1].children("Child")[0].children("GrandChild").len(), 1);
        assert!(trees[2].children("Child").is_empty());
        assert!(trees[2].interleaved.contains_key("Child"));
        Ok(())
    }

    #[tokio::test]
    async fn test_fan_out_skips_empty_key_set() -> Result<()> {
        let backend = backend();
        let db = family();
        let plan = ReadPlan::new(&db, "Parent", &Descendants::all(&db, "Parent"))?;
        let trees = fan_out(
            &backend,
            &CancellationToken::new(),
            &plan,
            &ReadConfig::default(),
            Vec::new(),
            false,
        )
        .await?;
        assert!(trees.is_empty());
        assert_eq!(backend.reads.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_fan_out_hides_deleted_children() -> Result<()> {
        let mut backend = backend();
        backend.insert("Child", child(3, 1).with("delete_time", chrono::Utc::now()));
        let db = family();
        let plan = ReadPlan::new(&db, "Parent", &Descendants::new().with("Child"))?;
        let config = ReadConfig::default();
        let scope = CancellationToken::new();

        let trees = fan_out(&backend, &scope, &plan, &config, vec![parent(3)], false).await?;
        assert!(trees[0].children("Child").is_empty());
        let trees = fan_out(&backend, &scope, &plan, &config, vec![parent(3)], true).await?;
        assert_eq!(trees[0].children("Child").len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_fan_out_first_error_wins() -> Result<()> {
        let mut backend = backend();
        backend.failing = Some("GrandChild".to_string());
        let db = family();
        let plan = ReadPlan::new(&db, "Parent", &Descendants::all(&db, "Parent"))?;
        let result = fan_out(
            &backend,
            &CancellationToken::new(),
            &plan,
            &ReadConfig::default(),
            vec![parent(1)],
            false,
        )
        .await;
        assert_eq!(result, Err(Error::backend("GrandChild unavailable")));
        Ok(())
    }

    #[tokio::test]
    async fn test_fan_out_honors_cancelled_scope() -> Result<()> {
        let backend = backend();
        let db = family();
        let plan = ReadPlan::new(&db, "Parent", &Descendants::new().with("Child"))?;
        let scope = CancellationToken::new();
        scope.cancel();
        let result = fan_out(&backend, &scope, &plan, &ReadConfig::default(), vec![parent(1)], false).await;
        assert!(result.is_err());
        assert_eq!(backend.reads.load(Ordering::SeqCst), 0);
        Ok(())
    }
}
