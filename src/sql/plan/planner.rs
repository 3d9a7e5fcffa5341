use tracing::trace;

use crate::{
    config::ReadConfig,
    error::{Error, PlanError, Result},
    sql::{
        ast::{Expr, Params, Query, Select, SelectItem, Statement},
        key::Key,
        schema::{Database, Table},
        types::{Row, Value},
    },
};

use super::{InterleavedRow, Level, ListQuery, ReadPlan};

/// Builds read statements for a plan and decodes their results
pub struct Planner<'a> {
    db: &'a Database,
    config: &'a ReadConfig,
}

impl<'a> Planner<'a> {
    pub fn new(db: &'a Database, config: &'a ReadConfig) -> Self {
        Self { db, config }
    }

    /// Ties a child row to its parent row by the parent's key columns.
    /// Nullable key parts compare NULL-safely.
    pub fn correlation(&self, parent: &Table, child: &Table) -> Expr {
        Expr::conjunction(parent.primary_key.iter().map(|part| {
            let lhs = || Expr::path([&child.name, &part.column]);
            let rhs = || Expr::path([&parent.name, &part.column]);
            let not_null = child.column(&part.column).is_some_and(|c| c.not_null);
            if not_null {
                Expr::equals(lhs(), rhs())
            } else {
                Expr::or(
                    Expr::and(Expr::is_null(lhs()), Expr::is_null(rhs())).paren(),
                    Expr::equals(lhs(), rhs()),
                )
                .paren()
            }
        }))
    }

    pub fn soft_delete_filter(&self, table: &Table) -> Option<Expr> {
        table
            .soft_delete_column(&self.config.soft_delete_column)
            .map(|c| Expr::is_null(Expr::ident(&c.name)))
    }

    /// The list statement for a plan. With `nested`, every descendant level
    /// of the plan becomes an ARRAY subquery; without it only the root is read.
    pub fn list_statement(&self, plan: &ReadPlan<'_>, query: &ListQuery, nested: bool) -> Statement {
        let table = plan.table(plan.root());
        let params = self.list_params(query);

        let mut filter = query.predicate.clone().unwrap_or(Expr::True);
        if !query.show_deleted {
            if let Some(visible) = self.soft_delete_filter(table) {
                filter = Expr::and(filter.paren(), visible);
            }
        }
        let order = if query.order.is_empty() {
            Key::order(table)
        } else {
            query.order.clone()
        };
        let (limit, offset) = match (query.limit, query.offset) {
            (None, 0) => (None, None),
            _ => (
                Some(Expr::param(&self.config.limit_param)),
                Some(Expr::param(&self.config.offset_param)),
            ),
        };
        let children: &[Level] = if nested {
            plan.root().children.as_slice()
        } else {
            &[]
        };
        let statement = Statement {
            query: Query {
                select: Select {
                    as_struct: false,
                    list: self.select_list(plan, table, children, query.show_deleted),
                    from: table.name.clone(),
                    filter: Some(filter),
                },
                order,
                limit,
                offset,
            },
            params,
        };
        trace!(sql = %statement.sql(), "list statement");
        statement
    }

    fn select_list(
        &self,
        plan: &ReadPlan<'_>,
        table: &Table,
        children: &[Level],
        show_deleted: bool,
    ) -> Vec<SelectItem> {
        let mut list: Vec<SelectItem> = table
            .columns
            .iter()
            .map(|c| SelectItem::Column(c.name.clone()))
            .collect();
        for child in children {
            let child_table = plan.table(child);
            list.push(SelectItem::Array {
                query: Box::new(self.subquery(plan, table, child, show_deleted)),
                alias: child_table.name.clone(),
            });
        }
        list
    }

    /// `SELECT AS STRUCT` over one child level, correlated to its parent row
    fn subquery(&self, plan: &ReadPlan<'_>, parent: &Table, level: &Level, show_deleted: bool) -> Query {
        let table = plan.table(level);
        let mut filter = self.correlation(parent, table);
        if !show_deleted {
            if let Some(visible) = self.soft_delete_filter(table) {
                filter = Expr::and(visible, filter);
            }
        }
        Query {
            select: Select {
                as_struct: true,
                list: self.select_list(plan, table, &level.children, show_deleted),
                from: table.name.clone(),
                filter: Some(filter),
            },
            order: Key::order(table),
            limit: None,
            offset: None,
        }
    }

    /// Caller params plus the generated limit, offset and key params.
    ///
    /// # Panics
    ///
    /// Panics if a caller param uses a name the planner generates.
    pub fn list_params(&self, query: &ListQuery) -> Params {
        let mut params = Params::new();
        for (name, value) in &query.params {
            if self.config.is_reserved_param(name) {
                panic!("{}", PlanError::ParameterCollision(name.clone()));
            }
            params.insert(name.clone(), value.clone());
        }
        params.extend(query.key_params.clone());
        if query.limit.is_some() || query.offset != 0 {
            params.insert(
                self.config.limit_param.clone(),
                Value::Int64(query.limit.unwrap_or(i64::MAX)),
            );
            params.insert(self.config.offset_param.clone(), Value::Int64(query.offset));
        }
        params
    }

    /// Decodes a result row of a nested statement into a row tree
    pub fn unmarshal(&self, plan: &ReadPlan<'_>, level: &Level, row: Row) -> Result<InterleavedRow> {
        let table = plan.table(level);
        let mut out = InterleavedRow::new(&table.name, Row::new());
        for child in &level.children {
            out.interleaved.insert(plan.table(child).name.clone(), Vec::new());
        }
        for (column, value) in row {
            if let Some(col) = table.column(&column) {
                if !col.column_type.accepts(&value) {
                    return Err(unmarshal_error(
                        table,
                        &column,
                        format!("expected {}, got {}", col.column_type, value),
                    ));
                }
                out.row.set(column, value);
                continue;
            }
            let Some(child) = level.children.iter().find(|c| plan.table(c).name == column) else {
                return Err(unmarshal_error(table, &column, "unknown column".to_string()));
            };
            let items = match value {
                Value::Array(items) => items,
                Value::Null => Vec::new(),
                other => {
                    return Err(unmarshal_error(
                        table,
                        &column,
                        format!("expected array of structs, got {}", other),
                    ));
                }
            };
            let mut children = Vec::with_capacity(items.len());
            for item in items {
                let Value::Struct(child_row) = item else {
                    return Err(unmarshal_error(
                        table,
                        &column,
                        format!("expected struct, got {}", item),
                    ));
                };
                children.push(self.unmarshal(plan, child, child_row)?);
            }
            out.interleaved.insert(column, children);
        }
        Ok(out)
    }

    pub fn db(&self) -> &'a Database {
        self.db
    }
}

fn unmarshal_error(table: &Table, column: &str, reason: String) -> Error {
    Error::backend(format!("unmarshal {} row: {} column: {}", table.name, column, reason))
}

#[cfg(test)]
mod tests {
    use super::Planner;
    use crate::{
        config::ReadConfig,
        error::Result,
        sql::{
            ast::{Expr, Params},
            ddl::{ColumnDef, CreateTable, KeyPart, OnDelete, Statement},
            plan::{Descendants, ListQuery, ReadPlan, tests::family},
            schema::Database,
            types::{BaseType, ColumnType, Row, Value},
        },
    };

    #[test]
    fn test_nested_list_statement() -> Result<()> {
        let db = family();
        let config = ReadConfig::default();
        let planner = Planner::new(&db, &config);
        let query = ListQuery::new("Parent").with_descendant("GrandChild").limit(10);
        let plan = ReadPlan::new(&db, "Parent", &query.descendants)?;

        let statement = planner.list_statement(&plan, &query, true);
        assert_eq!(
            statement.sql(),
            "SELECT id, name, delete_time, \
             ARRAY(SELECT AS STRUCT id, child_id, delete_time, \
             ARRAY(SELECT AS STRUCT id, child_id, grand_child_id FROM GrandChild \
             WHERE GrandChild.id = Child.id AND GrandChild.child_id = Child.child_id \
             ORDER BY id, child_id, grand_child_id DESC) AS GrandChild \
             FROM Child WHERE delete_time IS NULL AND Child.id = Parent.id \
             ORDER BY id, child_id) AS Child \
             FROM Parent WHERE (TRUE) AND delete_time IS NULL \
             ORDER BY id LIMIT @__limit OFFSET @__offset"
        );
        assert_eq!(statement.params.get("__limit"), Some(&Value::Int64(10)));
        assert_eq!(statement.params.get("__offset"), Some(&Value::Int64(0)));

        let flat = planner.list_statement(&plan, &query.clone().show_deleted(true), false);
        assert_eq!(
            flat.sql(),
            "SELECT id, name, delete_time FROM Parent WHERE TRUE ORDER BY id \
             LIMIT @__limit OFFSET @__offset"
        );
        Ok(())
    }

    #[test]
    fn test_no_limit_no_params() -> Result<()> {
        let db = family();
        let config = ReadConfig::default();
        let planner = Planner::new(&db, &config);
        let query = ListQuery::new("Sibling");
        let plan = ReadPlan::new(&db, "Sibling", &Descendants::new())?;
        let statement = planner.list_statement(&plan, &query, true);
        assert_eq!(
            statement.sql(),
            "SELECT id, sibling_id FROM Sibling WHERE TRUE ORDER BY id, sibling_id"
        );
        assert!(statement.params.is_empty());
        Ok(())
    }

    #[test]
    fn test_nullable_key_correlation() -> Result<()> {
        let mut db = Database::new();
        let stmts: Vec<Statement> = vec![
            CreateTable::new("Parent")
                .column(ColumnDef::new("id", ColumnType::scalar(BaseType::String)))
                .primary_key([KeyPart::asc("id")])
                .into(),
            CreateTable::new("Child")
                .column(ColumnDef::new("id", ColumnType::scalar(BaseType::String)))
                .column(ColumnDef::new("n", ColumnType::scalar(BaseType::Int64)).not_null())
                .primary_key([KeyPart::asc("id"), KeyPart::asc("n")])
                .interleave_in("Parent", OnDelete::Cascade)
                .into(),
        ];
        db.apply_all(&stmts)?;
        let config = ReadConfig::default();
        let planner = Planner::new(&db, &config);
        let correlation =
            planner.correlation(db.table("Parent").unwrap(), db.table("Child").unwrap());
        assert_eq!(
            correlation.to_string(),
            "((Child.id IS NULL AND Parent.id IS NULL) OR Child.id = Parent.id)"
        );
        Ok(())
    }

    #[test]
    #[should_panic(expected = "invalid param: __limit")]
    fn test_param_collision_panics() {
        let db = family();
        let config = ReadConfig::default();
        let planner = Planner::new(&db, &config);
        let mut params = Params::new();
        params.insert("__limit".to_string(), Value::Int64(1));
        let query = ListQuery::new("Parent").predicate(Expr::True, params);
        planner.list_params(&query);
    }

    #[test]
    fn test_unmarshal() -> Result<()> {
        let db = family();
        let config = ReadConfig::default();
        let planner = Planner::new(&db, &config);
        let plan = ReadPlan::new(&db, "Parent", &Descendants::new().with("Child"))?;

        let child = Row::new().with("id", 1).with("child_id", 2).with("delete_time", Value::Null);
        let row = Row::new()
            .with("id", 1)
            .with("name", "one")
            .with("delete_time", Value::Null)
            .with("Child", Value::Array(vec![Value::Struct(child.clone())]));
        let decoded = planner.unmarshal(&plan, plan.root(), row)?;
        assert_eq!(decoded.get("name"), Some(&Value::from("one")));
        assert_eq!(decoded.children("Child").len(), 1);
        assert_eq!(decoded.children("Child")[0].row, child);

        let empty = Row::new().with("id", 2).with("Child", Value::Null);
        let decoded = planner.unmarshal(&plan, plan.root(), empty)?;
        assert!(decoded.children("Child").is_empty());
        assert!(decoded.interleaved.contains_key("Child"));

        let bad = Row::new().with("id", "not a number");
        let err = planner.unmarshal(&plan, plan.root(), bad).unwrap_err();
        assert_eq!(
            err.to_string(),
            "backend failure: unmarshal Parent row: id column: expected INT64, got \"not a number\""
        );
        Ok(())
    }
}
