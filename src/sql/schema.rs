//! Schema model: a database of interleaved tables and indexes, built by
//! applying already-parsed DDL statements one at a time.
//!
//! Every statement is atomic: it is validated against the current schema and
//! only then committed, so a failing statement leaves the database unchanged.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{Entity, Error, Result, SchemaError},
    sql::ddl::{
        Alteration, AlterTable, ConstraintKind, CreateIndex, CreateTable, Statement,
        TableConstraint,
    },
};

mod table;

pub use table::{Column, Index, Table};

/// Position of a table in the database's table arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(usize);

/// The schema graph. Owns all tables and indexes; interleaving is recorded
/// only as parent names, and children are derived by scanning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Database {
    tables: Vec<Table>,
    indexes: Vec<Index>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a single statement
    pub fn apply(&mut self, stmt: &Statement) -> Result<()> {
        debug!(kind = %stmt.kind(), "applying schema statement");
        let applied = match stmt {
            Statement::CreateTable(create) => self.apply_create_table(create),
            Statement::AlterTable(alter) => self.apply_alter_table(alter),
            Statement::DropTable(name) => self.apply_drop_table(name),
            Statement::CreateIndex(create) => self.apply_create_index(create),
            Statement::DropIndex(name) => self.apply_drop_index(name),
        };
        applied.map_err(|source| Error::schema(stmt.kind(), source))
    }

    /// Applies statements in order, stopping at the first failure
    pub fn apply_all<'a>(&mut self, stmts: impl IntoIterator<Item = &'a Statement>) -> Result<()> {
        for stmt in stmts {
            self.apply(stmt)?;
        }
        Ok(())
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn must_table(&self, name: &str) -> Result<&Table> {
        self.table(name)
            .ok_or_else(|| Error::Internal(format!("table {} does not exist", name)))
    }

    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn table_id(&self, name: &str) -> Option<TableId> {
        self.tables.iter().position(|t| t.name == name).map(TableId)
    }

    pub fn table_at(&self, id: TableId) -> &Table {
        &self.tables[id.0]
    }

    /// Tables declaring `id` as their interleave parent, in creation order
    pub fn children_ids(&self, id: TableId) -> Vec<TableId> {
        let name = &self.tables[id.0].name;
        self.tables
            .iter()
            .enumerate()
            .filter(|(_, t)| t.parent_name() == Some(name.as_str()))
            .map(|(i, _)| TableId(i))
            .collect()
    }

    pub fn children(&self, name: &str) -> Vec<&Table> {
        self.tables
            .iter()
            .filter(|t| t.parent_name() == Some(name))
            .collect()
    }

    pub fn parent(&self, name: &str) -> Option<&Table> {
        self.table(name)?.parent_name().and_then(|p| self.table(p))
    }

    /// Interleave ancestors, nearest first
    pub fn ancestors(&self, name: &str) -> Vec<&Table> {
        let mut ancestors = Vec::new();
        let mut current = self.parent(name);
        while let Some(table) = current {
            ancestors.push(table);
            current = self.parent(&table.name);
        }
        ancestors
    }

    /// All interleaved descendants in pre-order
    pub fn descendants(&self, name: &str) -> Vec<&Table> {
        let mut out = Vec::new();
        let mut stack: Vec<&Table> = self.children(name).into_iter().rev().collect();
        while let Some(table) = stack.pop() {
            out.push(table);
            stack.extend(self.children(&table.name).into_iter().rev());
        }
        out
    }

    pub fn indexes_of(&self, table: &str) -> Vec<&Index> {
        self.indexes.iter().filter(|i| i.table == table).collect()
    }

    fn apply_create_table(&mut self, stmt: &CreateTable) -> std::result::Result<(), SchemaError> {
        if self.table(&stmt.name).is_some() {
            return Err(SchemaError::DuplicateName(Entity::Table(stmt.name.clone())));
        }
        let table = Table::from_create(stmt);
        table.validate()?;
        if let Some(interleave) = &table.interleave {
            let parent = self
                .table(&interleave.parent)
                .ok_or_else(|| SchemaError::NotFound(Entity::Table(interleave.parent.clone())))?;
            let extends_parent = parent.primary_key.len() <= table.primary_key.len()
                && parent
                    .primary_key
                    .iter()
                    .zip(&table.primary_key)
                    .all(|(p, c)| p.column == c.column);
            if !extends_parent {
                return Err(SchemaError::InvalidInterleaveState(format!(
                    "primary key of {} must start with the primary key of {}",
                    table.name, parent.name
                )));
            }
        }
        for constraint in &table.constraints {
            self.check_constraint(&table.name, constraint)?;
        }
        self.tables.push(table);
        Ok(())
    }

    fn apply_alter_table(&mut self, stmt: &AlterTable) -> std::result::Result<(), SchemaError> {
        let i = self
            .tables
            .iter()
            .position(|t| t.name == stmt.name)
            .ok_or_else(|| SchemaError::NotFound(Entity::Table(stmt.name.clone())))?;
        match &stmt.alteration {
            Alteration::AddConstraint(constraint) => self.check_constraint(&stmt.name, constraint)?,
            Alteration::DropColumn(column) => {
                if let Some(index) = self
                    .indexes_of(&stmt.name)
                    .into_iter()
                    .find(|index| index.uses_column(column))
                {
                    return Err(SchemaError::UnsupportedAlteration(format!(
                        "column {}.{} is used by index {}",
                        stmt.name, column, index.name
                    )));
                }
            }
            _ => {}
        }
        let mut altered = self.tables[i].clone();
        altered.alter(&stmt.alteration)?;
        self.tables[i] = altered;
        Ok(())
    }

    fn apply_drop_table(&mut self, name: &str) -> std::result::Result<(), SchemaError> {
        let i = self
            .tables
            .iter()
            .position(|t| t.name == name)
            .ok_or_else(|| SchemaError::NotFound(Entity::Table(name.to_string())))?;
        let dependents: Vec<String> = self.children(name).iter().map(|t| t.name.clone()).collect();
        if !dependents.is_empty() {
            return Err(SchemaError::HasDependents {
                table: name.to_string(),
                dependents,
            });
        }
        self.tables.remove(i);
        self.indexes.retain(|index| index.table != name);
        Ok(())
    }

    fn apply_create_index(&mut self, stmt: &CreateIndex) -> std::result::Result<(), SchemaError> {
        if self.index(&stmt.name).is_some() {
            return Err(SchemaError::DuplicateName(Entity::Index(stmt.name.clone())));
        }
        let table = self
            .table(&stmt.table)
            .ok_or_else(|| SchemaError::NotFound(Entity::Table(stmt.table.clone())))?;
        let columns = stmt.columns.iter().map(|p| &p.column).chain(&stmt.storing);
        for column in columns {
            if table.column(column).is_none() {
                return Err(SchemaError::NotFound(Entity::Column {
                    table: table.name.clone(),
                    column: column.clone(),
                }));
            }
        }
        if let Some(parent) = &stmt.interleave {
            if self.table(parent).is_none() {
                return Err(SchemaError::NotFound(Entity::Table(parent.clone())));
            }
        }
        self.indexes.push(Index::from(stmt));
        Ok(())
    }

    fn apply_drop_index(&mut self, name: &str) -> std::result::Result<(), SchemaError> {
        let i = self
            .indexes
            .iter()
            .position(|index| index.name == name)
            .ok_or_else(|| SchemaError::NotFound(Entity::Index(name.to_string())))?;
        self.indexes.remove(i);
        Ok(())
    }

    fn check_constraint(
        &self,
        table: &str,
        constraint: &TableConstraint,
    ) -> std::result::Result<(), SchemaError> {
        if let ConstraintKind::ForeignKey { ref_table, .. } = &constraint.kind {
            if ref_table != table && self.table(ref_table).is_none() {
                return Err(SchemaError::NotFound(Entity::Table(ref_table.clone())));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Database;
    use crate::{
        error::{Entity, Error, Result, SchemaError},
        sql::{
            ddl::{
                Alteration, ColumnAlteration, ColumnDef, ConstraintKind, CreateIndex,
                CreateTable, KeyPart, OnDelete, Statement, StatementKind, TableConstraint,
            },
            types::{BaseType, ColumnType, Length},
        },
    };

    fn int64(name: &str) -> ColumnDef {
        ColumnDef::new(name, ColumnType::scalar(BaseType::Int64)).not_null()
    }

    fn parent() -> Statement {
        CreateTable::new("Parent")
            .column(int64("id"))
            .column(ColumnDef::new(
                "name",
                ColumnType::scalar(BaseType::String).with_len(Length::Max),
            ))
            .primary_key([KeyPart::asc("id")])
            .into()
    }

    fn child(name: &str) -> Statement {
        CreateTable::new(name)
            .column(int64("id"))
            .column(int64("child_id"))
            .primary_key([KeyPart::asc("id"), KeyPart::asc("child_id")])
            .interleave_in("Parent", OnDelete::Cascade)
            .into()
    }

    fn schema_err(err: Error) -> (StatementKind, SchemaError) {
        match err {
            Error::Schema { statement, source } => (statement, source),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_create_child_before_parent() -> Result<()> {
        let mut db = Database::new();
        let err = db.apply(&child("Child")).unwrap_err();
        assert_eq!(err.to_string(), "CREATE TABLE: table Parent does not exist");
        assert_eq!(
            schema_err(err),
            (
                StatementKind::CreateTable,
                SchemaError::NotFound(Entity::Table("Parent".into()))
            )
        );
        assert!(db.tables().is_empty());

        db.apply_all(&[parent(), child("Child")])?;
        let children = db.children("Parent");
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "Child");
        Ok(())
    }

    #[test]
    fn test_create_duplicate_table() -> Result<()> {
        let mut db = Database::new();
        db.apply(&parent())?;
        let (_, err) = schema_err(db.apply(&parent()).unwrap_err());
        assert_eq!(err, SchemaError::DuplicateName(Entity::Table("Parent".into())));
        assert_eq!(db.tables().len(), 1);
        Ok(())
    }

    #[test]
    fn test_create_child_must_extend_parent_key() -> Result<()> {
        let mut db = Database::new();
        db.apply(&parent())?;
        let stmt = CreateTable::new("Child")
            .column(int64("child_id"))
            .primary_key([KeyPart::asc("child_id")])
            .interleave_in("Parent", OnDelete::NoAction);
        let (_, err) = schema_err(db.apply(&stmt.into()).unwrap_err());
        assert!(matches!(err, SchemaError::InvalidInterleaveState(_)));
        Ok(())
    }

    #[test]
    fn test_drop_table_with_children() -> Result<()> {
        let mut db = Database::new();
        db.apply_all(&[parent(), child("Child"), child("Sibling")])?;

        let err = db.apply(&Statement::DropTable("Parent".into())).unwrap_err();
        assert_eq!(
            err.to_string(),
            "DROP TABLE: table Parent has interleaved tables Child, Sibling"
        );
        let (_, source) = schema_err(err);
        assert_eq!(
            source,
            SchemaError::HasDependents {
                table: "Parent".into(),
                dependents: vec!["Child".into(), "Sibling".into()],
            }
        );

        db.apply(&Statement::DropTable("Child".into()))?;
        db.apply(&Statement::DropTable("Sibling".into()))?;
        db.apply(&Statement::DropTable("Parent".into()))?;
        assert!(db.tables().is_empty());

        let (_, err) = schema_err(db.apply(&Statement::DropTable("Parent".into())).unwrap_err());
        assert_eq!(err, SchemaError::NotFound(Entity::Table("Parent".into())));
        Ok(())
    }

    #[test]
    fn test_alter_columns() -> Result<()> {
        let mut db = Database::new();
        db.apply(&parent())?;

        db.apply(&Statement::alter(
            "Parent",
            Alteration::AddColumn(ColumnDef::new("score", ColumnType::scalar(BaseType::Float64))),
        ))?;
        let (_, err) = schema_err(
            db.apply(&Statement::alter(
                "Parent",
                Alteration::AddColumn(ColumnDef::new("score", ColumnType::scalar(BaseType::Int64))),
            ))
            .unwrap_err(),
        );
        assert!(matches!(err, SchemaError::DuplicateName(Entity::Column { .. })));

        db.apply(&Statement::alter(
            "Parent",
            Alteration::AlterColumn {
                name: "score".into(),
                alteration: ColumnAlteration::SetType {
                    column_type: ColumnType::scalar(BaseType::Int64),
                    not_null: true,
                },
            },
        ))?;
        let score = db.table("Parent").and_then(|t| t.column("score")).unwrap();
        assert_eq!(score.column_type, ColumnType::scalar(BaseType::Int64));
        assert!(score.not_null);

        db.apply(&Statement::alter("Parent", Alteration::DropColumn("score".into())))?;
        assert!(db.table("Parent").unwrap().column("score").is_none());

        let (_, err) = schema_err(
            db.apply(&Statement::alter("Parent", Alteration::DropColumn("score".into())))
                .unwrap_err(),
        );
        assert!(matches!(err, SchemaError::NotFound(Entity::Column { .. })));

        let (kind, err) = schema_err(
            db.apply(&Statement::alter("Missing", Alteration::DropColumn("x".into())))
                .unwrap_err(),
        );
        assert_eq!(kind, StatementKind::AlterTable);
        assert_eq!(err, SchemaError::NotFound(Entity::Table("Missing".into())));
        Ok(())
    }

    #[test]
    fn test_drop_key_column_rejected() -> Result<()> {
        let mut db = Database::new();
        db.apply(&parent())?;
        let before = db.clone();
        let (_, err) = schema_err(
            db.apply(&Statement::alter("Parent", Alteration::DropColumn("id".into())))
                .unwrap_err(),
        );
        assert!(matches!(err, SchemaError::UnsupportedAlteration(_)));
        assert_eq!(db, before);
        Ok(())
    }

    #[test]
    fn test_set_on_delete() -> Result<()> {
        let mut db = Database::new();
        db.apply_all(&[parent(), child("Child")])?;

        let (_, err) = schema_err(
            db.apply(&Statement::alter("Parent", Alteration::SetOnDelete(OnDelete::Cascade)))
                .unwrap_err(),
        );
        assert!(matches!(err, SchemaError::InvalidInterleaveState(_)));

        db.apply(&Statement::alter("Child", Alteration::SetOnDelete(OnDelete::NoAction)))?;
        let interleave = db.table("Child").and_then(|t| t.interleave.clone()).unwrap();
        assert_eq!(interleave.on_delete, OnDelete::NoAction);
        Ok(())
    }

    #[test]
    fn test_constraints() -> Result<()> {
        let mut db = Database::new();
        db.apply_all(&[parent(), child("Child")])?;
        let fk = TableConstraint {
            name: Some("FK_Parent".into()),
            kind: ConstraintKind::ForeignKey {
                columns: vec!["id".into()],
                ref_table: "Parent".into(),
                ref_columns: vec!["id".into()],
            },
        };
        db.apply(&Statement::alter("Child", Alteration::AddConstraint(fk.clone())))?;
        let (_, err) = schema_err(
            db.apply(&Statement::alter("Child", Alteration::AddConstraint(fk)))
                .unwrap_err(),
        );
        assert!(matches!(err, SchemaError::DuplicateName(Entity::Constraint { .. })));

        let dangling = TableConstraint {
            name: None,
            kind: ConstraintKind::ForeignKey {
                columns: vec!["id".into()],
                ref_table: "Nowhere".into(),
                ref_columns: vec!["id".into()],
            },
        };
        let (_, err) = schema_err(
            db.apply(&Statement::alter("Child", Alteration::AddConstraint(dangling)))
                .unwrap_err(),
        );
        assert_eq!(err, SchemaError::NotFound(Entity::Table("Nowhere".into())));

        db.apply(&Statement::alter("Child", Alteration::DropConstraint("FK_Parent".into())))?;
        assert!(db.table("Child").unwrap().constraints.is_empty());
        Ok(())
    }

    #[test]
    fn test_indexes() -> Result<()> {
        let mut db = Database::new();
        db.apply(&parent())?;

        let index = CreateIndex::new("ParentByName", "Parent", [KeyPart::asc("name")]).unique();
        db.apply(&index.clone().into())?;
        let (kind, err) = schema_err(db.apply(&index.into()).unwrap_err());
        assert_eq!(kind, StatementKind::CreateIndex);
        assert_eq!(err, SchemaError::DuplicateName(Entity::Index("ParentByName".into())));

        let (_, err) = schema_err(
            db.apply(&CreateIndex::new("Orphan", "Missing", [KeyPart::asc("x")]).into())
                .unwrap_err(),
        );
        assert_eq!(err, SchemaError::NotFound(Entity::Table("Missing".into())));

        let (_, err) = schema_err(
            db.apply(&Statement::alter("Parent", Alteration::DropColumn("name".into())))
                .unwrap_err(),
        );
        assert!(matches!(err, SchemaError::UnsupportedAlteration(_)));

        db.apply(&Statement::DropIndex("ParentByName".into()))?;
        let (kind, err) =
            schema_err(db.apply(&Statement::DropIndex("ParentByName".into())).unwrap_err());
        assert_eq!(kind, StatementKind::DropIndex);
        assert_eq!(err, SchemaError::NotFound(Entity::Index("ParentByName".into())));
        Ok(())
    }

    #[test]
    fn test_graph_queries() -> Result<()> {
        let mut db = Database::new();
        let grandchild = CreateTable::new("GrandChild")
            .column(int64("id"))
            .column(int64("child_id"))
            .column(int64("grand_child_id"))
            .primary_key([
                KeyPart::asc("id"),
                KeyPart::asc("child_id"),
                KeyPart::asc("grand_child_id"),
            ])
            .interleave_in("Child", OnDelete::Cascade);
        db.apply_all(&[parent(), child("Child"), grandchild.into(), child("Sibling")])?;

        let names = |tables: Vec<&super::Table>| -> Vec<String> {
            tables.into_iter().map(|t| t.name.clone()).collect()
        };
        assert_eq!(names(db.descendants("Parent")), vec!["Child", "GrandChild", "Sibling"]);
        assert_eq!(names(db.ancestors("GrandChild")), vec!["Child", "Parent"]);
        assert_eq!(db.parent("Child").map(|t| t.name.as_str()), Some("Parent"));
        assert!(db.parent("Parent").is_none());

        let parent_id = db.table_id("Parent").unwrap();
        let child_ids = db.children_ids(parent_id);
        assert_eq!(child_ids.len(), 2);
        assert_eq!(db.table_at(child_ids[1]).name, "Sibling");
        Ok(())
    }

    #[test]
    fn test_soft_delete_column() -> Result<()> {
        let mut db = Database::new();
        db.apply(&parent())?;
        assert!(db.table("Parent").unwrap().soft_delete_column("delete_time").is_none());

        db.apply(&Statement::alter(
            "Parent",
            Alteration::AddColumn(ColumnDef::new(
                "delete_time",
                ColumnType::scalar(BaseType::Timestamp),
            )),
        ))?;
        assert!(db.table("Parent").unwrap().soft_delete_column("delete_time").is_some());

        db.apply(&Statement::alter(
            "Parent",
            Alteration::AlterColumn {
                name: "delete_time".into(),
                alteration: ColumnAlteration::SetType {
                    column_type: ColumnType::scalar(BaseType::Timestamp),
                    not_null: true,
                },
            },
        ))?;
        assert!(db.table("Parent").unwrap().soft_delete_column("delete_time").is_none());
        Ok(())
    }
}
