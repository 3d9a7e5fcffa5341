use serde::{Deserialize, Serialize};

use crate::{
    error::{Entity, SchemaError},
    sql::{
        ddl::{
            Alteration, ColumnAlteration, ColumnDef, ColumnOptions, CreateIndex, CreateTable,
            Interleave, KeyPart, RowDeletionPolicy, TableConstraint,
        },
        types::{BaseType, ColumnType},
    },
};

/// Column schema definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub not_null: bool,
    pub options: ColumnOptions,
    pub tokenlist_of: Option<String>,
    pub hidden: bool,
}

impl From<&ColumnDef> for Column {
    fn from(def: &ColumnDef) -> Self {
        Self {
            name: def.name.clone(),
            column_type: def.column_type,
            not_null: def.not_null,
            options: def.options.clone(),
            tokenlist_of: def.tokenlist_of.clone(),
            hidden: def.hidden,
        }
    }
}

impl Column {
    pub fn nullable(&self) -> bool {
        !self.not_null
    }

    /// Nullable scalar TIMESTAMP, the shape of a soft-delete marker
    pub fn is_nullable_timestamp(&self) -> bool {
        self.nullable() && self.column_type == ColumnType::scalar(BaseType::Timestamp)
    }
}

/// Table schema definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key: Vec<KeyPart>,
    pub interleave: Option<Interleave>,
    pub row_deletion_policy: Option<RowDeletionPolicy>,
    pub constraints: Vec<TableConstraint>,
}

impl Table {
    pub(super) fn from_create(stmt: &CreateTable) -> Self {
        Self {
            name: stmt.name.clone(),
            columns: stmt.columns.iter().map(Column::from).collect(),
            primary_key: stmt.primary_key.clone(),
            interleave: stmt.interleave.clone(),
            row_deletion_policy: stmt.row_deletion_policy.clone(),
            constraints: stmt.constraints.clone(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Returns the column index for a given column name
    pub fn get_col_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Primary key columns, in key order
    pub fn key_columns(&self) -> impl Iterator<Item = (&KeyPart, Option<&Column>)> {
        self.primary_key.iter().map(|part| (part, self.column(&part.column)))
    }

    pub fn is_key_column(&self, name: &str) -> bool {
        self.primary_key.iter().any(|part| part.column == name)
    }

    /// The soft-delete marker column, if the table has one under `name`
    pub fn soft_delete_column(&self, name: &str) -> Option<&Column> {
        self.column(name).filter(|c| c.is_nullable_timestamp())
    }

    pub fn parent_name(&self) -> Option<&str> {
        self.interleave.as_ref().map(|i| i.parent.as_str())
    }

    fn column_entity(&self, column: &str) -> Entity {
        Entity::Column {
            table: self.name.clone(),
            column: column.to_string(),
        }
    }

    fn constraint(&self, name: &str) -> Option<usize> {
        self.constraints.iter().position(|c| c.name.as_deref() == Some(name))
    }

    /// Validates table schema
    pub(super) fn validate(&self) -> Result<(), SchemaError> {
        for (i, column) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(SchemaError::DuplicateName(self.column_entity(&column.name)));
            }
            if let Some(source) = &column.tokenlist_of {
                if self.column(source).is_none() {
                    return Err(SchemaError::NotFound(self.column_entity(source)));
                }
            }
        }
        for part in &self.primary_key {
            if self.column(&part.column).is_none() {
                return Err(SchemaError::NotFound(self.column_entity(&part.column)));
            }
        }
        if let Some(policy) = &self.row_deletion_policy {
            if self.column(&policy.column).is_none() {
                return Err(SchemaError::NotFound(self.column_entity(&policy.column)));
            }
        }
        for (i, constraint) in self.constraints.iter().enumerate() {
            let Some(name) = &constraint.name else { continue };
            if self.constraints[..i].iter().any(|c| c.name.as_ref() == Some(name)) {
                return Err(SchemaError::DuplicateName(Entity::Constraint {
                    table: self.name.clone(),
                    name: name.clone(),
                }));
            }
        }
        Ok(())
    }

    /// Applies one ALTER TABLE alteration in place. Callers work on a copy
    /// so that a failed alteration leaves the schema untouched.
    pub(super) fn alter(&mut self, alteration: &Alteration) -> Result<(), SchemaError> {
        match alteration {
            Alteration::AddColumn(def) => {
                if self.column(&def.name).is_some() {
                    return Err(SchemaError::DuplicateName(self.column_entity(&def.name)));
                }
                self.columns.push(Column::from(def));
            }
            Alteration::AlterColumn { name, alteration } => {
                let entity = self.column_entity(name);
                let column = self
                    .columns
                    .iter_mut()
                    .find(|c| &c.name == name)
                    .ok_or(SchemaError::NotFound(entity))?;
                match alteration {
                    ColumnAlteration::SetType {
                        column_type,
                        not_null,
                    } => {
                        column.column_type = *column_type;
                        column.not_null = *not_null;
                    }
                    ColumnAlteration::SetOptions(options) => column.options = options.clone(),
                }
            }
            Alteration::DropColumn(name) => {
                let i = self
                    .get_col_index(name)
                    .ok_or_else(|| SchemaError::NotFound(self.column_entity(name)))?;
                if self.is_key_column(name) {
                    return Err(SchemaError::UnsupportedAlteration(format!(
                        "cannot drop key column {}.{}",
                        self.name, name
                    )));
                }
                if self.row_deletion_policy.as_ref().is_some_and(|p| &p.column == name) {
                    return Err(SchemaError::UnsupportedAlteration(format!(
                        "column {}.{} is used by the row deletion policy",
                        self.name, name
                    )));
                }
                self.columns.remove(i);
            }
            Alteration::SetOnDelete(action) => match &mut self.interleave {
                Some(interleave) => interleave.on_delete = *action,
                None => {
                    return Err(SchemaError::InvalidInterleaveState(format!(
                        "table {} is not interleaved",
                        self.name
                    )));
                }
            },
            Alteration::AddConstraint(constraint) => {
                if let Some(name) = &constraint.name {
                    if self.constraint(name).is_some() {
                        return Err(SchemaError::DuplicateName(Entity::Constraint {
                            table: self.name.clone(),
                            name: name.clone(),
                        }));
                    }
                }
                self.constraints.push(constraint.clone());
            }
            Alteration::DropConstraint(name) => {
                let i = self.constraint(name).ok_or_else(|| {
                    SchemaError::NotFound(Entity::Constraint {
                        table: self.name.clone(),
                        name: name.clone(),
                    })
                })?;
                self.constraints.remove(i);
            }
            Alteration::AddRowDeletionPolicy(policy) => {
                if self.row_deletion_policy.is_some() {
                    return Err(SchemaError::UnsupportedAlteration(format!(
                        "table {} already has a row deletion policy",
                        self.name
                    )));
                }
                self.row_deletion_policy = Some(policy.clone());
            }
            Alteration::ReplaceRowDeletionPolicy(policy) => {
                if self.row_deletion_policy.is_none() {
                    return Err(SchemaError::UnsupportedAlteration(format!(
                        "table {} has no row deletion policy",
                        self.name
                    )));
                }
                self.row_deletion_policy = Some(policy.clone());
            }
            Alteration::DropRowDeletionPolicy => {
                if self.row_deletion_policy.take().is_none() {
                    return Err(SchemaError::UnsupportedAlteration(format!(
                        "table {} has no row deletion policy",
                        self.name
                    )));
                }
            }
        }
        self.validate()
    }
}

/// Secondary index definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub table: String,
    pub columns: Vec<KeyPart>,
    pub unique: bool,
    pub null_filtered: bool,
    pub storing: Vec<String>,
    pub interleave: Option<String>,
}

impl From<&CreateIndex> for Index {
    fn from(stmt: &CreateIndex) -> Self {
        Self {
            name: stmt.name.clone(),
            table: stmt.table.clone(),
            columns: stmt.columns.clone(),
            unique: stmt.unique,
            null_filtered: stmt.null_filtered,
            storing: stmt.storing.clone(),
            interleave: stmt.interleave.clone(),
        }
    }
}

impl Index {
    /// Whether the index reads the column, as a key part or a stored column
    pub fn uses_column(&self, column: &str) -> bool {
        self.columns.iter().any(|p| p.column == column) || self.storing.iter().any(|c| c == column)
    }
}
