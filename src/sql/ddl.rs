//! Already-parsed schema statements.
//!
//! Raw DDL text is parsed upstream; these types are what the schema model consumes.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::sql::types::ColumnType;

/// One part of a primary or index key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPart {
    pub column: String,
    pub desc: bool,
}

impl KeyPart {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            desc: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            desc: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OnDelete {
    Cascade,
    #[default]
    NoAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interleave {
    pub parent: String,
    pub on_delete: OnDelete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowDeletionPolicy {
    pub column: String,
    pub num_days: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnOptions {
    pub allow_commit_timestamp: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub not_null: bool,
    pub options: ColumnOptions,
    /// Source column of a generated TOKENLIST column
    pub tokenlist_of: Option<String>,
    pub hidden: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            not_null: false,
            options: ColumnOptions::default(),
            tokenlist_of: None,
            hidden: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn allow_commit_timestamp(mut self) -> Self {
        self.options.allow_commit_timestamp = Some(true);
        self
    }

    pub fn tokens_of(mut self, column: impl Into<String>) -> Self {
        self.tokenlist_of = Some(column.into());
        self.hidden = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintKind {
    ForeignKey {
        columns: Vec<String>,
        ref_table: String,
        ref_columns: Vec<String>,
    },
    Check(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConstraint {
    pub name: Option<String>,
    pub kind: ConstraintKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTable {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<KeyPart>,
    pub interleave: Option<Interleave>,
    pub row_deletion_policy: Option<RowDeletionPolicy>,
    pub constraints: Vec<TableConstraint>,
}

impl CreateTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            interleave: None,
            row_deletion_policy: None,
            constraints: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn primary_key(mut self, parts: impl IntoIterator<Item = KeyPart>) -> Self {
        self.primary_key = parts.into_iter().collect();
        self
    }

    pub fn interleave_in(mut self, parent: impl Into<String>, on_delete: OnDelete) -> Self {
        self.interleave = Some(Interleave {
            parent: parent.into(),
            on_delete,
        });
        self
    }

    pub fn row_deletion_policy(mut self, column: impl Into<String>, num_days: i64) -> Self {
        self.row_deletion_policy = Some(RowDeletionPolicy {
            column: column.into(),
            num_days,
        });
        self
    }

    pub fn constraint(mut self, constraint: TableConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnAlteration {
    /// Replaces both the type and the nullability
    SetType { column_type: ColumnType, not_null: bool },
    SetOptions(ColumnOptions),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Alteration {
    AddColumn(ColumnDef),
    AlterColumn {
        name: String,
        alteration: ColumnAlteration,
    },
    DropColumn(String),
    SetOnDelete(OnDelete),
    AddConstraint(TableConstraint),
    DropConstraint(String),
    AddRowDeletionPolicy(RowDeletionPolicy),
    ReplaceRowDeletionPolicy(RowDeletionPolicy),
    DropRowDeletionPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlterTable {
    pub name: String,
    pub alteration: Alteration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateIndex {
    pub name: String,
    pub table: String,
    pub columns: Vec<KeyPart>,
    pub unique: bool,
    pub null_filtered: bool,
    pub storing: Vec<String>,
    pub interleave: Option<String>,
}

impl CreateIndex {
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        columns: impl IntoIterator<Item = KeyPart>,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns: columns.into_iter().collect(),
            unique: false,
            null_filtered: false,
            storing: Vec::new(),
            interleave: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn null_filtered(mut self) -> Self {
        self.null_filtered = true;
        self
    }

    pub fn storing(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.storing = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn interleave_in(mut self, table: impl Into<String>) -> Self {
        self.interleave = Some(table.into());
        self
    }
}

/// A parsed schema statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statement {
    CreateTable(CreateTable),
    AlterTable(AlterTable),
    DropTable(String),
    CreateIndex(CreateIndex),
    DropIndex(String),
}

impl Statement {
    pub fn kind(&self) -> StatementKind {
        match self {
            Statement::CreateTable(_) => StatementKind::CreateTable,
            Statement::AlterTable(_) => StatementKind::AlterTable,
            Statement::DropTable(_) => StatementKind::DropTable,
            Statement::CreateIndex(_) => StatementKind::CreateIndex,
            Statement::DropIndex(_) => StatementKind::DropIndex,
        }
    }

    pub fn alter(table: impl Into<String>, alteration: Alteration) -> Self {
        Statement::AlterTable(AlterTable {
            name: table.into(),
            alteration,
        })
    }
}

impl From<CreateTable> for Statement {
    fn from(value: CreateTable) -> Self {
        Statement::CreateTable(value)
    }
}

impl From<CreateIndex> for Statement {
    fn from(value: CreateIndex) -> Self {
        Statement::CreateIndex(value)
    }
}

/// Statement kind, used as context on schema errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatementKind {
    CreateTable,
    AlterTable,
    DropTable,
    CreateIndex,
    DropIndex,
}

impl Display for StatementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StatementKind::CreateTable => "CREATE TABLE",
            StatementKind::AlterTable => "ALTER TABLE",
            StatementKind::DropTable => "DROP TABLE",
            StatementKind::CreateIndex => "CREATE INDEX",
            StatementKind::DropIndex => "DROP INDEX",
        };
        write!(f, "{}", s)
    }
}
