use serde::{Deserialize, Serialize};

use super::{key::KeySet, types::Row};

/// A write to one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    /// Fails if a row with the same key exists
    Insert { table: String, row: Row },
    /// Fails unless a row with the same key exists; unset columns keep their value
    Update { table: String, row: Row },
    InsertOrUpdate { table: String, row: Row },
    /// Deletes the rows in the key set, cascading to interleaved children
    Delete { table: String, key_set: KeySet },
}

impl Mutation {
    pub fn insert(table: impl Into<String>, row: Row) -> Self {
        Mutation::Insert {
            table: table.into(),
            row,
        }
    }

    pub fn update(table: impl Into<String>, row: Row) -> Self {
        Mutation::Update {
            table: table.into(),
            row,
        }
    }

    pub fn insert_or_update(table: impl Into<String>, row: Row) -> Self {
        Mutation::InsertOrUpdate {
            table: table.into(),
            row,
        }
    }

    pub fn delete(table: impl Into<String>, key_set: impl Into<KeySet>) -> Self {
        Mutation::Delete {
            table: table.into(),
            key_set: key_set.into(),
        }
    }

    pub fn table(&self) -> &str {
        match self {
            Mutation::Insert { table, .. }
            | Mutation::Update { table, .. }
            | Mutation::InsertOrUpdate { table, .. }
            | Mutation::Delete { table, .. } => table,
        }
    }
}
