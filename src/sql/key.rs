use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::sql::{
    ast::{Expr, Order, Params},
    schema::Table,
    types::{Row, Value},
};

/// Primary key of a row: the values of its key columns, in key order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key(Vec<Value>);

impl Key {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Reads the key columns out of a row; absent columns count as NULL
    pub fn from_row(table: &Table, row: &Row) -> Self {
        Self(
            table
                .primary_key
                .iter()
                .map(|part| row.get(&part.column).cloned().unwrap_or(Value::Null))
                .collect(),
        )
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn prefix(&self, len: usize) -> Key {
        Key(self.0[..len.min(self.0.len())].to_vec())
    }

    /// The leading part of this key that identifies the row's parent
    pub fn parent_key(&self, parent: &Table) -> Key {
        self.prefix(parent.primary_key.len())
    }

    pub fn starts_with(&self, prefix: &Key) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Equality predicate on the key columns. Values are bound as
    /// `<prefix>_<i>` params; NULL parts become `IS NULL`.
    pub fn bool_expr(&self, table: &Table, params: &mut Params, prefix: &str) -> Expr {
        let parts = table
            .primary_key
            .iter()
            .zip(&self.0)
            .enumerate()
            .map(|(i, (part, value))| {
                let column = Expr::ident(&part.column);
                if value.is_null() {
                    return Expr::is_null(column);
                }
                let name = format!("{}_{}", prefix, i);
                params.insert(name.clone(), value.clone());
                Expr::equals(column, Expr::param(name))
            });
        Expr::conjunction(parts).paren()
    }

    /// Default ordering of a table: its primary key, with declared directions
    pub fn order(table: &Table) -> Vec<Order> {
        table
            .primary_key
            .iter()
            .map(|part| Order {
                expr: Expr::ident(&part.column),
                desc: part.desc,
            })
            .collect()
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, ")")
    }
}

impl From<Vec<Value>> for Key {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

/// A key that is only meaningful up to its first invalid part.
///
/// The first part is always valid; `valid[i]` flags part `i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPrefix {
    values: Vec<Value>,
    valid: Vec<bool>,
}

impl KeyPrefix {
    pub fn new(table: &Table, mut values: Vec<Value>, mut valid: Vec<bool>) -> Self {
        values.truncate(table.primary_key.len());
        valid.resize(values.len(), false);
        if let Some(first) = valid.first_mut() {
            *first = true;
        }
        Self { values, valid }
    }

    pub fn key(&self) -> Key {
        let len = self.valid.iter().position(|v| !v).unwrap_or(self.values.len());
        Key(self.values[..len].to_vec())
    }
}

/// Rows to read from a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeySet {
    Single(Key),
    List(Vec<Key>),
    /// Every row whose key starts with the given key
    Prefix(Key),
    Union(Vec<KeySet>),
}

impl KeySet {
    /// Every row of the table
    pub fn all() -> Self {
        KeySet::Prefix(Key::default())
    }

    pub fn prefixes(keys: impl IntoIterator<Item = Key>) -> Self {
        KeySet::Union(keys.into_iter().map(KeySet::Prefix).collect())
    }

    /// True when the set provably matches no rows
    pub fn is_empty(&self) -> bool {
        match self {
            KeySet::Single(_) | KeySet::Prefix(_) => false,
            KeySet::List(keys) => keys.is_empty(),
            KeySet::Union(sets) => sets.iter().all(KeySet::is_empty),
        }
    }

    pub fn contains(&self, key: &Key) -> bool {
        match self {
            KeySet::Single(k) => k == key,
            KeySet::List(keys) => keys.contains(key),
            KeySet::Prefix(prefix) => key.starts_with(prefix),
            KeySet::Union(sets) => sets.iter().any(|s| s.contains(key)),
        }
    }
}

impl From<Key> for KeySet {
    fn from(key: Key) -> Self {
        KeySet::Single(key)
    }
}

impl From<KeyPrefix> for KeySet {
    fn from(prefix: KeyPrefix) -> Self {
        KeySet::Prefix(prefix.key())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{Key, KeyPrefix, KeySet};
    use crate::sql::{
        ast::Params,
        ddl::{ColumnDef, CreateTable, KeyPart},
        schema::Database,
        types::{BaseType, ColumnType, Row, Value},
    };

    fn table() -> Database {
        let mut db = Database::new();
        let stmt = CreateTable::new("Child")
            .column(ColumnDef::new("id", ColumnType::scalar(BaseType::Int64)).not_null())
            .column(ColumnDef::new("name", ColumnType::scalar(BaseType::String)))
            .column(ColumnDef::new("child_id", ColumnType::scalar(BaseType::String)))
            .primary_key([KeyPart::asc("id"), KeyPart::desc("child_id")]);
        db.apply(&stmt.into()).unwrap();
        db
    }

    #[test]
    fn test_from_row_ignores_other_columns() {
        let db = table();
        let t = db.table("Child").unwrap();
        let a = Row::new().with("child_id", "x").with("id", 1).with("name", "a");
        let b = Row::new().with("id", 1).with("name", "b").with("child_id", "x");
        assert_eq!(Key::from_row(t, &a), Key::from_row(t, &b));
        assert_eq!(Key::from_row(t, &a).to_string(), "(1, \"x\")");

        let mut map = HashMap::new();
        map.insert(Key::from_row(t, &a), "a");
        assert_eq!(map.get(&Key::from_row(t, &b)), Some(&"a"));

        let partial = Row::new().with("id", 2);
        assert_eq!(Key::from_row(t, &partial), Key::new(vec![Value::Int64(2), Value::Null]));
    }

    #[test]
    fn test_bool_expr() {
        let db = table();
        let t = db.table("Child").unwrap();
        let mut params = Params::new();
        let expr = Key::new(vec![Value::Int64(1), Value::Null]).bool_expr(t, &mut params, "__key_0");
        assert_eq!(expr.to_string(), "(id = @__key_0_0 AND child_id IS NULL)");
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("__key_0_0"), Some(&Value::Int64(1)));

        let order: Vec<String> = Key::order(t).iter().map(|o| o.to_string()).collect();
        assert_eq!(order, vec!["id", "child_id DESC"]);
    }

    #[test]
    fn test_key_prefix() {
        let db = table();
        let t = db.table("Child").unwrap();
        let prefix = KeyPrefix::new(t, vec![Value::Int64(1), "x".into(), Value::Int64(9)], vec![
            true, false,
        ]);
        assert_eq!(prefix.key(), Key::new(vec![Value::Int64(1)]));

        let full = KeyPrefix::new(t, vec![Value::Int64(1), "x".into()], vec![false, true]);
        assert_eq!(full.key(), Key::new(vec![Value::Int64(1), "x".into()]));
    }

    #[test]
    fn test_key_set() {
        let parent = Key::new(vec![Value::Int64(1)]);
        let child = Key::new(vec![Value::Int64(1), "x".into()]);
        assert!(KeySet::List(vec![]).is_empty());
        assert!(KeySet::prefixes(vec![]).is_empty());
        assert!(!KeySet::prefixes(vec![parent.clone()]).is_empty());
        assert!(!KeySet::all().is_empty());

        assert!(KeySet::Prefix(parent.clone()).contains(&child));
        assert!(KeySet::all().contains(&child));
        assert!(!KeySet::Single(parent.clone()).contains(&child));
        assert!(
            KeySet::Union(vec![KeySet::List(vec![]), KeySet::Single(child.clone())]).contains(&child)
        );
        assert_eq!(child.prefix(1), parent);
        assert!(child.starts_with(&parent));
    }
}
