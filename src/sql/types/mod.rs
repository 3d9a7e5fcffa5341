use std::{
    cmp::Ordering,
    fmt::Display,
    hash::{Hash, Hasher},
};

use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Scalar column types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BaseType {
    Bool,
    Int64,
    Float64,
    String,
    Bytes,
    Date,
    Timestamp,
    Numeric,
    Json,
}

impl Display for BaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BaseType::Bool => "BOOL",
            BaseType::Int64 => "INT64",
            BaseType::Float64 => "FLOAT64",
            BaseType::String => "STRING",
            BaseType::Bytes => "BYTES",
            BaseType::Date => "DATE",
            BaseType::Timestamp => "TIMESTAMP",
            BaseType::Numeric => "NUMERIC",
            BaseType::Json => "JSON",
        };
        write!(f, "{}", name)
    }
}

/// Declared length of a STRING or BYTES column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Length {
    Max,
    Fixed(i64),
}

/// Column type: a base type, optionally an array, with an optional length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnType {
    pub base: BaseType,
    pub array: bool,
    pub len: Option<Length>,
}

impl ColumnType {
    pub fn scalar(base: BaseType) -> Self {
        Self {
            base,
            array: false,
            len: None,
        }
    }

    pub fn array(base: BaseType) -> Self {
        Self {
            base,
            array: true,
            len: None,
        }
    }

    pub fn with_len(mut self, len: Length) -> Self {
        self.len = Some(len);
        self
    }

    /// Whether a non-null value can be stored in a column of this type
    pub fn accepts(&self, value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::Array(items) => {
                self.array && items.iter().all(|v| v.is_null() || v.base_type() == Some(self.base))
            }
            v => !self.array && v.base_type() == Some(self.base),
        }
    }
}

impl Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = match self.len {
            Some(Length::Max) => "(MAX)".to_string(),
            Some(Length::Fixed(n)) => format!("({})", n),
            None => String::new(),
        };
        if self.array {
            write!(f, "ARRAY<{}{}>", self.base, len)
        } else {
            write!(f, "{}{}", self.base, len)
        }
    }
}

/// Runtime value for columns, parameters and expression results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    /// Decimal text, kept verbatim
    Numeric(String),
    Json(String),
    Array(Vec<Value>),
    /// A nested row, produced by ARRAY(SELECT AS STRUCT ...)
    Struct(Row),
}

impl Value {
    /// Returns the base type of a scalar value, or None for Null and composites
    pub fn base_type(&self) -> Option<BaseType> {
        match self {
            Self::Bool(_) => Some(BaseType::Bool),
            Self::Int64(_) => Some(BaseType::Int64),
            Self::Float64(_) => Some(BaseType::Float64),
            Self::String(_) => Some(BaseType::String),
            Self::Bytes(_) => Some(BaseType::Bytes),
            Self::Date(_) => Some(BaseType::Date),
            Self::Timestamp(_) => Some(BaseType::Timestamp),
            Self::Numeric(_) => Some(BaseType::Numeric),
            Self::Json(_) => Some(BaseType::Json),
            Self::Null | Self::Array(_) | Self::Struct(_) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(true) => write!(f, "TRUE"),
            Value::Bool(false) => write!(f, "FALSE"),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{:?}", v),
            Value::Bytes(v) => write!(f, "b{:?}", String::from_utf8_lossy(v)),
            Value::Date(v) => write!(f, "DATE {:?}", v.to_string()),
            Value::Timestamp(v) => write!(f, "TIMESTAMP {:?}", v.to_rfc3339()),
            Value::Numeric(v) => write!(f, "NUMERIC {:?}", v),
            Value::Json(v) => write!(f, "JSON {:?}", v),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Struct(row) => write!(f, "{}", row),
        }
    }
}

/// Floats compare by bit pattern so values can be used as hash keys
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Float64(a), Value::Float64(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Numeric(a), Value::Numeric(b)) => a == b,
            (Value::Json(a), Value::Json(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Struct(a), Value::Struct(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::Int64(v) => v.hash(state),
            Value::Float64(v) => v.to_bits().hash(state),
            Value::String(v) | Value::Numeric(v) | Value::Json(v) => v.hash(state),
            Value::Bytes(v) => v.hash(state),
            Value::Date(v) => v.hash(state),
            Value::Timestamp(v) => v.hash(state),
            Value::Array(v) => v.hash(state),
            Value::Struct(v) => v.hash(state),
        }
    }
}

/// Implements partial ordering for Value comparison (used by ORDER BY), nulls first
impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::Int64(a), Value::Int64(b)) => a.partial_cmp(b),
            (Value::Int64(a), Value::Float64(b)) => (*a as f64).partial_cmp(b),
            (Value::Float64(a), Value::Int64(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Float64(a), Value::Float64(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.partial_cmp(b),
            (Value::Date(a), Value::Date(b)) => a.partial_cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.partial_cmp(b),
            (Value::Numeric(a), Value::Numeric(b)) => a.partial_cmp(b),
            (Value::Array(a), Value::Array(b)) => a.partial_cmp(b),
            (_, _) => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int64(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// A row is an ordered mapping from column name to value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row(IndexMap<String, Value>);

impl Row {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// Builder-style insert
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copies out the named columns in order; absent columns become NULL
    pub fn project(&self, columns: &[String]) -> Row {
        columns
            .iter()
            .map(|c| (c.clone(), self.get(c).cloned().unwrap_or(Value::Null)))
            .collect()
    }

    /// Overwrites this row's columns with the ones present in `other`
    pub fn merge(&mut self, other: Row) {
        for (column, value) in other.0 {
            self.0.insert(column, value);
        }
    }
}

impl Hash for Row {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for (column, value) in &self.0 {
            column.hash(state);
            value.hash(state);
        }
    }
}

impl Display for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (column, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", column, value)?;
        }
        write!(f, "}}")
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Row {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{BaseType, ColumnType, Length, Row, Value};

    #[test]
    fn test_column_type_display() {
        assert_eq!(ColumnType::scalar(BaseType::Int64).to_string(), "INT64");
        assert_eq!(
            ColumnType::scalar(BaseType::String).with_len(Length::Max).to_string(),
            "STRING(MAX)"
        );
        assert_eq!(
            ColumnType::array(BaseType::Bytes).with_len(Length::Fixed(16)).to_string(),
            "ARRAY<BYTES(16)>"
        );
    }

    #[test]
    fn test_column_type_accepts() {
        let ints = ColumnType::array(BaseType::Int64);
        assert!(ints.accepts(&Value::Array(vec![Value::Int64(1), Value::Null])));
        assert!(!ints.accepts(&Value::Int64(1)));
        assert!(ColumnType::scalar(BaseType::String).accepts(&Value::Null));
        assert!(!ColumnType::scalar(BaseType::String).accepts(&Value::Bool(true)));
    }

    #[test]
    fn test_value_ordering_nulls_first() {
        assert!(Value::Null < Value::Int64(i64::MIN));
        assert!(Value::Int64(1) < Value::Float64(1.5));
        assert!(Value::String("a".into()) < Value::String("b".into()));
        assert_eq!(Value::Bool(true).partial_cmp(&Value::Int64(1)), None);
    }

    #[test]
    fn test_value_hash_eq() {
        let mut set = HashSet::new();
        set.insert(Value::Float64(0.5));
        set.insert(Value::Float64(0.5));
        set.insert(Value::Null);
        set.insert(Value::String("x".into()));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_row_project_keeps_order() {
        let row = Row::new().with("a", 1).with("b", "x");
        let projected = row.project(&["b".to_string(), "c".to_string(), "a".to_string()]);
        let columns: Vec<_> = projected.columns().collect();
        assert_eq!(columns, vec!["b", "c", "a"]);
        assert_eq!(projected.get("c"), Some(&Value::Null));
    }

    #[test]
    fn test_row_bincode() {
        let row = Row::new()
            .with("id", 7)
            .with("data", Value::Bytes(vec![0, 1, 2]))
            .with("tags", Value::Array(vec!["a".into(), Value::Null]));
        let bytes = bincode::serialize(&row).unwrap();
        let decoded: Row = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, row);
    }
}
