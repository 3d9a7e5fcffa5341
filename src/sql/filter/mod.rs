//! Filter expressions: already-parsed, type-checked boolean expression trees
//! in the AIP-160 shape, and their transpilation to native predicates.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

mod transpiler;

pub use transpiler::{TranspiledFilter, Transpiler, transpile};

pub const FUNCTION_EQUALS: &str = "=";
pub const FUNCTION_NOT_EQUALS: &str = "!=";
pub const FUNCTION_LESS_THAN: &str = "<";
pub const FUNCTION_LESS_EQUALS: &str = "<=";
pub const FUNCTION_GREATER_THAN: &str = ">";
pub const FUNCTION_GREATER_EQUALS: &str = ">=";
pub const FUNCTION_AND: &str = "AND";
pub const FUNCTION_OR: &str = "OR";
pub const FUNCTION_NOT: &str = "NOT";
pub const FUNCTION_HAS: &str = ":";
pub const FUNCTION_TIMESTAMP: &str = "timestamp";

pub type ExprId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Bool(bool),
    Int64(i64),
    Uint64(u64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Ident(String),
    Const(Constant),
    Select { operand: Box<Expr>, field: String },
    Call { function: String, args: Vec<Expr> },
}

/// A node of the filter tree. `id` keys into the type map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub id: ExprId,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumType {
    pub name: String,
    pub values: Vec<(String, i32)>,
}

impl EnumType {
    pub fn new(name: impl Into<String>, values: impl IntoIterator<Item = (&'static str, i32)>) -> Self {
        Self {
            name: name.into(),
            values: values.into_iter().map(|(n, v)| (n.to_string(), v)).collect(),
        }
    }

    pub fn value(&self, name: &str) -> Option<i32> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterType {
    Bool,
    Int64,
    Uint64,
    Double,
    String,
    Bytes,
    Timestamp,
    Duration,
    Enum(EnumType),
    List(Box<FilterType>),
    Message(String),
}

impl FilterType {
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            FilterType::Bool
                | FilterType::Int64
                | FilterType::Uint64
                | FilterType::Double
                | FilterType::String
                | FilterType::Bytes
        )
    }
}

/// Type-checked expression: the tree plus the type of each node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckedExpr {
    pub expr: Expr,
    pub type_map: HashMap<ExprId, FilterType>,
}

/// A parsed filter; `None` when the filter string was empty
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub checked: Option<CheckedExpr>,
}

impl Filter {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Options for the transpiler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranspileOptions {
    /// Bind enum constants by name instead of by number
    pub enum_values_as_strings: bool,
    /// Filter function name that maps to SEARCH_NGRAMS
    pub search_ngrams: Option<String>,
}

impl TranspileOptions {
    pub fn with_enum_values_as_strings(mut self) -> Self {
        self.enum_values_as_strings = true;
        self
    }

    pub fn with_search_ngrams(mut self, function: impl Into<String>) -> Self {
        self.search_ngrams = Some(function.into());
        self
    }
}

/// Assembles a checked filter tree, numbering nodes and recording their types.
#[derive(Debug, Default)]
pub struct FilterBuilder {
    next_id: ExprId,
    type_map: HashMap<ExprId, FilterType>,
}

impl FilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&mut self, kind: ExprKind, typ: Option<FilterType>) -> Expr {
        self.next_id += 1;
        if let Some(typ) = typ {
            self.type_map.insert(self.next_id, typ);
        }
        Expr {
            id: self.next_id,
            kind,
        }
    }

    pub fn ident(&mut self, name: impl Into<String>, typ: FilterType) -> Expr {
        self.node(ExprKind::Ident(name.into()), Some(typ))
    }

    pub fn constant(&mut self, constant: Constant) -> Expr {
        let typ = match &constant {
            Constant::Bool(_) => FilterType::Bool,
            Constant::Int64(_) => FilterType::Int64,
            Constant::Uint64(_) => FilterType::Uint64,
            Constant::Double(_) => FilterType::Double,
            Constant::String(_) => FilterType::String,
            Constant::Bytes(_) => FilterType::Bytes,
        };
        self.node(ExprKind::Const(constant), Some(typ))
    }

    pub fn string(&mut self, value: impl Into<String>) -> Expr {
        self.constant(Constant::String(value.into()))
    }

    pub fn int(&mut self, value: i64) -> Expr {
        self.constant(Constant::Int64(value))
    }

    pub fn double(&mut self, value: f64) -> Expr {
        self.constant(Constant::Double(value))
    }

    pub fn select(&mut self, operand: Expr, field: impl Into<String>, typ: FilterType) -> Expr {
        let kind = ExprKind::Select {
            operand: Box::new(operand),
            field: field.into(),
        };
        self.node(kind, Some(typ))
    }

    /// Function call; `timestamp` yields a timestamp, everything else a bool
    pub fn call(&mut self, function: impl Into<String>, args: Vec<Expr>) -> Expr {
        let function = function.into();
        let typ = if function == FUNCTION_TIMESTAMP {
            FilterType::Timestamp
        } else {
            FilterType::Bool
        };
        self.node(ExprKind::Call { function, args }, Some(typ))
    }

    pub fn build(self, expr: Expr) -> Filter {
        Filter {
            checked: Some(CheckedExpr {
                expr,
                type_map: self.type_map,
            }),
        }
    }
}
