use std::{array::TryFromSliceError, fmt::Display, string::FromUtf8Error, sync::PoisonError};

use bincode::ErrorKind;

use crate::sql::ddl::StatementKind;

/// Custom Result type for interleavedb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for interleavedb
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// A DDL statement could not be applied to the schema
    #[error("{statement}: {source}")]
    Schema {
        statement: StatementKind,
        #[source]
        source: SchemaError,
    },
    /// Reading through the planner failed
    #[error(transparent)]
    Plan(#[from] PlanError),
    /// A filter expression could not be transpiled
    #[error(transparent)]
    Transpile(#[from] TranspileError),
    /// Internal error (storage, serialization, etc.)
    #[error("internal error {0}")]
    Internal(String),
}

impl Error {
    pub fn schema(statement: StatementKind, source: SchemaError) -> Self {
        Error::Schema { statement, source }
    }

    pub fn backend(msg: impl Display) -> Self {
        Error::Plan(PlanError::BackendFailure(msg.to_string()))
    }

    /// Returns true if this is a `PlanError::NotFound`
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Plan(PlanError::NotFound(_)))
    }
}

/// Schema entity named by a schema error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Table(String),
    Column { table: String, column: String },
    Index(String),
    Constraint { table: String, name: String },
}

impl Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entity::Table(name) => write!(f, "table {}", name),
            Entity::Column { table, column } => write!(f, "column {}.{}", table, column),
            Entity::Index(name) => write!(f, "index {}", name),
            Entity::Constraint { table, name } => write!(f, "constraint {} on table {}", name, table),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("{0} already exists")]
    DuplicateName(Entity),
    #[error("{0} does not exist")]
    NotFound(Entity),
    #[error("unsupported alteration: {0}")]
    UnsupportedAlteration(String),
    #[error("invalid interleave: {0}")]
    InvalidInterleaveState(String),
    #[error("table {table} has interleaved tables {}", .dependents.join(", "))]
    HasDependents {
        table: String,
        dependents: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    #[error("backend failure: {0}")]
    BackendFailure(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// Raised through `panic!`, never returned
    #[error("invalid param: {0}")]
    ParameterCollision(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TranspileError {
    #[error("unsupported expr: {0}")]
    UnsupportedExpression(String),
    #[error("unsupported function call: {0}")]
    UnsupportedFunction(String),
    #[error("unsupported argument to `{0}`: wildcard only supported in leading or trailing positions")]
    InvalidWildcardPosition(String),
    #[error("invalid argument to {function}: {reason}")]
    InvalidSearchArgument { function: String, reason: String },
    #[error("invalid string arg to {function}: {reason}")]
    InvalidTimestampLiteral { function: String, reason: String },
    #[error("not a bool expr: {0}")]
    NotABooleanExpression(String),
}

impl<T> From<PoisonError<T>> for Error {
    fn from(value: PoisonError<T>) -> Self {
        Error::Internal(value.to_string())
    }
}

impl From<Box<ErrorKind>> for Error {
    fn from(value: Box<ErrorKind>) -> Self {
        Error::Internal(value.to_string())
    }
}

impl From<TryFromSliceError> for Error {
    fn from(value: TryFromSliceError) -> Self {
        Error::Internal(value.to_string())
    }
}

impl From<FromUtf8Error> for Error {
    fn from(value: FromUtf8Error) -> Self {
        Error::Internal(value.to_string())
    }
}
