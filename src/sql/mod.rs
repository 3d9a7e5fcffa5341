//! SQL processing module
//!
//! This module provides:
//! - `ddl` and `schema`: table definitions and the schema they build
//! - `types`, `key`, `mutation`: values, rows, keys and writes
//! - `ast` and `filter`: read statements and the filter transpiler
//! - `plan`: read planning and row assembly
//! - `executor` and `engine`: statement execution and read transactions

pub mod ast;
pub mod ddl;
pub mod engine;
pub mod executor;
pub mod filter;
pub mod key;
pub mod mutation;
pub mod plan;
pub mod schema;
pub mod types;
