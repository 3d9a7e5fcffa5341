//! InterleaveDB - reads over interleaved table hierarchies
//!
//! This crate provides:
//! - A DDL model and an in-memory schema of interleaved tables
//! - A transpiler from AIP filter expressions to SQL predicates
//! - Read planning by nested subqueries or by parallel fan-out
//! - Soft-delete aware list, get and batch get reads
//! - A key/value backed execution backend

pub mod config;
pub mod error;
pub mod sql;
pub mod storage;
