//! Byte-level key/value storage and the key encoding rows are stored under.

pub mod engine;
pub mod keycode;
pub mod memory;
