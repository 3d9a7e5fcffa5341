use std::{
    collections::{BTreeMap, btree_map},
    ops::Bound,
};

use crate::{
    error::Result,
    storage::engine::{Engine, WriteBatch, prefix_end},
};

/// In-memory storage engine over a B-tree
#[derive(Debug, Default)]
pub struct MemoryEngine {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Engine for MemoryEngine {
    type ScanIterator<'a> = MemoryScan<'a>;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.data.get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Self::ScanIterator<'_> {
        MemoryScan {
            inner: self.data.range((Bound::Included(prefix.to_vec()), prefix_end(prefix))),
        }
    }

    fn write(&mut self, batch: WriteBatch) -> Result<()> {
        for (key, value) in batch {
            match value {
                Some(value) => self.data.insert(key, value),
                None => self.data.remove(&key),
            };
        }
        Ok(())
    }
}

/// Prefix scan over a [`MemoryEngine`]
pub struct MemoryScan<'a> {
    inner: btree_map::Range<'a, Vec<u8>, Vec<u8>>,
}

impl Iterator for MemoryScan<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, v)| Ok((k.clone(), v.clone())))
    }
}
