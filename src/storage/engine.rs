use std::{
    collections::{BTreeMap, btree_map},
    ops::Bound,
};

use crate::error::Result;

/// Byte-level ordered key/value store
///
/// Different from sql::engine::Backend which operates on tables. Reads take
/// `&self` so concurrent readers can share the engine; writes go through a
/// [`WriteBatch`] that is applied as a whole.
pub trait Engine: Send + Sync {
    type ScanIterator<'a>: Iterator<Item = Result<(Vec<u8>, Vec<u8>)>>
    where
        Self: 'a;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Every entry whose key starts with `prefix`, in key order
    fn scan_prefix(&self, prefix: &[u8]) -> Self::ScanIterator<'_>;

    fn write(&mut self, batch: WriteBatch) -> Result<()>;
}

/// Exclusive upper bound of a prefix scan: the prefix with trailing `0xff`
/// bytes dropped and the last remaining byte incremented, e.g. `[1, 2, 0xff]`
/// ends before `[1, 3]`. A prefix of only `0xff` bytes has no upper bound.
pub fn prefix_end(prefix: &[u8]) -> Bound<Vec<u8>> {
    let mut end = prefix.to_vec();
    while end.last() == Some(&0xff) {
        end.pop();
    }
    match end.pop() {
        Some(last) => {
            end.push(last + 1);
            Bound::Excluded(end)
        }
        None => Bound::Unbounded,
    }
}

/// Staged puts and deletes, last write per key wins
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.insert(key, None);
    }

    /// The staged state of `key`: `Some(None)` when it is staged for deletion
    pub fn get(&self, key: &[u8]) -> Option<Option<&[u8]>> {
        self.ops.get(key).map(Option::as_deref)
    }

    /// Staged operations under `prefix`, in key order
    pub fn scan_prefix(&self, prefix: &[u8]) -> btree_map::Range<'_, Vec<u8>, Option<Vec<u8>>> {
        self.ops.range((Bound::Included(prefix.to_vec()), prefix_end(prefix)))
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl IntoIterator for WriteBatch {
    type Item = (Vec<u8>, Option<Vec<u8>>);
    type IntoIter = btree_map::IntoIter<Vec<u8>, Option<Vec<u8>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use std::ops::Bound;

    use super::{Engine, WriteBatch, prefix_end};
    use crate::{error::Result, storage::memory::MemoryEngine};

    fn keys(eng: &impl Engine, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        eng.scan_prefix(prefix).map(|r| r.map(|(k, _)| k)).collect()
    }

    #[test]
    fn test_prefix_end() {
        assert_eq!(prefix_end(b"ca"), Bound::Excluded(b"cb".to_vec()));
        assert_eq!(prefix_end(&[1, 2, 0xff]), Bound::Excluded(vec![1, 3]));
        assert_eq!(prefix_end(&[0xff, 0xff]), Bound::Unbounded);
        assert_eq!(prefix_end(&[]), Bound::Unbounded);
    }

    #[test]
    fn test_write_batch() -> Result<()> {
        let mut eng = MemoryEngine::new();
        assert!(eng.is_empty());
        assert_eq!(eng.get(b"aa")?, None);

        let mut batch = WriteBatch::new();
        batch.put(b"aa".to_vec(), vec![1, 2, 3, 4]);
        batch.put(b"bb".to_vec(), vec![5]);
        batch.put(b"aa".to_vec(), vec![5, 6, 7, 8]);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.get(b"aa"), Some(Some(&[5, 6, 7, 8][..])));
        eng.write(batch)?;
        assert_eq!(eng.get(b"aa")?, Some(vec![5, 6, 7, 8]));

        let mut batch = WriteBatch::new();
        batch.delete(b"aa".to_vec());
        assert_eq!(batch.get(b"aa"), Some(None));
        assert_eq!(batch.get(b"bb"), None);
        eng.write(batch)?;
        assert_eq!(eng.get(b"aa")?, None);
        assert_eq!(eng.get(b"bb")?, Some(vec![5]));
        assert_eq!(eng.len(), 1);
        Ok(())
    }

    #[test]
    fn test_scan_prefix() -> Result<()> {
        let mut eng = MemoryEngine::new();
        let mut batch = WriteBatch::new();
        for key in [&b"ccnaes"[..], b"camhue", b"deeae", b"canehe", b"aanehe"] {
            batch.put(key.to_vec(), b"value".to_vec());
        }
        batch.put(vec![0x01, 0xff], vec![]);
        batch.put(vec![0x01, 0xff, 0x00], vec![]);
        batch.put(vec![0x02], vec![]);
        batch.put(vec![0xff, 0xff, 0x10], vec![]);
        let staged: Vec<&Vec<u8>> = batch.scan_prefix(b"ca").map(|(k, _)| k).collect();
        assert_eq!(staged, vec![&b"camhue".to_vec(), &b"canehe".to_vec()]);
        eng.write(batch)?;

        assert_eq!(keys(&eng, b"ca")?, vec![b"camhue".to_vec(), b"canehe".to_vec()]);
        assert_eq!(keys(&eng, &[0x01, 0xff])?, vec![vec![0x01, 0xff], vec![0x01, 0xff, 0x00]]);
        assert_eq!(keys(&eng, &[0xff, 0xff])?, vec![vec![0xff, 0xff, 0x10]]);
        assert_eq!(keys(&eng, b"")?.len(), 9);
        assert!(keys(&eng, b"x")?.is_empty());
        Ok(())
    }
}
