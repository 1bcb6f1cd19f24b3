//! Table iterator for full scans.
//!
//! Two-level iteration: the index block yields data-block handles, and data
//! blocks are loaded one at a time. The repair walks every surviving table
//! first-to-last through this iterator to recover its key range and maximum
//! sequence number.

use bytes::Bytes;

use crate::Result;

use super::block::BlockHandle;
use super::reader::TableReader;

/// Iterator over all entries of a table, in key order.
///
/// I/O and decode errors surface as `Err` from [`TableIterator::seek_to_first`]
/// and [`TableIterator::next`]; the iterator is invalid afterwards.
pub struct TableIterator<'a> {
    /// Reader for loading data blocks.
    reader: &'a mut TableReader,
    /// Data-block handles decoded from the index block.
    handles: Vec<BlockHandle>,
    /// Index of the next block to load.
    next_block: usize,
    /// Entries of the current data block.
    entries: std::vec::IntoIter<(Bytes, Bytes)>,
    /// Current entry.
    current: Option<(Bytes, Bytes)>,
}

impl<'a> TableIterator<'a> {
    /// Create an iterator over the given table.
    pub fn new(reader: &'a mut TableReader) -> Result<Self> {
        let index_block = reader.index_block().clone();

        let mut handles = Vec::new();
        for (_, handle_data) in index_block.iter() {
            let mut cursor = handle_data.as_ref();
            handles.push(BlockHandle::decode(&mut cursor)?);
        }

        Ok(Self {
            reader,
            handles,
            next_block: 0,
            entries: Vec::new().into_iter(),
            current: None,
        })
    }

    /// Check if the iterator is positioned at an entry.
    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    /// Get the current key.
    pub fn key(&self) -> Option<&Bytes> {
        self.current.as_ref().map(|(k, _)| k)
    }

    /// Get the current value.
    pub fn value(&self) -> Option<&Bytes> {
        self.current.as_ref().map(|(_, v)| v)
    }

    /// Position at the first entry of the table.
    pub fn seek_to_first(&mut self) -> Result<()> {
        self.next_block = 0;
        self.entries = Vec::new().into_iter();
        self.current = None;
        self.load_until_entry()
    }

    /// Advance to the next entry.
    pub fn next(&mut self) -> Result<()> {
        self.current = self.entries.next();
        if self.current.is_none() {
            self.load_until_entry()?;
        }
        Ok(())
    }

    /// Load data blocks until one yields an entry, or the table ends.
    fn load_until_entry(&mut self) -> Result<()> {
        while self.current.is_none() && self.next_block < self.handles.len() {
            let handle = self.handles[self.next_block];
            self.next_block += 1;

            let block = self.reader.read_block(&handle)?;
            self.entries = block.iter().collect::<Vec<_>>().into_iter();
            self.current = self.entries.next();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::{CompressionType, TableBuilder};
    use tempfile::tempdir;

    fn build_test_table(path: &std::path::Path, count: usize, block_size: usize) {
        let mut builder =
            TableBuilder::new(path, 1, CompressionType::None, 10, block_size).unwrap();
        for i in 0..count {
            let key = format!("key_{:04}", i);
            let value = format!("value_{}", i);
            builder.add(key.as_bytes(), value.as_bytes()).unwrap();
        }
        builder.finish().unwrap();
    }

    #[test]
    fn test_iterator_empty_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sst");
        build_test_table(&path, 0, 4096);

        let mut reader = TableReader::open(&path, 1).unwrap();
        let mut iter = TableIterator::new(&mut reader).unwrap();
        iter.seek_to_first().unwrap();
        assert!(!iter.valid());
    }

    #[test]
    fn test_iterator_full_scan() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sst");
        build_test_table(&path, 100, 4096);

        let mut reader = TableReader::open(&path, 1).unwrap();
        let mut iter = TableIterator::new(&mut reader).unwrap();
        iter.seek_to_first().unwrap();

        let mut count = 0;
        let mut last_key: Option<Vec<u8>> = None;
        while iter.valid() {
            let key = iter.key().unwrap().to_vec();
            if let Some(prev) = &last_key {
                assert!(prev < &key, "scan must be ordered");
            }
            last_key = Some(key);
            count += 1;
            iter.next().unwrap();
        }

        assert_eq!(count, 100);
    }

    #[test]
    fn test_iterator_spans_blocks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sst");
        // Small blocks so the scan crosses many block boundaries.
        build_test_table(&path, 200, 256);

        let mut reader = TableReader::open(&path, 1).unwrap();
        let mut iter = TableIterator::new(&mut reader).unwrap();
        iter.seek_to_first().unwrap();

        let mut count = 0;
        while iter.valid() {
            count += 1;
            iter.next().unwrap();
        }
        assert_eq!(count, 200);
    }
}
