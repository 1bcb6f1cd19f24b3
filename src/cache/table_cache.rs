//! Table cache for open table reader handles.
//!
//! Keyed by table path rather than bare file number: in a multi-locality-group
//! database the same file number exists under several subdirectories.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::sstable::TableReader;
use crate::util::filename::table_file_path;
use crate::Result;

use super::lru::LruCache;

/// Cached table reader wrapped for sharing.
#[derive(Clone)]
pub struct CachedTable {
    /// The table reader.
    reader: Arc<Mutex<TableReader>>,
}

impl CachedTable {
    fn new(reader: TableReader) -> Self {
        Self {
            reader: Arc::new(Mutex::new(reader)),
        }
    }

    /// Access the reader with a closure.
    pub fn with_reader<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut TableReader) -> R,
    {
        let mut reader = self.reader.lock();
        f(&mut reader)
    }
}

/// Cache of open table reader handles.
///
/// Avoids the overhead of repeatedly opening table files. The repair keeps
/// this small since every table is opened exactly once.
pub struct TableCache {
    /// The LRU cache of table readers, keyed by file path.
    cache: LruCache<PathBuf, CachedTable>,
}

impl TableCache {
    /// Create a new table cache holding at most `capacity` open tables.
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: LruCache::new(capacity),
        }
    }

    /// Get or open the reader for table `file_number` under `dir`.
    pub fn get(&self, dir: &Path, file_number: u64) -> Result<CachedTable> {
        let table_path = table_file_path(dir, file_number);

        if let Some(cached) = self.cache.get(&table_path) {
            return Ok(cached);
        }

        let reader = TableReader::open(&table_path, file_number)?;
        let cached = CachedTable::new(reader);
        self.cache.insert(table_path, cached.clone());

        Ok(cached)
    }

    /// Evict a table from the cache.
    pub fn evict(&self, dir: &Path, file_number: u64) {
        self.cache.remove(&table_file_path(dir, file_number));
    }

    /// Get the number of cached tables.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::{CompressionType, TableBuilder};
    use tempfile::tempdir;

    fn create_test_table(dir: &Path, file_number: u64) {
        let path = table_file_path(dir, file_number);
        let mut builder =
            TableBuilder::new(&path, file_number, CompressionType::None, 10, 4096).unwrap();
        builder.add(b"key1", b"value1").unwrap();
        builder.add(b"key2", b"value2").unwrap();
        builder.finish().unwrap();
    }

    #[test]
    fn test_table_cache_get_and_reuse() {
        let dir = tempdir().unwrap();
        create_test_table(dir.path(), 1);

        let cache = TableCache::new(10);

        let table = cache.get(dir.path(), 1).unwrap();
        let value = table.with_reader(|reader| reader.get(b"key1").unwrap());
        assert_eq!(value.as_deref(), Some(b"value1".as_slice()));

        // Second access is served from the cache.
        let _again = cache.get(dir.path(), 1).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_table_cache_distinguishes_directories() {
        let dir = tempdir().unwrap();
        let lg0 = dir.path().join("0");
        let lg1 = dir.path().join("1");
        std::fs::create_dir_all(&lg0).unwrap();
        std::fs::create_dir_all(&lg1).unwrap();
        create_test_table(&lg0, 1);
        create_test_table(&lg1, 1);

        let cache = TableCache::new(10);
        cache.get(&lg0, 1).unwrap();
        cache.get(&lg1, 1).unwrap();

        // Same file number, different locality groups, two entries.
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_table_cache_missing_file() {
        let dir = tempdir().unwrap();
        let cache = TableCache::new(10);

        assert!(cache.get(dir.path(), 99).is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_table_cache_evict() {
        let dir = tempdir().unwrap();
        create_test_table(dir.path(), 1);

        let cache = TableCache::new(10);
        cache.get(dir.path(), 1).unwrap();
        assert_eq!(cache.len(), 1);

        cache.evict(dir.path(), 1);
        assert!(cache.is_empty());
    }
}
