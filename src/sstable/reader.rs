//! Table reader for immutable sorted files.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;

use crate::Result;

use super::block::Block;
use super::filter::BloomFilter;
use super::{BlockHandle, Footer, FOOTER_SIZE};

/// Reader for table files.
///
/// Holds the parsed footer, the index block, and the Bloom filter; data
/// blocks are read from the file on demand.
#[derive(Debug)]
pub struct TableReader {
    /// File handle.
    file: File,
    /// File size.
    file_size: u64,
    /// Index block.
    index_block: Arc<Block>,
    /// Bloom filter (if present).
    filter: Option<BloomFilter>,
    /// File number.
    file_number: u64,
}

impl TableReader {
    /// Open a table file for reading.
    pub fn open(path: &Path, file_number: u64) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();

        if file_size < FOOTER_SIZE as u64 {
            return Err(crate::Error::corruption("file too small for footer"));
        }

        let mut footer_buf = vec![0u8; FOOTER_SIZE];
        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        file.read_exact(&mut footer_buf)?;
        let footer = Footer::decode(&footer_buf)?;

        let index_data = Self::read_block_data(&mut file, &footer.index_handle)?;
        let index_block = Arc::new(Block::new_with_trailer(&index_data)?);

        let filter = if footer.filter_handle.size() > 0 {
            let filter_data = Self::read_block_data(&mut file, &footer.filter_handle)?;
            BloomFilter::from_bytes(Bytes::from(filter_data))
        } else {
            None
        };

        Ok(Self {
            file,
            file_size,
            index_block,
            filter,
            file_number,
        })
    }

    /// Read raw block data from the file.
    fn read_block_data(file: &mut File, handle: &BlockHandle) -> Result<Vec<u8>> {
        let mut data = vec![0u8; handle.size() as usize];
        file.seek(SeekFrom::Start(handle.offset()))?;
        file.read_exact(&mut data)?;
        Ok(data)
    }

    /// Get the file number.
    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    /// Get the file size.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Check if a user key might exist, per the Bloom filter.
    pub fn may_contain(&self, user_key: &[u8]) -> bool {
        match &self.filter {
            Some(filter) => filter.may_contain(user_key),
            None => true,
        }
    }

    /// Look up an exact encoded key.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Bytes>> {
        let index_block = self.index_block.clone();
        let mut index_iter = index_block.iter();
        index_iter.seek(key);

        if !index_iter.valid() {
            return Ok(None);
        }

        let mut cursor = index_iter.value().as_ref();
        let handle = BlockHandle::decode(&mut cursor)?;

        let block = self.read_block(&handle)?;
        let mut block_iter = block.iter();
        block_iter.seek(key);

        if block_iter.valid() && block_iter.key() == key {
            Ok(Some(block_iter.value().clone()))
        } else {
            Ok(None)
        }
    }

    /// Read a data block by handle.
    pub fn read_block(&mut self, handle: &BlockHandle) -> Result<Block> {
        let block_data = Self::read_block_data(&mut self.file, handle)?;
        Block::new_with_trailer(&block_data)
    }

    /// Get the index block.
    pub fn index_block(&self) -> &Arc<Block> {
        &self.index_block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::{CompressionType, TableBuilder};
    use tempfile::tempdir;

    fn build_test_table(path: &Path, count: usize) {
        let mut builder = TableBuilder::new(path, 1, CompressionType::None, 10, 4096).unwrap();
        for i in 0..count {
            let key = format!("key_{:04}", i);
            let value = format!("value_{}", i);
            builder.add(key.as_bytes(), value.as_bytes()).unwrap();
        }
        builder.finish().unwrap();
    }

    #[test]
    fn test_reader_open_and_get() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sst");
        build_test_table(&path, 100);

        let mut reader = TableReader::open(&path, 1).unwrap();
        assert_eq!(reader.file_number(), 1);
        assert!(reader.file_size() > 0);

        let value = reader.get(b"key_0042").unwrap();
        assert_eq!(value.as_deref(), Some(b"value_42".as_slice()));

        assert_eq!(reader.get(b"key_9999").unwrap(), None);
    }

    #[test]
    fn test_reader_bloom_filter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sst");
        build_test_table(&path, 100);

        let reader = TableReader::open(&path, 1).unwrap();
        assert!(reader.may_contain(b"key_0000"));
    }

    #[test]
    fn test_reader_open_truncated_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sst");
        std::fs::write(&path, b"tiny").unwrap();

        let err = TableReader::open(&path, 1).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_reader_open_garbage_footer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sst");
        std::fs::write(&path, vec![0u8; 200]).unwrap();

        assert!(TableReader::open(&path, 1).is_err());
    }
}
