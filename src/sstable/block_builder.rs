//! Block builder for constructing SSTable data blocks.
//!
//! Builds blocks with prefix compression and restart points.

use bytes::{BufMut, Bytes, BytesMut};

use crate::util::coding::encode_varint64;
use crate::util::crc::{crc32_multi, mask_crc};

use super::{CompressionType, BLOCK_TRAILER_SIZE};

/// Default number of entries between restart points.
const DEFAULT_RESTART_INTERVAL: usize = 16;

/// Builder for SSTable data blocks.
///
/// Uses prefix compression to reduce key storage overhead,
/// with restart points for efficient binary search.
pub struct BlockBuilder {
    /// Buffer for block data.
    buffer: BytesMut,
    /// Restart point offsets.
    restarts: Vec<u32>,
    /// Number of entries since last restart.
    counter: usize,
    /// Restart interval.
    restart_interval: usize,
    /// Last key added (for prefix compression).
    last_key: Vec<u8>,
    /// Whether finish was called.
    finished: bool,
    /// Target block size.
    block_size: usize,
}

impl BlockBuilder {
    /// Create a new block builder with custom options.
    pub fn with_options(block_size: usize, restart_interval: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(block_size),
            restarts: vec![0],
            counter: 0,
            restart_interval,
            last_key: Vec::new(),
            finished: false,
            block_size,
        }
    }

    /// Create a new block builder with default settings.
    pub fn new() -> Self {
        Self::with_options(crate::options::DEFAULT_BLOCK_SIZE, DEFAULT_RESTART_INTERVAL)
    }

    /// Add a key-value pair to the block.
    ///
    /// Keys must be added in sorted order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(!self.finished);
        debug_assert!(
            self.last_key.is_empty() || key > self.last_key.as_slice(),
            "keys must be added in sorted order"
        );

        let shared = if self.counter < self.restart_interval {
            // Common prefix with the previous key.
            let mut shared = 0;
            let min_len = std::cmp::min(self.last_key.len(), key.len());
            while shared < min_len && self.last_key[shared] == key[shared] {
                shared += 1;
            }
            shared
        } else {
            // New restart point; store the whole key.
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
            0
        };

        let unshared = key.len() - shared;

        // Entry: shared_len | unshared_len | value_len | key_delta | value
        encode_varint64(&mut self.buffer, shared as u64);
        encode_varint64(&mut self.buffer, unshared as u64);
        encode_varint64(&mut self.buffer, value.len() as u64);
        self.buffer.put_slice(&key[shared..]);
        self.buffer.put_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.counter += 1;
    }

    /// Check if the block is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Get the current estimated size of the block.
    pub fn current_size(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4 + BLOCK_TRAILER_SIZE
    }

    /// Check if adding more entries would exceed the target size.
    pub fn should_flush(&self) -> bool {
        self.current_size() >= self.block_size
    }

    /// Finish building the block and return the data without trailer.
    pub fn finish(&mut self) -> Bytes {
        debug_assert!(!self.finished);
        self.finished = true;

        for &restart in &self.restarts {
            self.buffer.put_u32_le(restart);
        }
        self.buffer.put_u32_le(self.restarts.len() as u32);

        self.buffer.clone().freeze()
    }

    /// Finish and add a trailer with CRC and compression type.
    pub fn finish_with_trailer(&mut self, compression: CompressionType) -> Bytes {
        let content = self.finish();

        // Fall back to no compression when it doesn't pay for itself.
        let (final_content, final_compression) = match compression {
            CompressionType::None => (content, CompressionType::None),
            CompressionType::Snappy => match snap::raw::Encoder::new().compress_vec(&content) {
                Ok(compressed) if compressed.len() < content.len() => {
                    (Bytes::from(compressed), CompressionType::Snappy)
                }
                _ => (content, CompressionType::None),
            },
            CompressionType::Lz4 => {
                let compressed = lz4_flex::compress_prepend_size(&content);
                if compressed.len() < content.len() {
                    (Bytes::from(compressed), CompressionType::Lz4)
                } else {
                    (content, CompressionType::None)
                }
            }
        };

        let mut result = BytesMut::with_capacity(final_content.len() + BLOCK_TRAILER_SIZE);
        result.put_slice(&final_content);

        // CRC is over content + type.
        let crc = mask_crc(crc32_multi(&[
            &final_content[..],
            &[final_compression.to_byte()],
        ]));
        result.put_u32_le(crc);
        result.put_u8(final_compression.to_byte());

        result.freeze()
    }

    /// Reset the builder for reuse.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.last_key.clear();
        self.finished = false;
    }
}

impl Default for BlockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::Block;

    #[test]
    fn test_block_builder_empty() {
        let builder = BlockBuilder::new();
        assert!(builder.is_empty());
    }

    #[test]
    fn test_block_builder_single_entry() {
        let mut builder = BlockBuilder::new();
        builder.add(b"key", b"value");
        assert!(!builder.is_empty());

        let data = builder.finish();
        let block = Block::new(data).unwrap();
        assert_eq!(block.num_restarts(), 1);

        let entries: Vec<_> = block.iter().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0.as_ref(), b"key");
        assert_eq!(entries[0].1.as_ref(), b"value");
    }

    #[test]
    fn test_block_builder_restart_points() {
        let mut builder = BlockBuilder::with_options(4096, 2);

        for i in 0..6 {
            let key = format!("key_{:02}", i);
            builder.add(key.as_bytes(), b"value");
        }

        let data = builder.finish();
        let block = Block::new(data).unwrap();

        // Interval of 2 over 6 entries leaves 3 restart points.
        assert_eq!(block.num_restarts(), 3);
    }

    #[test]
    fn test_block_builder_prefix_compression() {
        let mut builder = BlockBuilder::with_options(4096, 16);

        for i in 0..10 {
            let key = format!("prefix_{:04}", i);
            let value = format!("value_{}", i);
            builder.add(key.as_bytes(), value.as_bytes());
        }

        let data = builder.finish();
        // Shared prefixes keep the block well under the raw entry size.
        assert!(data.len() < 180);
    }

    #[test]
    fn test_block_builder_lz4_compression() {
        let mut builder = BlockBuilder::new();

        for i in 0..100 {
            let key = format!("key_{:04}", i);
            let value = "x".repeat(100);
            builder.add(key.as_bytes(), value.as_bytes());
        }

        let uncompressed = builder.current_size();
        let data = builder.finish_with_trailer(CompressionType::Lz4);
        assert!(data.len() < uncompressed);

        let block = Block::new_with_trailer(&data).unwrap();
        assert_eq!(block.iter().count(), 100);
    }

    #[test]
    fn test_block_builder_reset() {
        let mut builder = BlockBuilder::new();
        builder.add(b"key1", b"value1");
        builder.finish();

        builder.reset();
        assert!(builder.is_empty());

        builder.add(b"key2", b"value2");
        let data = builder.finish();
        let block = Block::new(data).unwrap();

        let entries: Vec<_> = block.iter().collect();
        assert_eq!(entries[0].0.as_ref(), b"key2");
    }
}
