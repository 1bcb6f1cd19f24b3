//! Block format for SSTable data storage.
//!
//! A block contains a sequence of key-value entries with prefix compression,
//! followed by restart points for efficient binary search.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::util::coding::decode_varint64;
use crate::util::crc::{crc32_multi, mask_crc};
use crate::{Error, Result};

use super::{CompressionType, BLOCK_TRAILER_SIZE};

/// Handle to a block within an SSTable file.
///
/// Contains the offset and size needed to read the block.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockHandle {
    /// Offset within the file.
    offset: u64,
    /// Size of the block including its trailer.
    size: u64,
}

impl BlockHandle {
    /// Create a new block handle.
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Get the offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Get the size.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Encode to buffer (fixed 16 bytes: offset + size as u64).
    pub fn encode_to(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.offset);
        buf.put_u64_le(self.size);
    }

    /// Decode from buffer.
    pub fn decode(data: &mut &[u8]) -> Result<Self> {
        if data.len() < 16 {
            return Err(Error::corruption("block handle too short"));
        }
        let offset = data.get_u64_le();
        let size = data.get_u64_le();
        Ok(Self { offset, size })
    }
}

/// A decoded block of entries from an SSTable.
#[derive(Debug)]
pub struct Block {
    /// The raw block data (entries + restart array + count).
    data: Bytes,
    /// Offset to the restart array.
    restart_offset: usize,
    /// Number of restart points.
    num_restarts: u32,
}

impl Block {
    /// Create a block from raw data.
    ///
    /// The data should include entries and restart points but NOT the trailer.
    pub fn new(data: Bytes) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::corruption("block too short"));
        }

        let num_restarts = u32::from_le_bytes(
            data[data.len() - 4..]
                .try_into()
                .map_err(|_| Error::corruption("failed to read restart count"))?,
        );

        let restart_array_size = num_restarts as usize * 4;
        if data.len() < 4 + restart_array_size {
            return Err(Error::corruption("block too short for restart array"));
        }

        let restart_offset = data.len() - 4 - restart_array_size;

        Ok(Self {
            data,
            restart_offset,
            num_restarts,
        })
    }

    /// Create a block from raw data with trailer verification and
    /// decompression.
    pub fn new_with_trailer(data: &[u8]) -> Result<Self> {
        if data.len() < BLOCK_TRAILER_SIZE {
            return Err(Error::corruption("block too short for trailer"));
        }

        let content_len = data.len() - BLOCK_TRAILER_SIZE;
        let content = &data[..content_len];
        let trailer = &data[content_len..];

        let stored_crc = u32::from_le_bytes(trailer[..4].try_into().unwrap());
        let compression_type = trailer[4];

        // CRC is computed over content + compression type.
        let computed_crc = mask_crc(crc32_multi(&[content, &[compression_type]]));
        if stored_crc != computed_crc {
            return Err(Error::corruption("block checksum mismatch"));
        }

        let block_data = match CompressionType::from_byte(compression_type) {
            Some(CompressionType::None) => Bytes::copy_from_slice(content),
            Some(CompressionType::Snappy) => {
                let decompressed = snap::raw::Decoder::new()
                    .decompress_vec(content)
                    .map_err(|e| Error::corruption(format!("snappy decompress failed: {}", e)))?;
                Bytes::from(decompressed)
            }
            Some(CompressionType::Lz4) => {
                let decompressed = lz4_flex::decompress_size_prepended(content)
                    .map_err(|e| Error::corruption(format!("lz4 decompress failed: {}", e)))?;
                Bytes::from(decompressed)
            }
            None => {
                return Err(Error::corruption("unknown compression type"));
            }
        };

        Self::new(block_data)
    }

    /// Get the number of restart points.
    pub fn num_restarts(&self) -> u32 {
        self.num_restarts
    }

    /// Get a restart point offset.
    fn restart_point(&self, index: u32) -> usize {
        let offset = self.restart_offset + (index as usize * 4);
        u32::from_le_bytes(self.data[offset..offset + 4].try_into().unwrap()) as usize
    }

    /// Create an iterator over the block.
    pub fn iter(&self) -> BlockIterator<'_> {
        BlockIterator::new(self)
    }
}

/// Iterator over entries in a block.
///
/// Starts unpositioned; call [`BlockIterator::seek_to_first`] or
/// [`BlockIterator::seek`], or drive it through the `Iterator` impl.
pub struct BlockIterator<'a> {
    /// The block being iterated.
    block: &'a Block,
    /// Offset of the next entry to parse.
    next_offset: usize,
    /// Current key (reassembled from prefix compression).
    current_key: Vec<u8>,
    /// Current value.
    current_value: Bytes,
    /// Whether we're positioned at a valid entry.
    valid: bool,
    /// Whether iteration has started (for the Iterator impl).
    started: bool,
}

impl<'a> BlockIterator<'a> {
    fn new(block: &'a Block) -> Self {
        Self {
            block,
            next_offset: 0,
            current_key: Vec::new(),
            current_value: Bytes::new(),
            valid: false,
            started: false,
        }
    }

    /// Check if the iterator is positioned at an entry.
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Get the current key.
    pub fn key(&self) -> &[u8] {
        debug_assert!(self.valid);
        &self.current_key
    }

    /// Get the current value.
    pub fn value(&self) -> &Bytes {
        debug_assert!(self.valid);
        &self.current_value
    }

    /// Position at the first entry.
    pub fn seek_to_first(&mut self) {
        self.started = true;
        self.next_offset = 0;
        self.current_key.clear();
        self.advance();
    }

    /// Position at the first entry with key >= target.
    pub fn seek(&mut self, target: &[u8]) {
        // Binary search the restart points for the last one whose key is
        // <= target, then scan forward.
        let mut left = 0u32;
        let mut right = self.block.num_restarts.saturating_sub(1);

        while left < right {
            let mid = (left + right + 1) / 2;
            match self.key_at_restart(mid) {
                Some(key) if key.as_slice() <= target => left = mid,
                _ => right = mid - 1,
            }
        }

        self.started = true;
        self.next_offset = if self.block.num_restarts == 0 {
            self.block.restart_offset
        } else {
            self.block.restart_point(left)
        };
        self.current_key.clear();

        self.advance();
        while self.valid && self.current_key.as_slice() < target {
            self.advance();
        }
    }

    /// Advance to the next entry.
    pub fn advance(&mut self) {
        self.started = true;
        if self.next_offset >= self.block.restart_offset {
            self.valid = false;
            return;
        }

        let mut cursor = &self.block.data[self.next_offset..self.block.restart_offset];
        let before = cursor.len();

        let parsed = (|| {
            let shared = decode_varint64(&mut cursor)? as usize;
            let unshared = decode_varint64(&mut cursor)? as usize;
            let value_len = decode_varint64(&mut cursor)? as usize;

            if shared > self.current_key.len() || cursor.len() < unshared + value_len {
                return None;
            }

            Some((shared, unshared, value_len))
        })();

        let (shared, unshared, value_len) = match parsed {
            Some(p) => p,
            None => {
                // Malformed entry; stop rather than walk garbage.
                self.valid = false;
                return;
            }
        };

        self.current_key.truncate(shared);
        self.current_key.extend_from_slice(&cursor[..unshared]);
        self.current_value = Bytes::copy_from_slice(&cursor[unshared..unshared + value_len]);

        let consumed = before - cursor.len() + unshared + value_len;
        self.next_offset += consumed;
        self.valid = true;
    }

    /// Decode the full key stored at a restart point.
    fn key_at_restart(&self, index: u32) -> Option<Vec<u8>> {
        let offset = self.block.restart_point(index);
        if offset >= self.block.restart_offset {
            return None;
        }

        let mut cursor = &self.block.data[offset..self.block.restart_offset];
        let shared = decode_varint64(&mut cursor)?;
        let unshared = decode_varint64(&mut cursor)? as usize;
        let _value_len = decode_varint64(&mut cursor)?;

        // Entries at restart points store the whole key.
        if shared != 0 || cursor.len() < unshared {
            return None;
        }

        Some(cursor[..unshared].to_vec())
    }
}

impl<'a> Iterator for BlockIterator<'a> {
    type Item = (Bytes, Bytes);

    fn next(&mut self) -> Option<Self::Item> {
        if !self.started {
            self.seek_to_first();
        } else {
            self.advance();
        }

        if self.valid {
            Some((
                Bytes::copy_from_slice(&self.current_key),
                self.current_value.clone(),
            ))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::BlockBuilder;
    use super::*;

    fn build_block(entries: &[(&[u8], &[u8])]) -> Block {
        let mut builder = BlockBuilder::with_options(4096, 2);
        for (key, value) in entries {
            builder.add(key, value);
        }
        Block::new(builder.finish()).unwrap()
    }

    #[test]
    fn test_block_roundtrip() {
        let block = build_block(&[
            (b"aaa", b"value1"),
            (b"aab", b"value2"),
            (b"abc", b"value3"),
            (b"bbb", b"value4"),
        ]);

        let entries: Vec<_> = block.iter().collect();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].0.as_ref(), b"aaa");
        assert_eq!(entries[3].1.as_ref(), b"value4");
    }

    #[test]
    fn test_block_seek() {
        let keys: Vec<String> = (0..10).map(|i| format!("key_{:02}", i)).collect();
        let entries: Vec<(&[u8], &[u8])> = keys
            .iter()
            .map(|k| (k.as_bytes(), b"value".as_slice()))
            .collect();
        let block = build_block(&entries);

        let mut iter = block.iter();
        iter.seek(b"key_05");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"key_05");

        iter.seek(b"key_04x");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"key_05");

        iter.seek(b"zzz");
        assert!(!iter.valid());
    }

    #[test]
    fn test_block_with_trailer_roundtrip() {
        let mut builder = BlockBuilder::new();
        builder.add(b"key1", b"value1");
        builder.add(b"key2", b"value2");

        let data = builder.finish_with_trailer(CompressionType::None);
        let block = Block::new_with_trailer(&data).unwrap();

        let entries: Vec<_> = block.iter().collect();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_block_trailer_checksum_mismatch() {
        let mut builder = BlockBuilder::new();
        builder.add(b"key1", b"value1");

        let data = builder.finish_with_trailer(CompressionType::None);
        let mut corrupted = data.to_vec();
        corrupted[0] ^= 0xFF;

        let err = Block::new_with_trailer(&corrupted).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_block_too_short() {
        assert!(Block::new(Bytes::from_static(&[0, 0])).is_err());
    }

    #[test]
    fn test_block_handle_roundtrip() {
        let handle = BlockHandle::new(1234, 5678);
        let mut buf = BytesMut::new();
        handle.encode_to(&mut buf);

        let mut cursor: &[u8] = &buf;
        let decoded = BlockHandle::decode(&mut cursor).unwrap();
        assert_eq!(decoded.offset(), 1234);
        assert_eq!(decoded.size(), 5678);
    }
}
