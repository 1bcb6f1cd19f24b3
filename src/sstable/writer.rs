//! Table builder for writing immutable sorted files.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use bytes::{Bytes, BytesMut};

use crate::Result;

use super::block_builder::BlockBuilder;
use super::filter::BloomFilterBuilder;
use super::{BlockHandle, CompressionType, Footer, FOOTER_SIZE};

/// Builder for table files.
///
/// Accepts encoded internal keys in sorted order and lays out data blocks,
/// a Bloom filter over the user keys, an index block, and the footer.
pub struct TableBuilder {
    /// Buffered file writer.
    writer: BufWriter<File>,
    /// Current offset in the file.
    offset: u64,
    /// Block builder for data blocks.
    data_block: BlockBuilder,
    /// Index block builder.
    index_block: BlockBuilder,
    /// Bloom filter builder, when a filter policy is configured.
    filter_builder: Option<BloomFilterBuilder>,
    /// Last key written (for index separators).
    last_key: Vec<u8>,
    /// Pending index entry (written once the next block's first key is known).
    pending_index_entry: Option<BlockHandle>,
    /// Compression type.
    compression: CompressionType,
    /// Number of entries written.
    entry_count: u64,
    /// File number.
    file_number: u64,
    /// Smallest key in the table.
    smallest_key: Option<Bytes>,
    /// Largest key in the table.
    largest_key: Option<Bytes>,
}

impl TableBuilder {
    /// Create a new table builder.
    ///
    /// `bits_per_key` of 0 disables the Bloom filter block.
    pub fn new(
        path: &Path,
        file_number: u64,
        compression: CompressionType,
        bits_per_key: usize,
        block_size: usize,
    ) -> Result<Self> {
        let file = File::create(path)?;

        Ok(Self {
            writer: BufWriter::with_capacity(block_size * 4, file),
            offset: 0,
            data_block: BlockBuilder::with_options(block_size, 16),
            index_block: BlockBuilder::with_options(block_size, 1),
            filter_builder: (bits_per_key > 0).then(|| BloomFilterBuilder::new(bits_per_key)),
            last_key: Vec::new(),
            pending_index_entry: None,
            compression,
            entry_count: 0,
            file_number,
            smallest_key: None,
            largest_key: None,
        })
    }

    /// Get the file number.
    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    /// Get the number of entries written.
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Add a key-value pair.
    ///
    /// Keys must be added in sorted order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        debug_assert!(
            self.last_key.is_empty() || key > self.last_key.as_slice(),
            "keys must be added in sorted order"
        );

        // Emit the index entry for the block finished by the previous add.
        if let Some(handle) = self.pending_index_entry.take() {
            let separator = find_short_separator(&self.last_key, key);
            self.write_index_entry(&separator, handle)?;
        }

        if self.smallest_key.is_none() {
            self.smallest_key = Some(Bytes::copy_from_slice(key));
        }
        self.largest_key = Some(Bytes::copy_from_slice(key));

        if let Some(filter) = self.filter_builder.as_mut() {
            // Filter over the user key so point lookups can probe it
            // without the sequence/type suffix.
            if key.len() > 8 {
                filter.add(&key[..key.len() - 8]);
            } else {
                filter.add(key);
            }
        }

        self.data_block.add(key, value);
        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.entry_count += 1;

        if self.data_block.should_flush() {
            self.flush_data_block()?;
        }

        Ok(())
    }

    /// Flush the current data block to disk.
    fn flush_data_block(&mut self) -> Result<()> {
        if self.data_block.is_empty() {
            return Ok(());
        }

        let block_data = self.data_block.finish_with_trailer(self.compression);
        let handle = self.write_raw_block(&block_data)?;

        self.pending_index_entry = Some(handle);
        self.data_block.reset();
        Ok(())
    }

    /// Write a raw block to the file.
    fn write_raw_block(&mut self, data: &[u8]) -> Result<BlockHandle> {
        let handle = BlockHandle::new(self.offset, data.len() as u64);
        self.writer.write_all(data)?;
        self.offset += data.len() as u64;
        Ok(handle)
    }

    /// Write an index entry.
    fn write_index_entry(&mut self, key: &[u8], handle: BlockHandle) -> Result<()> {
        let mut value = BytesMut::with_capacity(16);
        handle.encode_to(&mut value);
        self.index_block.add(key, &value);
        Ok(())
    }

    /// Finish writing the table.
    ///
    /// Writes the filter block, index block, and footer, then syncs.
    pub fn finish(mut self) -> Result<TableBuildInfo> {
        self.flush_data_block()?;

        if let Some(handle) = self.pending_index_entry.take() {
            let successor = find_short_successor(&self.last_key);
            self.write_index_entry(&successor, handle)?;
        }

        let filter_data = self
            .filter_builder
            .as_ref()
            .map(|f| f.finish())
            .unwrap_or_default();
        let filter_handle = if !filter_data.is_empty() {
            self.write_raw_block(&filter_data)?
        } else {
            BlockHandle::new(0, 0)
        };

        let index_data = self.index_block.finish_with_trailer(CompressionType::None);
        let index_handle = self.write_raw_block(&index_data)?;

        let footer = Footer::new(index_handle, filter_handle);
        self.writer.write_all(&footer.encode())?;
        self.offset += FOOTER_SIZE as u64;

        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        Ok(TableBuildInfo {
            file_number: self.file_number,
            file_size: self.offset,
            entry_count: self.entry_count,
            smallest_key: self.smallest_key,
            largest_key: self.largest_key,
        })
    }
}

/// Information about a completed table file.
#[derive(Debug, Clone)]
pub struct TableBuildInfo {
    /// File number.
    pub file_number: u64,
    /// Total file size in bytes.
    pub file_size: u64,
    /// Number of entries.
    pub entry_count: u64,
    /// Smallest key (if any entries).
    pub smallest_key: Option<Bytes>,
    /// Largest key (if any entries).
    pub largest_key: Option<Bytes>,
}

/// Find a short separator `sep` with `start <= sep < limit`.
fn find_short_separator(start: &[u8], limit: &[u8]) -> Vec<u8> {
    let min_len = std::cmp::min(start.len(), limit.len());
    let mut diff_index = 0;

    while diff_index < min_len && start[diff_index] == limit[diff_index] {
        diff_index += 1;
    }

    if diff_index < min_len {
        let diff_byte = start[diff_index];
        if diff_byte < 0xFF && diff_byte + 1 < limit[diff_index] {
            let mut result = start[..=diff_index].to_vec();
            result[diff_index] += 1;
            return result;
        }
    }

    start.to_vec()
}

/// Find the shortest key greater than the input.
fn find_short_successor(key: &[u8]) -> Vec<u8> {
    for i in 0..key.len() {
        if key[i] < 0xFF {
            let mut result = key[..=i].to_vec();
            result[i] += 1;
            return result;
        }
    }

    // All 0xFF; nothing shorter exists.
    key.to_vec()
}
