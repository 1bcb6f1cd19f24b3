//! WAL writer implementation.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::options::SyncMode;
use crate::util::crc::{crc32_multi, mask_crc};
use crate::Result;

use super::{RecordType, BLOCK_SIZE, HEADER_SIZE};

/// WAL writer for durable logging.
///
/// Writes records to a log file using a block-based format with CRC
/// checksums. Repair uses this format for fixtures and descriptor records;
/// the engine's normal write path produces the same layout.
pub struct WalWriter {
    /// Buffered writer for the WAL file.
    writer: BufWriter<File>,
    /// Current position within the current block.
    block_offset: usize,
    /// Sync mode for durability.
    sync_mode: SyncMode,
    /// File number for this WAL.
    file_number: u64,
}

impl WalWriter {
    /// Create a new WAL writer.
    pub fn new(path: &Path, file_number: u64, sync_mode: SyncMode) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            writer: BufWriter::with_capacity(BLOCK_SIZE * 4, file),
            block_offset: 0,
            sync_mode,
            file_number,
        })
    }

    /// Get the file number.
    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    /// Add a record to the WAL.
    ///
    /// The record may be split across multiple fragments if it doesn't
    /// fit in the current block.
    pub fn add_record(&mut self, data: &[u8]) -> Result<()> {
        let mut left = data.len();
        let mut ptr = 0;
        let mut begin = true;

        while left > 0 {
            let leftover = BLOCK_SIZE - self.block_offset;

            // Switch to a new block if we can't fit a header
            if leftover < HEADER_SIZE {
                if leftover > 0 {
                    self.writer.write_all(&vec![0u8; leftover])?;
                }
                self.block_offset = 0;
            }

            let avail = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_length = std::cmp::min(left, avail);
            let end = left == fragment_length;

            let record_type = if begin && end {
                RecordType::Full
            } else if begin {
                RecordType::First
            } else if end {
                RecordType::Last
            } else {
                RecordType::Middle
            };

            self.emit_physical_record(record_type, &data[ptr..ptr + fragment_length])?;

            ptr += fragment_length;
            left -= fragment_length;
            begin = false;
        }

        if self.sync_mode == SyncMode::Always {
            self.sync()?;
        }

        Ok(())
    }

    /// Write a physical record (header + data).
    fn emit_physical_record(&mut self, record_type: RecordType, data: &[u8]) -> Result<()> {
        debug_assert!(data.len() <= 0xFFFF); // Length fits in 2 bytes
        debug_assert!(self.block_offset + HEADER_SIZE + data.len() <= BLOCK_SIZE);

        let crc = mask_crc(crc32_multi(&[&[record_type.to_byte()], data]));

        // Header format: CRC (4) + Length (2) + Type (1)
        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&crc.to_le_bytes());
        header[4..6].copy_from_slice(&(data.len() as u16).to_le_bytes());
        header[6] = record_type.to_byte();

        self.writer.write_all(&header)?;
        self.writer.write_all(data)?;

        self.block_offset += HEADER_SIZE + data.len();

        Ok(())
    }

    /// Force a sync to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Flush buffered data (but don't sync to disk).
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Close the writer.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        self.sync()?;
        Ok(())
    }
}
