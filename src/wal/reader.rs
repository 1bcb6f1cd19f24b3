//! WAL reader implementation.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bytes::Bytes;

use crate::util::crc::{crc32_multi, mask_crc};
use crate::{Error, Result};

use super::{RecordType, BLOCK_SIZE, HEADER_SIZE};

/// Sink invoked with the number of bytes dropped whenever the reader skips
/// over a corrupt region.
pub type CorruptionReporter<'a> = Box<dyn FnMut(usize, &Error) + 'a>;

/// WAL reader for recovery and repair.
///
/// Reads records from a WAL file, reassembling fragmented records. Corrupt
/// regions never fail the read: they are handed to the corruption reporter
/// and the reader resynchronizes at the next block boundary. Checksum
/// verification can be disabled so that a damaged record costs one batch
/// instead of the rest of the file.
pub struct WalReader<'a> {
    /// Buffered reader for the WAL file.
    reader: BufReader<File>,
    /// Current block buffer.
    buffer: Vec<u8>,
    /// Current position within the buffer.
    buffer_offset: usize,
    /// Valid bytes in the buffer.
    buffer_size: usize,
    /// Whether we've reached EOF.
    eof: bool,
    /// Whether to verify record checksums.
    verify_checksums: bool,
    /// Corruption sink.
    reporter: Option<CorruptionReporter<'a>>,
    /// File number for this WAL.
    file_number: u64,
}

impl<'a> WalReader<'a> {
    /// Create a new WAL reader with checksum verification and no reporter.
    pub fn new(path: &Path, file_number: u64) -> Result<Self> {
        Self::with_reporter(path, file_number, true, None)
    }

    /// Create a WAL reader with explicit checksum and reporting behavior.
    pub fn with_reporter(
        path: &Path,
        file_number: u64,
        verify_checksums: bool,
        reporter: Option<CorruptionReporter<'a>>,
    ) -> Result<Self> {
        let file = File::open(path)?;

        Ok(Self {
            reader: BufReader::with_capacity(BLOCK_SIZE * 4, file),
            buffer: vec![0u8; BLOCK_SIZE],
            buffer_offset: 0,
            buffer_size: 0,
            eof: false,
            verify_checksums,
            reporter,
            file_number,
        })
    }

    /// Get the file number.
    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    /// Report `bytes` dropped due to `err`.
    fn report_drop(&mut self, bytes: usize, err: &Error) {
        if let Some(reporter) = self.reporter.as_mut() {
            reporter(bytes, err);
        }
    }

    /// Read the next record.
    ///
    /// Returns `Ok(None)` at end of file, including for a record truncated
    /// by a crash mid-write.
    pub fn read_record(&mut self) -> Result<Option<Bytes>> {
        let mut scratch = Vec::new();
        let mut in_fragmented_record = false;

        loop {
            match self.read_physical_record()? {
                Some((record_type, data)) => match record_type {
                    RecordType::Full => {
                        if in_fragmented_record {
                            let err = Error::corruption("partial record without end");
                            self.report_drop(scratch.len(), &err);
                            scratch.clear();
                        }
                        return Ok(Some(Bytes::from(data)));
                    }
                    RecordType::First => {
                        if in_fragmented_record {
                            let err = Error::corruption("partial record without end");
                            self.report_drop(scratch.len(), &err);
                            scratch.clear();
                        }
                        scratch.extend_from_slice(&data);
                        in_fragmented_record = true;
                    }
                    RecordType::Middle => {
                        if !in_fragmented_record {
                            let err = Error::corruption("missing start of fragmented record");
                            self.report_drop(data.len(), &err);
                            continue;
                        }
                        scratch.extend_from_slice(&data);
                    }
                    RecordType::Last => {
                        if !in_fragmented_record {
                            let err = Error::corruption("missing start of fragmented record");
                            self.report_drop(data.len(), &err);
                            continue;
                        }
                        scratch.extend_from_slice(&data);
                        return Ok(Some(Bytes::from(std::mem::take(&mut scratch))));
                    }
                    RecordType::Zero => {
                        // Padding from pre-allocated space.
                        continue;
                    }
                },
                None => {
                    // A fragment cut off by a crash mid-write is expected;
                    // drop it silently.
                    return Ok(None);
                }
            }
        }
    }

    /// Read a physical record from the current position.
    ///
    /// Skips over corrupt regions, reporting the dropped byte counts.
    fn read_physical_record(&mut self) -> Result<Option<(RecordType, Vec<u8>)>> {
        loop {
            // Check if we need to read a new block
            if self.buffer_offset + HEADER_SIZE > self.buffer_size {
                if !self.read_block()? {
                    return Ok(None);
                }
                continue;
            }

            // Read header
            let header = &self.buffer[self.buffer_offset..self.buffer_offset + HEADER_SIZE];

            let crc_expected = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let length = u16::from_le_bytes([header[4], header[5]]) as usize;
            let record_type_byte = header[6];

            let remaining = self.buffer_size - self.buffer_offset;

            let record_type = match RecordType::from_byte(record_type_byte) {
                Some(rt) => rt,
                None => {
                    let err = Error::corruption("invalid record type");
                    self.report_drop(remaining, &err);
                    self.buffer_offset = self.buffer_size;
                    continue;
                }
            };

            // Check if record fits in the block
            if self.buffer_offset + HEADER_SIZE + length > self.buffer_size {
                if self.eof {
                    // Truncated record at end of file; the writer died
                    // mid-record, so there is nothing further to recover.
                    return Ok(None);
                }
                let err = Error::corruption("bad record length");
                self.report_drop(remaining, &err);
                self.buffer_offset = self.buffer_size;
                continue;
            }

            // Read data
            let data_start = self.buffer_offset + HEADER_SIZE;
            let data_end = data_start + length;
            let data = &self.buffer[data_start..data_end];

            if self.verify_checksums {
                let crc_actual = mask_crc(crc32_multi(&[&[record_type_byte], data]));
                if crc_expected != crc_actual {
                    let err = Error::CrcMismatch {
                        expected: crc_expected,
                        actual: crc_actual,
                    };
                    self.report_drop(HEADER_SIZE + length, &err);
                    self.buffer_offset = self.buffer_size;
                    continue;
                }
            }

            let data = data.to_vec();
            self.buffer_offset = data_end;

            return Ok(Some((record_type, data)));
        }
    }

    /// Read the next block into the buffer.
    fn read_block(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }

        self.buffer_offset = 0;
        let bytes_read = self.reader.read(&mut self.buffer)?;

        if bytes_read == 0 {
            self.eof = true;
            self.buffer_size = 0;
            return Ok(false);
        }

        self.buffer_size = bytes_read;

        // If we read less than a full block, we're at EOF
        if bytes_read < BLOCK_SIZE {
            self.eof = true;
        }

        Ok(true)
    }
}
