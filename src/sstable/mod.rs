//! SSTable - Sorted String Table for on-disk storage.
//!
//! Tables are immutable, sorted files keyed by encoded internal keys. The
//! repair both reads them (scanning every surviving table for its key range
//! and maximum sequence number) and writes them (flushing memtables rebuilt
//! from the write-ahead logs).
//!
//! # File Format
//!
//! ```text
//! +------------------+
//! | Data Block 1     |
//! +------------------+
//! | ...              |
//! +------------------+
//! | Data Block N     |
//! +------------------+
//! | Filter Block     |  (Bloom filter)
//! +------------------+
//! | Index Block      |  (Block handles for data blocks)
//! +------------------+
//! | Footer           |  (Index and filter block handles)
//! +------------------+
//! ```

mod block;
mod block_builder;
mod filter;
mod iterator;
mod reader;
mod writer;

pub use block::{Block, BlockHandle, BlockIterator};
pub use block_builder::BlockBuilder;
pub use filter::{BloomFilter, BloomFilterBuilder};
pub use iterator::TableIterator;
pub use reader::TableReader;
pub use writer::{TableBuildInfo, TableBuilder};

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Magic number for SSTable footer (8 bytes).
pub const FOOTER_MAGIC: u64 = 0x88e241b785f4cff7;

/// Footer size: index handle (16) + filter handle (16) + magic (8) = 40 bytes.
pub const FOOTER_SIZE: usize = 40;

/// Block trailer size: CRC (4) + Type (1) = 5 bytes.
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Compression type for blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CompressionType {
    /// No compression.
    #[default]
    None = 0,
    /// Snappy compression.
    Snappy = 1,
    /// LZ4 compression.
    Lz4 = 2,
}

impl CompressionType {
    /// Create from byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Snappy),
            2 => Some(CompressionType::Lz4),
            _ => None,
        }
    }

    /// Convert to byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Footer of an SSTable file.
///
/// Contains handles to the index and filter blocks.
#[derive(Debug, Clone)]
pub struct Footer {
    /// Handle to the index block.
    pub index_handle: BlockHandle,
    /// Handle to the filter block.
    pub filter_handle: BlockHandle,
}

impl Footer {
    /// Create a new footer.
    pub fn new(index_handle: BlockHandle, filter_handle: BlockHandle) -> Self {
        Self {
            index_handle,
            filter_handle,
        }
    }

    /// Encode the footer to bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FOOTER_SIZE);
        self.index_handle.encode_to(&mut buf);
        self.filter_handle.encode_to(&mut buf);
        buf.put_u64_le(FOOTER_MAGIC);
        buf.freeze()
    }

    /// Decode a footer from bytes.
    pub fn decode(data: &[u8]) -> crate::Result<Self> {
        if data.len() < FOOTER_SIZE {
            return Err(crate::Error::corruption("footer too short"));
        }

        let footer_start = data.len() - FOOTER_SIZE;
        let mut cursor = &data[footer_start..];

        let index_handle = BlockHandle::decode(&mut cursor)?;
        let filter_handle = BlockHandle::decode(&mut cursor)?;

        let magic = cursor.get_u64_le();
        if magic != FOOTER_MAGIC {
            return Err(crate::Error::corruption("invalid footer magic"));
        }

        Ok(Self {
            index_handle,
            filter_handle,
        })
    }
}
