//! Metadata for table files referenced by a descriptor.

use crate::types::InternalKey;

/// Metadata about a table file: its number, size, and key range.
///
/// Created when a table is built or scanned; immutable once populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    /// Unique file number within the locality group.
    file_number: u64,
    /// File size in bytes.
    file_size: u64,
    /// Smallest internal key in the file.
    smallest: InternalKey,
    /// Largest internal key in the file.
    largest: InternalKey,
}

impl FileMeta {
    /// Create new file metadata.
    pub fn new(file_number: u64, file_size: u64, smallest: InternalKey, largest: InternalKey) -> Self {
        Self {
            file_number,
            file_size,
            smallest,
            largest,
        }
    }

    /// Get the file number.
    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    /// Get the file size.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Get the smallest key.
    pub fn smallest(&self) -> &InternalKey {
        &self.smallest
    }

    /// Get the largest key.
    pub fn largest(&self) -> &InternalKey {
        &self.largest
    }
}
