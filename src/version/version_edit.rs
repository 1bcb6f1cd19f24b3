//! VersionEdit - a delta against a locality group's descriptor state.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::{HashMap, HashSet};

use crate::options::MAX_LEVELS;
use crate::types::InternalKey;
use crate::util::coding::{
    decode_length_prefixed, decode_varint64, encode_length_prefixed, encode_varint64,
};
use crate::{Error, Result};

use super::{EditTag, FileMeta};

/// A VersionEdit describes changes to a locality group's file set.
///
/// The repair synthesizes a single edit carrying the complete recovered
/// state: comparator name, counters, and one new level-0 file per retained
/// table.
#[derive(Debug, Clone, Default)]
pub struct VersionEdit {
    /// Comparator name (set on the first edit of a descriptor).
    pub comparator: Option<String>,
    /// Log file number.
    pub log_number: Option<u64>,
    /// Next file number to allocate.
    pub next_file_number: Option<u64>,
    /// Last sequence number used.
    pub last_sequence: Option<u64>,
    /// Compaction pointers by level.
    pub compact_pointers: HashMap<usize, InternalKey>,
    /// Files to delete: (level, file_number).
    pub deleted_files: HashSet<(usize, u64)>,
    /// New files to add: (level, FileMeta).
    pub new_files: Vec<(usize, FileMeta)>,
}

impl VersionEdit {
    /// Create a new empty edit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the comparator name.
    pub fn set_comparator(&mut self, name: impl Into<String>) {
        self.comparator = Some(name.into());
    }

    /// Set the log number.
    pub fn set_log_number(&mut self, num: u64) {
        self.log_number = Some(num);
    }

    /// Set the next file number.
    pub fn set_next_file_number(&mut self, num: u64) {
        self.next_file_number = Some(num);
    }

    /// Set the last sequence number.
    pub fn set_last_sequence(&mut self, seq: u64) {
        self.last_sequence = Some(seq);
    }

    /// Set a compaction pointer.
    pub fn set_compact_pointer(&mut self, level: usize, key: InternalKey) {
        self.compact_pointers.insert(level, key);
    }

    /// Record a file deletion.
    pub fn delete_file(&mut self, level: usize, file_number: u64) {
        self.deleted_files.insert((level, file_number));
    }

    /// Add a new file at the given level.
    pub fn add_file(&mut self, level: usize, file: FileMeta) {
        self.new_files.push((level, file));
    }

    /// Check if the edit is empty.
    pub fn is_empty(&self) -> bool {
        self.comparator.is_none()
            && self.log_number.is_none()
            && self.next_file_number.is_none()
            && self.last_sequence.is_none()
            && self.compact_pointers.is_empty()
            && self.deleted_files.is_empty()
            && self.new_files.is_empty()
    }

    /// Encode the edit to bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(256);

        if let Some(ref name) = self.comparator {
            buf.put_u8(EditTag::Comparator.to_byte());
            encode_length_prefixed(&mut buf, name.as_bytes());
        }

        if let Some(num) = self.log_number {
            buf.put_u8(EditTag::LogNumber.to_byte());
            encode_varint64(&mut buf, num);
        }

        if let Some(num) = self.next_file_number {
            buf.put_u8(EditTag::NextFileNumber.to_byte());
            encode_varint64(&mut buf, num);
        }

        if let Some(seq) = self.last_sequence {
            buf.put_u8(EditTag::LastSequence.to_byte());
            encode_varint64(&mut buf, seq);
        }

        for (&level, key) in &self.compact_pointers {
            buf.put_u8(EditTag::CompactPointer.to_byte());
            encode_varint64(&mut buf, level as u64);
            encode_length_prefixed(&mut buf, &key.encode());
        }

        for &(level, file_number) in &self.deleted_files {
            buf.put_u8(EditTag::DeletedFile.to_byte());
            encode_varint64(&mut buf, level as u64);
            encode_varint64(&mut buf, file_number);
        }

        for (level, file) in &self.new_files {
            buf.put_u8(EditTag::NewFile.to_byte());
            encode_varint64(&mut buf, *level as u64);
            encode_varint64(&mut buf, file.file_number());
            encode_varint64(&mut buf, file.file_size());
            encode_length_prefixed(&mut buf, &file.smallest().encode());
            encode_length_prefixed(&mut buf, &file.largest().encode());
        }

        buf.freeze()
    }

    /// Decode an edit from bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut edit = VersionEdit::new();
        let mut cursor = data;

        while !cursor.is_empty() {
            let tag = cursor.get_u8();
            let tag = EditTag::from_byte(tag)
                .ok_or_else(|| Error::corruption(format!("unknown edit tag: {}", tag)))?;

            match tag {
                EditTag::Comparator => {
                    let name = decode_length_prefixed(&mut cursor)
                        .ok_or_else(|| Error::corruption("truncated comparator name"))?;
                    edit.comparator = Some(
                        String::from_utf8(name.to_vec())
                            .map_err(|_| Error::corruption("invalid comparator name"))?,
                    );
                }
                EditTag::LogNumber => {
                    edit.log_number = Some(decode_field(&mut cursor, "log number")?);
                }
                EditTag::NextFileNumber => {
                    edit.next_file_number = Some(decode_field(&mut cursor, "next file number")?);
                }
                EditTag::LastSequence => {
                    edit.last_sequence = Some(decode_field(&mut cursor, "last sequence")?);
                }
                EditTag::CompactPointer => {
                    let level = decode_level(&mut cursor)?;
                    let key = decode_internal_key(&mut cursor, "compact pointer key")?;
                    edit.compact_pointers.insert(level, key);
                }
                EditTag::DeletedFile => {
                    let level = decode_level(&mut cursor)?;
                    let file_number = decode_field(&mut cursor, "deleted file number")?;
                    edit.deleted_files.insert((level, file_number));
                }
                EditTag::NewFile => {
                    let level = decode_level(&mut cursor)?;
                    let file_number = decode_field(&mut cursor, "file number")?;
                    let file_size = decode_field(&mut cursor, "file size")?;
                    let smallest = decode_internal_key(&mut cursor, "smallest key")?;
                    let largest = decode_internal_key(&mut cursor, "largest key")?;

                    edit.new_files
                        .push((level, FileMeta::new(file_number, file_size, smallest, largest)));
                }
            }
        }

        Ok(edit)
    }
}

fn decode_field(cursor: &mut &[u8], what: &str) -> Result<u64> {
    decode_varint64(cursor).ok_or_else(|| Error::corruption(format!("truncated {}", what)))
}

fn decode_level(cursor: &mut &[u8]) -> Result<usize> {
    let level = decode_field(cursor, "level")? as usize;
    if level >= MAX_LEVELS {
        return Err(Error::corruption("invalid level in edit"));
    }
    Ok(level)
}

fn decode_internal_key(cursor: &mut &[u8], what: &str) -> Result<InternalKey> {
    let raw = decode_length_prefixed(cursor)
        .ok_or_else(|| Error::corruption(format!("truncated {}", what)))?;
    InternalKey::decode(raw).ok_or_else(|| Error::corruption(format!("invalid {}", what)))
}
