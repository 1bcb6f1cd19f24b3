//! Core types for lgdb: internal keys and locality-group write batches.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::util::coding::{
    decode_length_prefixed, decode_varint32, encode_length_prefixed, encode_varint32,
};
use crate::{Error, Result};

/// Value type indicator in internal keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueType {
    /// Normal value.
    Value = 1,
    /// Deletion marker (tombstone).
    Deletion = 2,
}

impl ValueType {
    /// Create from byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(ValueType::Value),
            2 => Some(ValueType::Deletion),
            _ => None,
        }
    }

    /// Convert to byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Check if this is a deletion marker.
    pub fn is_deletion(&self) -> bool {
        matches!(self, ValueType::Deletion)
    }
}

/// Internal key format used for storage.
///
/// An internal key combines:
/// - User key (the key provided by the user)
/// - Sequence number (write ordering across the whole database)
/// - Value type (Value or Deletion)
///
/// Encoded format:
/// ```text
/// [user_key][packed_sequence_type (8 bytes)]
/// ```
///
/// The sequence and value_type are packed into 8 big-endian bytes with
/// sequence in the high 56 bits and value_type in the low 8 bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalKey {
    /// The user-provided key.
    user_key: Bytes,
    /// Sequence number.
    sequence: u64,
    /// Value type.
    value_type: ValueType,
}

impl InternalKey {
    /// Maximum sequence number (56 bits).
    pub const MAX_SEQUENCE: u64 = (1 << 56) - 1;

    /// Create a new internal key.
    pub fn new(user_key: impl Into<Bytes>, sequence: u64, value_type: ValueType) -> Self {
        debug_assert!(sequence <= Self::MAX_SEQUENCE);
        Self {
            user_key: user_key.into(),
            sequence,
            value_type,
        }
    }

    /// Create an internal key for a put operation.
    pub fn for_value(user_key: impl Into<Bytes>, sequence: u64) -> Self {
        Self::new(user_key, sequence, ValueType::Value)
    }

    /// Create an internal key for a delete operation.
    pub fn for_deletion(user_key: impl Into<Bytes>, sequence: u64) -> Self {
        Self::new(user_key, sequence, ValueType::Deletion)
    }

    /// Get the user key.
    pub fn user_key(&self) -> &[u8] {
        &self.user_key
    }

    /// Get the sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Get the value type.
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Check if this is a deletion marker.
    pub fn is_deletion(&self) -> bool {
        self.value_type.is_deletion()
    }

    /// Encode the internal key to bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.user_key.len() + 8);
        self.encode_to(&mut buf);
        buf.freeze()
    }

    /// Encode into an existing buffer.
    pub fn encode_to(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.user_key);
        let packed = (self.sequence << 8) | (self.value_type.to_byte() as u64);
        buf.put_u64(packed);
    }

    /// Decode an internal key from bytes.
    ///
    /// Returns `None` for buffers too short to carry the packed trailer or
    /// with an unknown value-type byte; the repair treats such keys as
    /// unparsable and skips them.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }

        let user_key_len = data.len() - 8;
        let user_key = Bytes::copy_from_slice(&data[..user_key_len]);

        let mut packed_bytes = &data[user_key_len..];
        let packed = packed_bytes.get_u64();

        let value_type = ValueType::from_byte((packed & 0xFF) as u8)?;
        let sequence = packed >> 8;

        Some(Self {
            user_key,
            sequence,
            value_type,
        })
    }

    /// Get the encoded length.
    pub fn encoded_len(&self) -> usize {
        self.user_key.len() + 8
    }
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.user_key.cmp(&other.user_key) {
            Ordering::Equal => {
                // For the same user key, newer entries sort first.
                match other.sequence.cmp(&self.sequence) {
                    Ordering::Equal => other
                        .value_type
                        .to_byte()
                        .cmp(&self.value_type.to_byte()),
                    ord => ord,
                }
            }
            ord => ord,
        }
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A single mutation in a write batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    /// Locality group this mutation belongs to.
    pub lg_id: u32,
    /// The key to write.
    pub key: Bytes,
    /// The value (None for deletion).
    pub value: Option<Bytes>,
}

/// A batch of mutations applied atomically, tagged per locality group.
///
/// All locality groups share one sequence-number space: the batch header
/// carries the starting sequence, and the i-th mutation is applied at
/// `sequence + i`.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    /// Starting sequence number for this batch.
    sequence: u64,
    /// Mutation count as carried in the header.
    count: u32,
    /// The mutations in this batch.
    entries: Vec<BatchEntry>,
}

/// Encoded batch header: sequence (8 bytes) + count (4 bytes).
pub const BATCH_HEADER_SIZE: usize = 12;

impl WriteBatch {
    /// Create a new empty write batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a put operation for the given locality group.
    pub fn put(&mut self, lg_id: u32, key: impl Into<Bytes>, value: impl Into<Bytes>) {
        self.entries.push(BatchEntry {
            lg_id,
            key: key.into(),
            value: Some(value.into()),
        });
        self.count += 1;
    }

    /// Add a delete operation for the given locality group.
    pub fn delete(&mut self, lg_id: u32, key: impl Into<Bytes>) {
        self.entries.push(BatchEntry {
            lg_id,
            key: key.into(),
            value: None,
        });
        self.count += 1;
    }

    /// Get the starting sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Set the starting sequence number.
    pub fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    /// Get the mutation count as carried in the header.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Get the entries.
    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    /// Iterate over entries.
    pub fn iter(&self) -> impl Iterator<Item = &BatchEntry> {
        self.entries.iter()
    }

    /// Encode the batch for the WAL.
    ///
    /// Format:
    /// ```text
    /// [sequence (8 bytes)][count (4 bytes)]
    /// [entry1: lg_id (varint) | type (1) | key_len (varint) | key
    ///          | value_len (varint) | value]
    /// [entry2: ...]
    /// ```
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(BATCH_HEADER_SIZE + self.entries.len() * 16);

        buf.put_u64(self.sequence);
        buf.put_u32(self.count);

        for entry in &self.entries {
            encode_varint32(&mut buf, entry.lg_id);
            if let Some(ref value) = entry.value {
                buf.put_u8(ValueType::Value.to_byte());
                encode_length_prefixed(&mut buf, &entry.key);
                encode_length_prefixed(&mut buf, value);
            } else {
                buf.put_u8(ValueType::Deletion.to_byte());
                encode_length_prefixed(&mut buf, &entry.key);
            }
        }

        buf.freeze()
    }

    /// Decode a batch from a WAL record.
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < BATCH_HEADER_SIZE {
            return Err(Error::corruption("batch record too small"));
        }

        let sequence = data.get_u64();
        let count = data.get_u32();

        let mut batch = WriteBatch {
            sequence,
            count,
            entries: Vec::with_capacity(count as usize),
        };

        for _ in 0..count {
            let lg_id = decode_varint32(&mut data)
                .ok_or_else(|| Error::corruption("truncated locality group tag"))?;

            if data.is_empty() {
                return Err(Error::corruption("unexpected end of batch"));
            }
            let value_type = ValueType::from_byte(data.get_u8())
                .ok_or_else(|| Error::corruption("invalid value type in batch"))?;

            let key = decode_length_prefixed(&mut data)
                .ok_or_else(|| Error::corruption("batch key truncated"))?;
            let key = Bytes::copy_from_slice(key);

            let value = match value_type {
                ValueType::Value => {
                    let value = decode_length_prefixed(&mut data)
                        .ok_or_else(|| Error::corruption("batch value truncated"))?;
                    Some(Bytes::copy_from_slice(value))
                }
                ValueType::Deletion => None,
            };

            batch.entries.push(BatchEntry { lg_id, key, value });
        }

        Ok(batch)
    }

    /// Split the batch into one sub-batch per locality group.
    ///
    /// Every sub-batch is stamped with this batch's starting sequence, so
    /// the locality groups keep sharing the sequence-number space. Each
    /// sub-batch's header count is its own mutation count.
    pub fn separate_locality_groups(&self) -> BTreeMap<u32, WriteBatch> {
        let mut split: BTreeMap<u32, WriteBatch> = BTreeMap::new();

        for entry in &self.entries {
            let sub = split.entry(entry.lg_id).or_insert_with(|| {
                let mut b = WriteBatch::new();
                b.set_sequence(self.sequence);
                b
            });
            sub.entries.push(entry.clone());
            sub.count += 1;
        }

        split
    }
}
