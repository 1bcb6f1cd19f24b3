//! MemTable - In-memory sorted buffer for replayed writes.
//!
//! During repair, each locality group accumulates the mutations recovered
//! from the shared write-ahead logs in a memtable, then flushes it to a
//! fresh table file once the log is exhausted.
//!
//! # Design
//!
//! - Uses `crossbeam-skiplist` for sorted storage
//! - Keys are encoded `InternalKey`s (user_key + sequence + type)
//! - Values are raw bytes; deletions store an empty value under a
//!   Deletion-kind key
//! - Iteration returns entries in encoded-key order, which is the order
//!   the table builder requires

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::types::{InternalKey, ValueType, WriteBatch};

/// In-memory sorted buffer keyed by encoded internal key.
#[derive(Debug)]
pub struct MemTable {
    /// The underlying skip list.
    /// Key: encoded InternalKey, Value: raw bytes (empty for deletions).
    table: SkipMap<Bytes, Bytes>,

    /// Approximate memory usage in bytes.
    approximate_memory_usage: AtomicUsize,

    /// Maximum sequence number applied to this memtable.
    max_sequence: AtomicU64,

    /// Number of entries.
    entry_count: AtomicUsize,
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MemTable {
    /// Create a new empty MemTable.
    pub fn new() -> Self {
        Self {
            table: SkipMap::new(),
            approximate_memory_usage: AtomicUsize::new(0),
            max_sequence: AtomicU64::new(0),
            entry_count: AtomicUsize::new(0),
        }
    }

    /// Apply a write batch starting at the given sequence number.
    ///
    /// The i-th mutation of the batch is applied at `sequence + i`, so a
    /// batch occupies the contiguous sequence range
    /// `[sequence, sequence + len)`.
    pub fn insert_batch(&self, batch: &WriteBatch, sequence: u64) {
        for (i, entry) in batch.iter().enumerate() {
            let seq = sequence + i as u64;
            match &entry.value {
                Some(value) => {
                    let key = InternalKey::new(entry.key.clone(), seq, ValueType::Value);
                    self.insert(&key, value);
                }
                None => {
                    let key = InternalKey::new(entry.key.clone(), seq, ValueType::Deletion);
                    self.insert(&key, &Bytes::new());
                }
            }
        }
    }

    /// Insert a single entry.
    fn insert(&self, key: &InternalKey, value: &Bytes) {
        let encoded_key = key.encode();

        let entry_size = encoded_key.len() + value.len() + 64;
        self.approximate_memory_usage
            .fetch_add(entry_size, Ordering::Relaxed);

        self.max_sequence.fetch_max(key.sequence(), Ordering::Relaxed);

        self.table.insert(encoded_key, value.clone());
        self.entry_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get approximate memory usage in bytes.
    pub fn approximate_memory_usage(&self) -> usize {
        self.approximate_memory_usage.load(Ordering::Relaxed)
    }

    /// Get the number of entries.
    pub fn entry_count(&self) -> usize {
        self.entry_count.load(Ordering::Relaxed)
    }

    /// Check if the memtable is empty.
    pub fn is_empty(&self) -> bool {
        self.entry_count() == 0
    }

    /// Get the maximum sequence number applied, or 0 if empty.
    pub fn max_sequence(&self) -> u64 {
        self.max_sequence.load(Ordering::Relaxed)
    }

    /// Iterate over all entries in encoded-key order.
    pub fn iter(&self) -> impl Iterator<Item = (InternalKey, Bytes)> + '_ {
        self.table.iter().filter_map(|entry| {
            InternalKey::decode(entry.key()).map(|key| (key, entry.value().clone()))
        })
    }

    /// Iterate over raw encoded keys and values in encoded-key order.
    pub fn iter_encoded(&self) -> impl Iterator<Item = (Bytes, Bytes)> + '_ {
        self.table
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
    }
}
