//! Configuration options for repair.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::cache::TableCache;
use crate::sstable::CompressionType;
use crate::util::comparator::{BytewiseComparator, Comparator};

/// Maximum number of levels in the LSM tree.
pub const MAX_LEVELS: usize = 7;

/// Default data-block target size (4KB).
pub const DEFAULT_BLOCK_SIZE: usize = 4 * 1024;

/// Default bloom filter bits per key.
pub const DEFAULT_BLOOM_BITS_PER_KEY: usize = 10;

/// Capacity of the table cache the repair creates when the caller does not
/// share one. Small, since every table is opened exactly once.
pub const REPAIR_TABLE_CACHE_CAPACITY: usize = 100;

/// Durability mode for files written during repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Sync on every write (safest, slowest).
    #[default]
    Always,
    /// Let OS decide when to sync.
    None,
}

/// Repair configuration.
///
/// Everything defaults to the values the engine itself uses; the locality
/// group list defaults to the single group `{0}`.
#[derive(Clone)]
pub struct Options {
    /// User key comparator. Its name is recorded in every synthesized
    /// descriptor.
    pub comparator: Arc<dyn Comparator>,

    /// Bloom filter bits per key for tables built during repair
    /// (0 to disable).
    pub bloom_filter_bits_per_key: usize,

    /// Compression for data blocks of tables built during repair.
    pub compression: CompressionType,

    /// Target size for data blocks of tables built during repair.
    pub block_size: usize,

    /// Shared table cache. When `None`, the repair creates its own small
    /// cache and releases it when done.
    pub table_cache: Option<Arc<TableCache>>,

    /// Locality groups present in the database. `None` means `{0}`.
    pub exist_lg_list: Option<BTreeSet<u32>>,

    /// Durability mode for files the repair writes.
    pub sync_mode: SyncMode,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            comparator: Arc::new(BytewiseComparator::new()),
            bloom_filter_bits_per_key: DEFAULT_BLOOM_BITS_PER_KEY,
            compression: CompressionType::default(),
            block_size: DEFAULT_BLOCK_SIZE,
            table_cache: None,
            exist_lg_list: None,
            sync_mode: SyncMode::default(),
        }
    }
}

impl Options {
    /// Create new options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// The locality groups to repair, defaulting to `{0}`.
    pub fn locality_groups(&self) -> BTreeSet<u32> {
        match &self.exist_lg_list {
            Some(list) if !list.is_empty() => list.clone(),
            _ => BTreeSet::from([0]),
        }
    }

    /// Validate the options.
    pub fn validate(&self) -> crate::Result<()> {
        if self.block_size < 256 {
            return Err(crate::Error::InvalidArgument(
                "block_size must be at least 256 bytes".into(),
            ));
        }
        Ok(())
    }
}
