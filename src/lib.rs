//! # lgdb
//!
//! Repair toolkit for multi-locality-group LSM-tree databases.
//!
//! A database partitions its keys into **locality groups**, each stored as
//! an independent sub-LSM under a subdirectory named by the group id, while
//! all groups share one write-ahead-log stream and one sequence-number
//! space. When a group's descriptor (manifest) is lost or corrupt, the
//! database can no longer open; [`repair`] rebuilds a consistent descriptor
//! for every group from the artifacts that survive on disk.
//!
//! ## What repair does
//!
//! - Scans every surviving table for its key range and largest sequence
//!   number
//! - Replays the shared write-ahead logs, dropping batches already covered
//!   by a surviving table and splitting the rest per locality group
//! - Flushes the replayed mutations to new level-0 tables
//! - Synthesizes and atomically installs a fresh descriptor per group
//!
//! Files that cannot be salvaged are quarantined under `lost/` instead of
//! failing the run.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lgdb::{repair, Options};
//!
//! // Rebuild descriptors for the database at ./my_data
//! repair("./my_data", Options::default())?;
//! ```

// Public modules
pub mod error;
pub mod options;
pub mod types;

// Storage layers the repair drives
pub mod cache;
pub mod memtable;
pub mod sstable;
pub mod util;
pub mod version;
pub mod wal;

// The repair core
mod repair;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use options::{Options, SyncMode};
pub use repair::repair;
pub use types::{InternalKey, ValueType, WriteBatch};

pub use cache::TableCache;
pub use sstable::{CompressionType, TableBuilder, TableReader};
pub use util::comparator::{BytewiseComparator, Comparator};
pub use version::{ManifestReader, VersionEdit};
