//! Caching infrastructure.
//!
//! - **LRU Cache**: Generic LRU cache with configurable capacity
//! - **Table Cache**: Caches open table reader handles, keyed by path

mod lru;
mod table_cache;

pub use lru::LruCache;
pub use table_cache::{CachedTable, TableCache};
