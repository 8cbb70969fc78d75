//! Generic result cache for the data-sync layer.
//!
//! This module provides a resource-agnostic caching mechanism that:
//! - Stores JSON values under flattened string keys with optional expiry
//! - Treats expired entries as absent on read
//! - Invalidates entries by regular expression over the flattened key
//! - Optionally mirrors entries into SQLite so they survive restarts

mod entry;
mod key;
mod storage;

pub use entry::{CacheEntry, ResultCache};
pub use key::{flatten, InvalidationPattern, QueryKey, KEY_DELIMITER};
pub use storage::{CacheStorage, NoopStorage, SqliteStorage};
