//! Versioned cache storage for offline support.
//!
//! This module provides the storage side of the agent:
//! - Named stores, one per cache generation
//! - Request/response entries keyed by URL, overwritten on re-insert
//! - Whole-generation deletion as the only eviction
//! - An atomic batch insert used when installing the manifest

mod memory;
mod storage;
mod traits;

pub use memory::MemoryStorage;
pub use storage::SqliteStorage;
pub use traits::{CacheStorage, CachedEntry, EntryInfo};
