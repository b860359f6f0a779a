//! # Cache System
//!
//! Content-addressed storage for fetched payloads: a rule-governed disk cache
//! partitioned into namespaces, plus an optional in-memory layer.

// Module declarations
mod disk;
mod key;
mod memory;
pub mod rule;
mod types;

pub use disk::DiskCache;
pub use key::identifier_for;
pub use memory::MemoryCache;
pub use rule::plan_eviction;
pub use types::{
    CacheEntry, CacheMetadata, CacheResult, CacheRule, DEFAULT_NAMESPACE,
};
