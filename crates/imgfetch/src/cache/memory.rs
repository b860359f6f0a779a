//! # Memory Cache
//!
//! Optional in-process layer in front of the disk cache, keyed by the full
//! [`RequestKey`] rather than by URL alone. Owned by the loader that uses it;
//! there is no process-wide instance.

use bytes::Bytes;
use moka::future::Cache as MokaCache;
use tracing::{debug, warn};

use crate::request::RequestKey;

#[derive(Clone)]
pub struct MemoryCache {
    cache: MokaCache<RequestKey, Bytes>,
    /// Maximum size for this cache in bytes
    max_size: u64,
}

impl MemoryCache {
    /// Create a memory cache bounded by `max_size_bytes` of payload.
    /// Returns `None` for a zero capacity.
    pub fn new(max_size_bytes: u64) -> Option<Self> {
        if max_size_bytes == 0 {
            return None;
        }

        let cache = MokaCache::builder()
            .weigher(|_k, v: &Bytes| v.len().try_into().unwrap_or(u32::MAX))
            .max_capacity(max_size_bytes)
            .build();

        debug!(max_size = max_size_bytes, "Memory cache created with size limit");

        Some(Self {
            cache,
            max_size: max_size_bytes,
        })
    }

    pub async fn get(&self, key: &RequestKey) -> Option<Bytes> {
        self.cache.get(key).await
    }

    pub async fn insert(&self, key: RequestKey, data: Bytes) {
        let size = data.len() as u64;
        if size > self.max_size {
            warn!(
                url = %key.url,
                size,
                max_size = self.max_size,
                "Entry too large for memory cache, skipping"
            );
            return;
        }
        self.cache.insert(key, data).await;
    }

    pub async fn remove(&self, key: &RequestKey) {
        self.cache.invalidate(key).await;
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
        debug!("Memory cache cleared");
    }

    /// Apply pending evictions
    pub async fn sweep(&self) {
        self.cache.run_pending_tasks().await;
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }
}
