//! # Image Loader
//!
//! Resolves the bytes for a [`LoadRequest`]: memory layer, disk cache,
//! network, with the caller's processing hooks around the network path.
//!
//! ```text
//! Idle -> ResolvingKey -> DiskLookup --hit--> PostProcessing -> Done
//!                             |miss
//!                             v
//!                        RemoteFetch -> (pre-process, save) -> PostProcessing -> Done
//!                             |error
//!                             v
//!                           Failed
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheResult, DiskCache, MemoryCache};
use crate::fetcher::RemoteFetcher;
use crate::hooks::BytesProcessor;
use crate::{FetchConfig, FetchError, LoadRequest};

/// Where the returned bytes came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Memory,
    DiskCache,
    Network,
}

/// Stages of a single load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    ResolvingKey,
    DiskLookup,
    RemoteFetch,
    PostProcessing,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Cache identifier of the request
    pub id: String,
    pub bytes: Bytes,
    pub source: LoadSource,
}

#[derive(Clone)]
pub struct ImageLoader {
    fetcher: RemoteFetcher,
    disk_cache: Arc<DiskCache>,
    memory_cache: Option<MemoryCache>,
}

impl ImageLoader {
    /// Build a loader (HTTP client, disk cache, optional memory layer) from `config`
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let fetcher = RemoteFetcher::from_config(config)?;
        let disk_cache = Arc::new(DiskCache::new(config.cache_dir()));
        let memory_cache = MemoryCache::new(config.memory_cache_size);

        Ok(Self::with_parts(fetcher, disk_cache, memory_cache))
    }

    pub fn with_parts(
        fetcher: RemoteFetcher,
        disk_cache: Arc<DiskCache>,
        memory_cache: Option<MemoryCache>,
    ) -> Self {
        Self {
            fetcher,
            disk_cache,
            memory_cache,
        }
    }

    pub fn disk_cache(&self) -> &Arc<DiskCache> {
        &self.disk_cache
    }

    pub fn memory_cache(&self) -> Option<&MemoryCache> {
        self.memory_cache.as_ref()
    }

    /// Load the bytes for `request`.
    ///
    /// Only resolution failures, skipped statuses, exhausted retries and
    /// cancellation fail the load. Cache I/O and hook failures are logged
    /// and the load continues without them. On failure the listener's
    /// `on_load_failed` fires and the caller picks a fallback.
    pub async fn load(
        &self,
        request: &LoadRequest,
        cancel: &CancellationToken,
    ) -> Result<LoadedImage, FetchError> {
        let result = self.run(request, cancel).await;

        if let Err(e) = &result {
            enter(&request.url, LoadState::Failed);
            warn!(url = %request.url, error = %e, "Image load failed");
            if let Some(listener) = &request.hooks.listener {
                listener.on_load_failed(e);
            }
        }

        result
    }

    async fn run(
        &self,
        request: &LoadRequest,
        cancel: &CancellationToken,
    ) -> Result<LoadedImage, FetchError> {
        let url = request.url.as_str();
        let hooks = &request.hooks;
        enter(url, LoadState::Idle);

        enter(url, LoadState::ResolvingKey);
        let id = request.identifier();

        if let Some(bytes) = self.recall(request, &id).await {
            debug!(url, id = %id, "Memory cache hit");
            if let Some(listener) = &hooks.listener {
                listener.on_loaded_from_disk_cache(&bytes);
            }
            enter(url, LoadState::Done);
            return Ok(LoadedImage {
                id,
                bytes,
                source: LoadSource::Memory,
            });
        }

        if let Some(rule) = &request.cache_rule {
            enter(url, LoadState::DiskLookup);
            match self.disk_cache.load(&id, rule).await {
                Ok(Some(cached)) => {
                    enter(url, LoadState::PostProcessing);
                    let bytes = process(hooks.post_process.as_ref(), cached, "post", url).await;
                    self.remember(request, &bytes).await;
                    if let Some(listener) = &hooks.listener {
                        listener.on_loaded_from_disk_cache(&bytes);
                    }
                    info!(url, id = %id, size = bytes.len(), "Loaded image from disk cache");
                    enter(url, LoadState::Done);
                    return Ok(LoadedImage {
                        id,
                        bytes,
                        source: LoadSource::DiskCache,
                    });
                }
                Ok(None) => debug!(url, id = %id, "Disk cache miss"),
                Err(e) => warn!(url, id = %id, error = %e, "Disk cache read failed, fetching from network"),
            }
        }

        enter(url, LoadState::RemoteFetch);
        let fetched = self
            .fetcher
            .fetch(
                url,
                &request.headers,
                &request.retry,
                hooks.progress.as_deref(),
                hooks.url_resolver.as_deref(),
                cancel,
            )
            .await?;

        let fetched = process(hooks.pre_process.as_ref(), fetched, "pre", url).await;

        if let Some(rule) = &request.cache_rule {
            // Nothing is written once the load has been cancelled
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            match self.disk_cache.save(&id, fetched.clone(), rule).await {
                Ok(Some(entry)) => debug!(url, id = %id, path = ?entry.path, "Saved image to disk cache"),
                Ok(None) => debug!(url, id = %id, "Cache rule declined to retain image"),
                Err(e) => warn!(url, id = %id, error = %e, "Failed to save image to disk cache"),
            }
        }

        enter(url, LoadState::PostProcessing);
        let bytes = process(hooks.post_process.as_ref(), fetched, "post", url).await;
        self.remember(request, &bytes).await;

        if let Some(listener) = &hooks.listener {
            listener.on_loaded(&bytes);
        }
        info!(url, id = %id, size = bytes.len(), "Loaded image from network");
        enter(url, LoadState::Done);

        Ok(LoadedImage {
            id,
            bytes,
            source: LoadSource::Network,
        })
    }

    /// Network fetch only: no cache lookup or write and no processing hooks
    pub async fn fetch_only(
        &self,
        request: &LoadRequest,
        cancel: &CancellationToken,
    ) -> Result<Bytes, FetchError> {
        self.fetcher
            .fetch(
                &request.url,
                &request.headers,
                &request.retry,
                request.hooks.progress.as_deref(),
                request.hooks.url_resolver.as_deref(),
                cancel,
            )
            .await
    }

    /// Path of the cached file for `request`, if one is live
    pub async fn cached_path(&self, request: &LoadRequest) -> Option<PathBuf> {
        let rule = request.cache_rule.as_ref()?;
        match self.disk_cache.entry_path(&request.identifier(), rule).await {
            Ok(path) => path,
            Err(e) => {
                warn!(url = %request.url, error = %e, "Failed to look up cached file");
                None
            }
        }
    }

    pub async fn is_cached(&self, request: &LoadRequest) -> bool {
        self.cached_path(request).await.is_some()
    }

    /// Clear one namespace of the disk cache (or all of it) and the memory layer
    pub async fn clear_disk_cache(&self, namespace: Option<&str>) -> CacheResult<()> {
        if let Some(memory) = &self.memory_cache {
            memory.clear();
        }
        self.disk_cache.clear(namespace).await
    }

    /// Memory layer lookup. With disk caching on, a memory entry is only
    /// served while its disk entry is still live under the request's rule.
    async fn recall(&self, request: &LoadRequest, id: &str) -> Option<Bytes> {
        let memory = self.memory_cache.as_ref()?;
        let key = request.key();
        let bytes = memory.get(&key).await?;

        let Some(rule) = &request.cache_rule else {
            return Some(bytes);
        };
        match self.disk_cache.contains(id, rule).await {
            Ok(true) => Some(bytes),
            Ok(false) => {
                debug!(url = %request.url, id, "Disk entry gone, dropping memory copy");
                memory.remove(&key).await;
                None
            }
            Err(e) => {
                warn!(url = %request.url, id, error = %e, "Disk cache check failed, dropping memory copy");
                memory.remove(&key).await;
                None
            }
        }
    }

    async fn remember(&self, request: &LoadRequest, bytes: &Bytes) {
        if let Some(memory) = &self.memory_cache {
            memory.insert(request.key(), bytes.clone()).await;
        }
    }
}

fn enter(url: &str, state: LoadState) {
    debug!(url, ?state, "Load state");
}

/// Run a processing hook; a failing hook leaves the bytes unchanged
async fn process(
    processor: Option<&Arc<dyn BytesProcessor>>,
    data: Bytes,
    stage: &'static str,
    url: &str,
) -> Bytes {
    let Some(processor) = processor else {
        return data;
    };

    match processor.process(data.clone()).await {
        Ok(Some(processed)) => processed,
        Ok(None) => data,
        Err(e) => {
            warn!(url, stage, error = %e, "Processing hook failed, keeping unprocessed bytes");
            data
        }
    }
}
