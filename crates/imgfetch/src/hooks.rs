//! # Load Hooks
//!
//! Caller-supplied extension points of a load. All of them are optional and
//! live together in [`LoadHooks`].
//!
//! | Hook | Input | Output |
//! |---|---|---|
//! | [`UrlResolver`] | logical URL | URL actually fetched, or an error that fails the load without retry |
//! | [`BytesProcessor`] (pre) | bytes fresh from the network | replacement bytes, `None` for unchanged; runs before the disk write |
//! | [`BytesProcessor`] (post) | bytes about to be returned | replacement bytes, `None` for unchanged |
//! | [`ProgressSink`] | bytes received, total if known | nothing |
//! | [`LoadListener`] | outcome of the load | nothing |
//!
//! A processor that fails is treated as returning `None`; the failure is
//! logged and the load carries on.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{FetchError, HookError};

/// Maps a logical URL to the URL that is actually requested
#[async_trait]
pub trait UrlResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> Result<String, HookError>;
}

/// Transforms payload bytes
#[async_trait]
pub trait BytesProcessor: Send + Sync {
    async fn process(&self, data: Bytes) -> Result<Option<Bytes>, HookError>;
}

/// Receives download progress. `total` is `None` when the length is unknown.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, received: u64, total: Option<u64>);
}

impl<F> ProgressSink for F
where
    F: Fn(u64, Option<u64>) + Send + Sync,
{
    fn on_progress(&self, received: u64, total: Option<u64>) {
        self(received, total)
    }
}

/// Lifecycle notifications of a load
pub trait LoadListener: Send + Sync {
    fn on_loaded(&self, _data: &Bytes) {}

    /// Fired for cache hits, memory layer included
    fn on_loaded_from_disk_cache(&self, _data: &Bytes) {}

    fn on_load_failed(&self, _error: &FetchError) {}
}

#[derive(Clone, Default)]
pub struct LoadHooks {
    pub url_resolver: Option<Arc<dyn UrlResolver>>,
    pub pre_process: Option<Arc<dyn BytesProcessor>>,
    pub post_process: Option<Arc<dyn BytesProcessor>>,
    pub progress: Option<Arc<dyn ProgressSink>>,
    pub listener: Option<Arc<dyn LoadListener>>,
}

impl LoadHooks {
    pub fn with_url_resolver(mut self, resolver: Arc<dyn UrlResolver>) -> Self {
        self.url_resolver = Some(resolver);
        self
    }

    pub fn with_pre_process(mut self, processor: Arc<dyn BytesProcessor>) -> Self {
        self.pre_process = Some(processor);
        self
    }

    pub fn with_post_process(mut self, processor: Arc<dyn BytesProcessor>) -> Self {
        self.post_process = Some(processor);
        self
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn LoadListener>) -> Self {
        self.listener = Some(listener);
        self
    }
}

impl fmt::Debug for LoadHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadHooks")
            .field("url_resolver", &self.url_resolver.is_some())
            .field("pre_process", &self.pre_process.is_some())
            .field("post_process", &self.post_process.is_some())
            .field("progress", &self.progress.is_some())
            .field("listener", &self.listener.is_some())
            .finish()
    }
}
