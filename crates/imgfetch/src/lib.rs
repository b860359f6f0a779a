//! # imgfetch
//!
//! A library for fetching network images with retry and a rule-driven disk
//! cache. It stops at raw bytes: decoding and display belong to the caller.
//!
//! ## Features
//!
//! - Retrying HTTP fetch with exponential backoff and a status-code skip list
//! - Stable SHA-256 cache identifiers derived from the URL
//! - Namespaced disk cache bounded by entry count, total size and age
//! - Pre/post-processing hooks, URL resolution and progress reporting
//! - Cooperative cancellation of in-flight loads
//!
//! ```no_run
//! use imgfetch_engine::{CacheRule, FetchConfig, ImageLoader, LoadRequest};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), imgfetch_engine::FetchError> {
//! let loader = ImageLoader::new(&FetchConfig::default())?;
//! let request = LoadRequest::new("https://example.com/cat.png")
//!     .with_cache_rule(CacheRule::new("avatars").with_max_count(500));
//!
//! let image = loader.load(&request, &CancellationToken::new()).await?;
//! println!("{} bytes from {:?}", image.bytes.len(), image.source);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod hooks;
pub mod loader;
pub mod request;

pub use builder::FetchConfigBuilder;
pub use cache::{CacheEntry, CacheRule, DiskCache, MemoryCache, identifier_for};
pub use config::{FetchConfig, RetryPolicy};
pub use error::{FetchError, HookError};
pub use fetcher::{RemoteFetcher, create_client};
pub use hooks::{BytesProcessor, LoadHooks, LoadListener, ProgressSink, UrlResolver};
pub use loader::{ImageLoader, LoadSource, LoadState, LoadedImage};
pub use request::{LoadRequest, RequestKey};
