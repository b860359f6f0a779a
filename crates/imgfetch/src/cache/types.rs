//! # Cache Types
//!
//! This module defines common types used across the caching system.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Namespace used when the caller does not name one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Retention policy for one cache namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheRule {
    /// Subdirectory of the cache this rule governs
    pub namespace: String,
    /// Maximum number of entries retained
    pub max_count: Option<usize>,
    /// Maximum aggregate payload size in bytes
    pub max_size: Option<u64>,
    /// Maximum lifetime of an entry, counted from when it was written
    pub max_age: Option<Duration>,
}

impl Default for CacheRule {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_owned(),
            max_count: None,
            max_size: None,
            max_age: None,
        }
    }
}

impl CacheRule {
    /// Unbounded rule for the given namespace
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    pub fn with_max_count(mut self, max_count: usize) -> Self {
        self.max_count = Some(max_count);
        self
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Whether an entry of `size` bytes can be kept at all under this rule
    pub fn admits(&self, size: u64) -> bool {
        self.max_count != Some(0) && self.max_size.is_none_or(|max| size <= max)
    }

    /// Whether an entry created at `created_at` has outlived `max_age`
    pub fn is_expired(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let Some(max_age) = self.max_age else {
            return false;
        };
        let age = now.signed_duration_since(created_at);
        // Entries stamped in the future (clock skew) are treated as fresh
        match age.to_std() {
            Ok(age) => age > max_age,
            Err(_) => false,
        }
    }
}

/// Sidecar record persisted next to each cached payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheMetadata {
    /// Size of the cached payload in bytes
    pub size: u64,
    /// When the payload was written
    pub created_at: DateTime<Utc>,
    /// When the payload was last read or written
    pub touched_at: DateTime<Utc>,
}

impl CacheMetadata {
    /// Metadata for a payload written now
    pub fn new(size: u64) -> Self {
        let now = Utc::now();
        Self {
            size,
            created_at: now,
            touched_at: now,
        }
    }

    /// Copy with `touched_at` moved to `now`
    pub fn touched(&self, now: DateTime<Utc>) -> Self {
        Self {
            touched_at: now,
            ..self.clone()
        }
    }
}

/// One stored object as seen by the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Identifier derived from the source URL
    pub id: String,
    /// Location of the payload file
    pub path: PathBuf,
    /// Payload length in bytes
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub touched_at: DateTime<Utc>,
}

impl CacheEntry {
    pub(crate) fn from_metadata(id: String, path: PathBuf, metadata: &CacheMetadata) -> Self {
        Self {
            id,
            path,
            size: metadata.size,
            created_at: metadata.created_at,
            touched_at: metadata.touched_at,
        }
    }
}

/// Result of a cache operation
pub type CacheResult<T> = std::result::Result<T, std::io::Error>;

/// Reject namespace names that would escape the cache base directory
pub(crate) fn validate_namespace(namespace: &str) -> CacheResult<()> {
    let valid = !namespace.is_empty()
        && namespace != "."
        && namespace != ".."
        && !namespace.contains(['/', '\\', '\0']);

    if valid {
        Ok(())
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("Invalid cache namespace: {namespace:?}"),
        ))
    }
}
