//! # Disk Cache
//!
//! Persistent id -> bytes store. Each namespace is a subdirectory of the base
//! directory holding one payload file per id plus a JSON sidecar
//! (`<id>.meta`) with the size and timestamps eviction needs.
//!
//! Mutations of a namespace (writes, eviction, clearing) hold that
//! namespace's write lock; lookups share its read lock. All files are
//! written to a uniquely named temp file first and renamed into place.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::fs;
use tokio::io;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::key::is_identifier;
use crate::cache::rule::plan_eviction;
use crate::cache::types::{
    CacheEntry, CacheMetadata, CacheResult, CacheRule, validate_namespace,
};

const META_SUFFIX: &str = ".meta";
const TEMP_SUFFIX: &str = ".tmp";

/// Outcome of looking an id up in the catalog
enum Lookup {
    Hit(CacheMetadata),
    Miss,
    /// Present but unusable (expired, corrupt sidecar, missing payload)
    Stale,
}

/// Files found in a namespace directory
#[derive(Default)]
struct Scan {
    entries: Vec<CacheEntry>,
    /// Leftover temp files, orphaned payloads and unreadable sidecars
    junk: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct DiskCache {
    base_dir: PathBuf,
    locks: Arc<Mutex<HashMap<String, Arc<RwLock<()>>>>>,
}

impl DiskCache {
    /// Create a disk cache rooted at `base_dir`. Nothing is created until the first write.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn namespace_lock(&self, namespace: &str) -> Arc<RwLock<()>> {
        self.locks
            .lock()
            .entry(namespace.to_owned())
            .or_default()
            .clone()
    }

    fn namespace_dir(&self, namespace: &str) -> CacheResult<PathBuf> {
        validate_namespace(namespace)?;
        Ok(self.base_dir.join(namespace))
    }

    /// Create the namespace directory if it does not exist yet
    pub async fn ensure_namespace(&self, namespace: &str) -> CacheResult<PathBuf> {
        let dir = self.namespace_dir(namespace)?;
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Read the cached bytes for `id`, refreshing its access time on a hit.
    ///
    /// Expired or damaged entries are removed and reported as a miss.
    pub async fn load(&self, id: &str, rule: &CacheRule) -> CacheResult<Option<Bytes>> {
        check_id(id)?;
        let ns_dir = self.namespace_dir(&rule.namespace)?;
        let lock = self.namespace_lock(&rule.namespace);

        {
            let _guard = lock.read().await;
            match lookup(&ns_dir, id, rule).await? {
                Lookup::Hit(metadata) => match fs::read(data_path(&ns_dir, id)).await {
                    Ok(data) => {
                        let touched = metadata.touched(Utc::now());
                        if let Err(e) = write_metadata(&meta_path(&ns_dir, id), &touched).await {
                            warn!(id, error = %e, "Failed to refresh cache entry access time");
                        }
                        debug!(id, namespace = %rule.namespace, size = data.len(), "Disk cache hit");
                        return Ok(Some(Bytes::from(data)));
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                },
                Lookup::Miss => return Ok(None),
                Lookup::Stale => {}
            }
        }

        self.purge_stale(&ns_dir, id, rule).await?;
        Ok(None)
    }

    /// Whether a live entry exists for `id`
    pub async fn contains(&self, id: &str, rule: &CacheRule) -> CacheResult<bool> {
        Ok(self.entry_path(id, rule).await?.is_some())
    }

    /// Path of the payload file for `id`, if a live entry exists
    pub async fn entry_path(&self, id: &str, rule: &CacheRule) -> CacheResult<Option<PathBuf>> {
        check_id(id)?;
        let ns_dir = self.namespace_dir(&rule.namespace)?;
        let lock = self.namespace_lock(&rule.namespace);
        let _guard = lock.read().await;

        match lookup(&ns_dir, id, rule).await? {
            Lookup::Hit(_) => Ok(Some(data_path(&ns_dir, id))),
            Lookup::Miss | Lookup::Stale => Ok(None),
        }
    }

    /// Store `data` under `id` and run an eviction pass over the namespace.
    ///
    /// Returns `None` when the rule cannot retain the entry (a zero count
    /// bound or a size bound smaller than the payload); nothing is written in
    /// that case and any previous version of the entry is dropped.
    pub async fn save(
        &self,
        id: &str,
        data: Bytes,
        rule: &CacheRule,
    ) -> CacheResult<Option<CacheEntry>> {
        check_id(id)?;
        let ns_dir = self.namespace_dir(&rule.namespace)?;
        let lock = self.namespace_lock(&rule.namespace);
        let _guard = lock.write().await;
        // Under the lock, so a concurrent clear cannot remove it before the write
        fs::create_dir_all(&ns_dir).await?;

        let size = data.len() as u64;
        if !rule.admits(size) {
            debug!(
                id,
                size,
                max_size = ?rule.max_size,
                max_count = ?rule.max_count,
                "Cache rule cannot retain entry, skipping disk write"
            );
            remove_entry_files(&ns_dir, id).await?;
            return Ok(None);
        }

        let data_path = data_path(&ns_dir, id);
        let meta_path = meta_path(&ns_dir, id);
        let metadata = CacheMetadata::new(size);

        write_atomic(&data_path, &data).await?;
        if let Err(e) = write_metadata(&meta_path, &metadata).await {
            warn!(path = ?meta_path, error = %e, "Failed to write cache metadata file");
            let _ = fs::remove_file(&data_path).await;
            return Err(e);
        }

        let evicted = apply_locked(&ns_dir, rule, Some(id)).await?;
        if evicted.iter().any(|entry| entry.id == id) {
            debug!(id, "Fresh entry evicted by its own cache rule");
            return Ok(None);
        }

        debug!(id, namespace = %rule.namespace, size, "Successfully cached entry to disk");
        Ok(Some(CacheEntry::from_metadata(
            id.to_owned(),
            data_path,
            &metadata,
        )))
    }

    /// Run an eviction pass for `rule`, sparing `candidate` as long as possible.
    /// Returns the evicted entries.
    pub async fn apply(
        &self,
        rule: &CacheRule,
        candidate: Option<&str>,
    ) -> CacheResult<Vec<CacheEntry>> {
        let ns_dir = self.namespace_dir(&rule.namespace)?;
        let lock = self.namespace_lock(&rule.namespace);
        let _guard = lock.write().await;
        apply_locked(&ns_dir, rule, candidate).await
    }

    /// Explicit eviction pass with no protected entry
    pub async fn enforce(&self, rule: &CacheRule) -> CacheResult<Vec<CacheEntry>> {
        self.apply(rule, None).await
    }

    /// Catalog of live entries in a namespace, ordered by id
    pub async fn entries(&self, namespace: &str) -> CacheResult<Vec<CacheEntry>> {
        let ns_dir = self.namespace_dir(namespace)?;
        let lock = self.namespace_lock(namespace);
        let _guard = lock.read().await;

        let mut entries = scan(&ns_dir).await?.entries;
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    /// Namespaces currently present on disk
    pub async fn namespaces(&self) -> CacheResult<Vec<String>> {
        let mut dir = match fs::read_dir(&self.base_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut namespaces = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            if !item.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = item.file_name().to_str() {
                if validate_namespace(name).is_ok() {
                    namespaces.push(name.to_owned());
                }
            }
        }
        namespaces.sort();
        Ok(namespaces)
    }

    /// Total payload size of one namespace, or of the whole cache
    pub async fn total_size(&self, namespace: Option<&str>) -> CacheResult<u64> {
        let namespaces = match namespace {
            Some(ns) => vec![ns.to_owned()],
            None => self.namespaces().await?,
        };

        let mut total = 0;
        for ns in namespaces {
            total += self
                .entries(&ns)
                .await?
                .iter()
                .map(|entry| entry.size)
                .sum::<u64>();
        }
        Ok(total)
    }

    /// Remove entries that have not been touched within `window`.
    /// Returns the number of entries removed.
    pub async fn clear_older_than(
        &self,
        window: Duration,
        namespace: Option<&str>,
    ) -> CacheResult<usize> {
        let cutoff = chrono::Duration::from_std(window)
            .ok()
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let namespaces = match namespace {
            Some(ns) => vec![ns.to_owned()],
            None => self.namespaces().await?,
        };

        let mut removed = 0;
        for ns in namespaces {
            let ns_dir = self.namespace_dir(&ns)?;
            let lock = self.namespace_lock(&ns);
            let _guard = lock.write().await;

            for entry in scan(&ns_dir).await?.entries {
                if entry.touched_at < cutoff {
                    remove_entry_files(&ns_dir, &entry.id).await?;
                    removed += 1;
                }
            }
        }

        debug!(count = removed, ?window, "Removed stale cache entries");
        Ok(removed)
    }

    /// Remove every entry of `namespace`, or the whole cache when `None`
    pub async fn clear(&self, namespace: Option<&str>) -> CacheResult<()> {
        let namespaces = match namespace {
            Some(ns) => {
                validate_namespace(ns)?;
                vec![ns.to_owned()]
            }
            None => self.namespaces().await?,
        };

        let mut entry_count = 0;
        for ns in namespaces {
            let ns_dir = self.namespace_dir(&ns)?;
            let lock = self.namespace_lock(&ns);
            let _guard = lock.write().await;

            match fs::remove_dir_all(&ns_dir).await {
                Ok(()) => entry_count += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = ?ns_dir, error = %e, "Failed to remove cache namespace");
                    return Err(e);
                }
            }
        }

        debug!(count = entry_count, "Cleared cache namespaces");
        Ok(())
    }

    /// Periodically enforce `rules` until `cancel` fires
    pub fn start_maintenance_task(
        self: Arc<Self>,
        rules: Vec<CacheRule>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                for rule in &rules {
                    match self.enforce(rule).await {
                        Ok(evicted) if !evicted.is_empty() => {
                            info!(namespace = %rule.namespace, count = evicted.len(), "Cache maintenance evicted entries");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(namespace = %rule.namespace, error = %e, "Cache maintenance error");
                        }
                    }
                }
            }
            debug!("Cache maintenance task stopped");
        })
    }

    /// Re-check a stale entry under the write lock and drop it
    async fn purge_stale(&self, ns_dir: &Path, id: &str, rule: &CacheRule) -> CacheResult<()> {
        let lock = self.namespace_lock(&rule.namespace);
        let _guard = lock.write().await;

        // A writer may have replaced the entry since the read lock was released
        if let Lookup::Stale = lookup(ns_dir, id, rule).await? {
            debug!(id, namespace = %rule.namespace, "Removing stale cache entry");
            remove_entry_files(ns_dir, id).await?;
        }
        Ok(())
    }
}

fn check_id(id: &str) -> CacheResult<()> {
    if is_identifier(id) {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Invalid cache identifier: {id:?}"),
        ))
    }
}

fn data_path(ns_dir: &Path, id: &str) -> PathBuf {
    ns_dir.join(id)
}

fn meta_path(ns_dir: &Path, id: &str) -> PathBuf {
    ns_dir.join(format!("{id}{META_SUFFIX}"))
}

async fn lookup(ns_dir: &Path, id: &str, rule: &CacheRule) -> CacheResult<Lookup> {
    let metadata = match read_metadata(&meta_path(ns_dir, id)).await {
        Ok(Some(metadata)) => metadata,
        Ok(None) => return Ok(Lookup::Miss),
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            warn!(id, error = %e, "Failed to parse cache metadata");
            return Ok(Lookup::Stale);
        }
        Err(e) => return Err(e),
    };

    if rule.is_expired(metadata.created_at, Utc::now()) {
        return Ok(Lookup::Stale);
    }

    if !fs::try_exists(data_path(ns_dir, id)).await? {
        return Ok(Lookup::Stale);
    }

    Ok(Lookup::Hit(metadata))
}

async fn read_metadata(path: &Path) -> CacheResult<Option<CacheMetadata>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

async fn write_metadata(path: &Path, metadata: &CacheMetadata) -> CacheResult<()> {
    let metadata_json = serde_json::to_vec(metadata).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to serialize metadata: {e}"),
        )
    })?;
    write_atomic(path, &metadata_json).await
}

/// Write to a unique sibling temp file, then rename over `path`
async fn write_atomic(path: &Path, contents: &[u8]) -> CacheResult<()> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("entry");
    let temp_path = path.with_file_name(format!(
        "{file_name}.{}{TEMP_SUFFIX}",
        uuid::Uuid::new_v4().simple()
    ));

    if let Err(e) = fs::write(&temp_path, contents).await {
        warn!(path = ?temp_path, error = %e, "Failed to write cache temp file");
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }

    if let Err(e) = fs::rename(&temp_path, path).await {
        warn!(
            from = ?temp_path,
            to = ?path,
            error = %e,
            "Failed to rename temporary cache file"
        );
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }

    Ok(())
}

/// Remove the sidecar, then the payload. Missing files are fine.
async fn remove_entry_files(ns_dir: &Path, id: &str) -> CacheResult<()> {
    for path in [meta_path(ns_dir, id), data_path(ns_dir, id)] {
        remove_if_exists(&path).await?;
    }
    Ok(())
}

async fn remove_if_exists(path: &Path) -> CacheResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            warn!(path = ?path, error = %e, "Failed to remove cache file");
            Err(e)
        }
    }
}

async fn scan(ns_dir: &Path) -> CacheResult<Scan> {
    let mut dir = match fs::read_dir(ns_dir).await {
        Ok(dir) => dir,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Scan::default()),
        Err(e) => return Err(e),
    };

    let mut names = HashSet::new();
    while let Some(item) = dir.next_entry().await? {
        if !item.file_type().await?.is_file() {
            continue;
        }
        if let Some(name) = item.file_name().to_str() {
            names.insert(name.to_owned());
        }
    }

    let mut scan = Scan::default();
    for name in &names {
        if name.ends_with(TEMP_SUFFIX) {
            scan.junk.push(ns_dir.join(name));
        } else if let Some(id) = name.strip_suffix(META_SUFFIX) {
            if !is_identifier(id) {
                continue;
            }
            if !names.contains(id) {
                scan.junk.push(ns_dir.join(name));
                continue;
            }
            match read_metadata(&ns_dir.join(name)).await {
                Ok(Some(metadata)) => scan.entries.push(CacheEntry::from_metadata(
                    id.to_owned(),
                    data_path(ns_dir, id),
                    &metadata,
                )),
                Ok(None) => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    warn!(id, error = %e, "Unreadable cache metadata, scheduling removal");
                    scan.junk.push(meta_path(ns_dir, id));
                    scan.junk.push(data_path(ns_dir, id));
                }
                Err(e) => return Err(e),
            }
        } else if is_identifier(name) && !names.contains(&format!("{name}{META_SUFFIX}")) {
            scan.junk.push(ns_dir.join(name));
        }
    }

    Ok(scan)
}

/// Eviction pass; the caller holds the namespace write lock
async fn apply_locked(
    ns_dir: &Path,
    rule: &CacheRule,
    candidate: Option<&str>,
) -> CacheResult<Vec<CacheEntry>> {
    let scan = scan(ns_dir).await?;

    for path in &scan.junk {
        remove_if_exists(path).await?;
    }
    if !scan.junk.is_empty() {
        debug!(count = scan.junk.len(), namespace = %rule.namespace, "Removed leftover cache files");
    }

    let evicted = plan_eviction(scan.entries, rule, Utc::now(), candidate);
    for entry in &evicted {
        remove_entry_files(ns_dir, &entry.id).await?;
    }

    if !evicted.is_empty() {
        debug!(
            count = evicted.len(),
            namespace = %rule.namespace,
            "Evicted cache entries"
        );
    }
    Ok(evicted)
}
