//! # Cache-Backed Fetcher
//!
//! The single entry point callers use: `get(key, url)` returns a local path
//! holding the resource, downloading it on a miss and serving it from disk on
//! a hit.
//!
//! Layout of the cache directory:
//!
//! ```text
//! <root>/<key>          one file per cached entry
//! <root>/.incoming/     downloads in flight, moved into <root> once accepted
//! <root>/.bypass/       latest download made while caching is disabled
//! ```

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use parking_lot::Mutex;
use tokio::fs;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::{CacheConfig, DownloaderConfig};
use crate::download::{AtomicDownloader, PART_SUFFIX};
use crate::error::{CacheError, Result};
use crate::evictor::QuotaEvictor;
use crate::index::{CacheEntry, CacheIndex};
use crate::key::CacheKey;
use crate::transport::{HttpTransport, Transport};

const INCOMING_DIR: &str = ".incoming";
const BYPASS_DIR: &str = ".bypass";

type KeyLocks = Mutex<HashMap<CacheKey, Arc<AsyncMutex<()>>>>;

/// Snapshot of cache usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size: u64,
    pub quota: u64,
    pub hits: u64,
    pub misses: u64,
    pub downloads: u64,
    pub evictions: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    downloads: AtomicU64,
    evictions: AtomicU64,
}

/// Quota-bounded, disk-backed cache of HTTP resources.
///
/// Construct once and share through an `Arc`; all methods take `&self`.
pub struct CachedFetcher {
    config: CacheConfig,
    downloader: AtomicDownloader,
    evictor: QuotaEvictor,
    index: RwLock<CacheIndex>,
    key_locks: KeyLocks,
    /// The one bypass download kept on disk while caching is disabled.
    last_bypass: Mutex<Option<PathBuf>>,
    counters: Counters,
}

impl CachedFetcher {
    /// Open the cache with a reqwest transport built from `downloader_config`.
    pub async fn open(config: CacheConfig, downloader_config: DownloaderConfig) -> Result<Self> {
        let transport = HttpTransport::new(&downloader_config)?;
        Self::with_transport(config, &downloader_config, transport).await
    }

    /// Open the cache on top of an arbitrary transport.
    pub async fn with_transport(
        config: CacheConfig,
        downloader_config: &DownloaderConfig,
        transport: impl Transport + 'static,
    ) -> Result<Self> {
        downloader_config.validate()?;
        let downloader = AtomicDownloader::new(Arc::new(transport))
            .with_chunk_size(downloader_config.chunk_size);
        Self::with_downloader(config, downloader).await
    }

    /// Open the cache with a fully configured downloader.
    pub async fn with_downloader(config: CacheConfig, downloader: AtomicDownloader) -> Result<Self> {
        config.validate()?;

        let root = &config.cache_dir;
        fs::create_dir_all(root)
            .await
            .map_err(|e| CacheError::io(root, e))?;

        // Nothing in either directory outlives the process that wrote it
        reset_dir(&root.join(INCOMING_DIR)).await?;
        reset_dir(&root.join(BYPASS_DIR)).await?;

        let evictor = QuotaEvictor::new(config.quota);
        let mut index = CacheIndex::new();

        if config.is_enabled() {
            rebuild_index(root, &mut index).await?;
            let evicted = evictor.make_room(&mut index, 0).await?;
            if !evicted.is_empty() {
                info!(count = evicted.len(), quota = config.quota, "Trimmed cache down to quota");
            }
            info!(
                dir = ?root,
                entries = index.len(),
                total_size = index.total_size(),
                quota = config.quota,
                "Cache opened"
            );
        } else {
            info!(dir = ?root, "Caching disabled, fetches will not be retained");
        }

        Ok(Self {
            config,
            downloader,
            evictor,
            index: RwLock::new(index),
            key_locks: Mutex::new(HashMap::new()),
            last_bypass: Mutex::new(None),
            counters: Counters::default(),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Return a local path holding the resource for `key`, downloading it from
    /// `url` if it is not cached yet.
    pub async fn get(&self, key: &CacheKey, url: &str) -> Result<PathBuf> {
        if !self.config.is_enabled() {
            return self.fetch_uncached(key, url).await;
        }

        if let Some(path) = self.hit(key).await {
            return Ok(path);
        }

        let _lease = KeyLease::acquire(&self.key_locks, key).await;

        // Whoever held the lease before us may have just cached it
        if let Some(path) = self.hit(key).await {
            return Ok(path);
        }
        self.miss(key, url).await
    }

    /// [`get`](Self::get) with the key derived from the URL.
    pub async fn get_url(&self, url: &str) -> Result<PathBuf> {
        let key = CacheKey::from_url(url)?;
        self.get(&key, url).await
    }

    pub async fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.index.read().await.lookup(key).cloned()
    }

    pub async fn total_size(&self) -> u64 {
        self.index.read().await.total_size()
    }

    /// All entries, least recently used first.
    pub async fn entries(&self) -> Vec<CacheEntry> {
        self.index.read().await.entries()
    }

    pub async fn stats(&self) -> CacheStats {
        let index = self.index.read().await;
        CacheStats {
            entries: index.len(),
            total_size: index.total_size(),
            quota: self.evictor.quota(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            downloads: self.counters.downloads.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }

    /// Remove every cached entry and its file.
    ///
    /// Entries whose file cannot be deleted stay in the index; the first such
    /// failure is returned after the rest have been cleared.
    pub async fn clear(&self) -> Result<usize> {
        let mut index = self.index.write().await;
        let mut first_error = None;
        let mut removed = 0;

        for entry in index.drain() {
            match fs::remove_file(&entry.path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => removed += 1,
                Err(e) => {
                    warn!(key = %entry.key, path = ?entry.path, error = %e, "Failed to remove cache file");
                    let path = entry.path.clone();
                    index.restore(entry)?;
                    first_error.get_or_insert(CacheError::io(path, e));
                }
            }
        }

        let bypass = self.config.cache_dir.join(BYPASS_DIR);
        if let Err(e) = clear_dir(&bypass).await {
            warn!(path = ?bypass, error = %e, "Failed to clear bypass directory");
        }
        self.last_bypass.lock().take();

        info!(count = removed, "Cleared cache");
        match first_error {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }

    async fn hit(&self, key: &CacheKey) -> Option<PathBuf> {
        let path = {
            let mut index = self.index.write().await;
            let path = index.lookup(key)?.path.clone();

            // Deleted behind our back: forget it so the caller downloads again
            if !fs::try_exists(&path).await.unwrap_or(false) {
                index.remove(key);
                warn!(key = %key, path = ?path, "Cached file disappeared, dropping entry");
                return None;
            }
            index.touch(key);
            path
        };

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, path = ?path, "Cache hit");
        refresh_mtime(&path).await;
        Some(path)
    }

    async fn miss(&self, key: &CacheKey, url: &str) -> Result<PathBuf> {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, url, "Cache miss");

        let scratch = self
            .config
            .cache_dir
            .join(INCOMING_DIR)
            .join(key.file_name());
        let size = self.downloader.fetch(url, &scratch).await?;
        self.counters.downloads.fetch_add(1, Ordering::Relaxed);

        let mut index = self.index.write().await;

        let evicted = match self.evictor.make_room(&mut index, size).await {
            Ok(evicted) => evicted,
            Err(CacheError::QuotaTooSmall { size, quota }) => {
                discard(&scratch).await;
                warn!(key = %key, url, size, quota, "Resource does not fit in the cache");
                return Err(CacheError::ResourceTooLarge {
                    key: key.clone(),
                    url: url.to_string(),
                    size,
                    quota,
                });
            }
            Err(e) => {
                discard(&scratch).await;
                return Err(e);
            }
        };
        self.counters
            .evictions
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);

        // Nobody can observe the entry before the rename below: every reader
        // needs the index lock we are holding.
        let path = self.config.cache_dir.join(key.file_name());
        if let Err(e) = index.insert(key.clone(), &path, size) {
            error!(key = %key, url, error = %e, "Cache key registered twice");
            discard(&scratch).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&scratch, &path).await {
            index.remove(key);
            discard(&scratch).await;
            return Err(CacheError::io(path, e));
        }

        info!(
            key = %key,
            url,
            size,
            evicted = evicted.len(),
            total_size = index.total_size(),
            "Cached resource"
        );
        Ok(path)
    }

    async fn fetch_uncached(&self, key: &CacheKey, url: &str) -> Result<PathBuf> {
        let _lease = KeyLease::acquire(&self.key_locks, key).await;
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        let path = self
            .config
            .cache_dir
            .join(BYPASS_DIR)
            .join(key.file_name());
        let size = self.downloader.fetch(url, &path).await?;
        self.counters.downloads.fetch_add(1, Ordering::Relaxed);

        let previous = self.last_bypass.lock().replace(path.clone());
        if let Some(previous) = previous.filter(|previous| *previous != path) {
            discard(&previous).await;
        }

        debug!(key = %key, url, size, "Fetched without caching");
        Ok(path)
    }
}

impl std::fmt::Debug for CachedFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedFetcher")
            .field("config", &self.config)
            .field("downloader", &self.downloader)
            .finish_non_exhaustive()
    }
}

/// Exclusive right to download one key. The lock table entry is dropped with
/// the last lease that refers to it.
struct KeyLease<'a> {
    locks: &'a KeyLocks,
    key: CacheKey,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<'a> KeyLease<'a> {
    async fn acquire(locks: &'a KeyLocks, key: &CacheKey) -> KeyLease<'a> {
        let lock = locks.lock().entry(key.clone()).or_default().clone();
        let mut lease = KeyLease {
            locks,
            key: key.clone(),
            lock,
            guard: None,
        };
        lease.guard = Some(lease.lock.clone().lock_owned().await);
        lease
    }
}

impl Drop for KeyLease<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock();
        // Only the table and this lease still refer to the lock
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.key);
        }
    }
}

/// Adopt every entry file found in `root`, oldest modification time first.
async fn rebuild_index(root: &Path, index: &mut CacheIndex) -> Result<()> {
    let mut dir = fs::read_dir(root)
        .await
        .map_err(|e| CacheError::io(root, e))?;

    let mut found = Vec::new();
    while let Some(entry) = dir.next_entry().await.map_err(|e| CacheError::io(root, e))? {
        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = ?path, error = %e, "Skipping unreadable cache file");
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }

        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };

        if name.ends_with(PART_SUFFIX) {
            discard(&path).await;
            continue;
        }

        match CacheKey::from_file_name(name) {
            Some(key) => {
                let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                found.push((modified, key, path, metadata.len()));
            }
            None => debug!(path = ?path, "Ignoring foreign file in cache directory"),
        }
    }

    found.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
    for (_, key, path, size) in found {
        index.insert(key, path, size)?;
    }
    Ok(())
}

/// Best-effort removal of a file nobody will use.
async fn discard(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = ?path, error = %e, "Failed to remove leftover file"),
    }
}

/// Remove `dir` with everything in it and create it again empty.
async fn reset_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => debug!(path = ?dir, "Discarded leftovers of a previous run"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(CacheError::io(dir, e)),
    }
    fs::create_dir_all(dir)
        .await
        .map_err(|e| CacheError::io(dir, e))
}

async fn clear_dir(dir: &Path) -> io::Result<()> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    while let Some(entry) = entries.next_entry().await? {
        fs::remove_file(entry.path()).await?;
    }
    Ok(())
}

/// Record the access in the file's modification time, which is what recency
/// is rebuilt from on the next open.
async fn refresh_mtime(path: &Path) {
    let owned = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || {
        std::fs::File::options()
            .write(true)
            .open(&owned)?
            .set_modified(SystemTime::now())
    })
    .await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(path = ?path, error = %e, "Could not refresh modification time"),
        Err(e) => debug!(path = ?path, error = %e, "Modification time task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockResource, MockTransport};
    use std::time::Duration;

    #[inline]
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    }

    fn downloader_config() -> DownloaderConfig {
        DownloaderConfig::builder().with_chunk_size(8).build()
    }

    async fn open(dir: &Path, quota: u64, transport: &Arc<MockTransport>) -> CachedFetcher {
        CachedFetcher::with_transport(
            CacheConfig::new(dir, quota),
            &downloader_config(),
            transport.clone(),
        )
        .await
        .unwrap()
    }

    fn serve(transport: &MockTransport, name: &str, size: usize) -> (CacheKey, String) {
        let url = format!("http://archive.test/{name}");
        transport.serve(&url, MockResource::new(vec![name.as_bytes()[0]; size]));
        (CacheKey::from_raw(name), url)
    }

    /// Regular files directly under the cache root.
    fn entry_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_type().unwrap().is_file())
            .count()
    }

    #[tokio::test]
    async fn test_hit_does_not_touch_network() {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        let (key, url) = serve(&transport, "listing", 30);
        let cache = open(dir.path(), 100, &transport).await;

        let first = cache.get(&key, &url).await.unwrap();
        let second = cache.get(&key, &url).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(transport.calls(), 1);
        assert_eq!(std::fs::read(&first).unwrap(), vec![b'l'; 30]);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.downloads, 1);
        assert_eq!(stats.total_size, 30);
    }

    #[tokio::test]
    async fn test_quota_holds_after_every_get() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        let cache = open(dir.path(), 50, &transport).await;

        for (i, size) in [20, 15, 30, 5, 50, 1, 0, 25].into_iter().enumerate() {
            let (key, url) = serve(&transport, &format!("r{i}"), size);
            cache.get(&key, &url).await.unwrap();

            let total = cache.total_size().await;
            assert!(total <= 50, "total {total} exceeds quota after get #{i}");
            let on_disk: u64 = cache
                .entries()
                .await
                .iter()
                .map(|e| std::fs::metadata(&e.path).unwrap().len())
                .sum();
            assert_eq!(on_disk, total);
        }
    }

    #[tokio::test]
    async fn test_lru_entry_is_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        let cache = open(dir.path(), 30, &transport).await;

        let (a, url_a) = serve(&transport, "a", 10);
        let (b, url_b) = serve(&transport, "b", 10);
        let (c, url_c) = serve(&transport, "c", 10);
        let (d, url_d) = serve(&transport, "d", 10);

        let path_a = cache.get(&a, &url_a).await.unwrap();
        cache.get(&b, &url_b).await.unwrap();
        cache.get(&c, &url_c).await.unwrap();
        cache.get(&b, &url_b).await.unwrap();
        cache.get(&d, &url_d).await.unwrap();

        assert!(cache.lookup(&a).await.is_none());
        assert!(!path_a.exists());
        assert!(cache.lookup(&b).await.is_some());
        assert!(cache.lookup(&c).await.is_some());
        assert!(cache.lookup(&d).await.is_some());
        assert_eq!(cache.stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_resource_too_large() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        let cache = open(dir.path(), 40, &transport).await;

        let (small, small_url) = serve(&transport, "small", 10);
        cache.get(&small, &small_url).await.unwrap();

        let (big, big_url) = serve(&transport, "big", 41);
        let err = cache.get(&big, &big_url).await.unwrap_err();

        assert!(matches!(err, CacheError::ResourceTooLarge { size: 41, quota: 40, .. }));
        assert_eq!(entry_files(dir.path()), 1);
        assert_eq!(entry_files(&dir.path().join(INCOMING_DIR)), 0);
        assert_eq!(cache.total_size().await, 10);
        // The small entry survived: an unsatisfiable request evicts nothing
        assert!(cache.lookup(&small).await.is_some());
    }

    #[tokio::test]
    async fn test_network_failure_leaves_index_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        let cache = open(dir.path(), 100, &transport).await;

        let url = "http://archive.test/flaky";
        transport.serve(url, MockResource::new(vec![0u8; 64]).failing_after(20));
        let key = CacheKey::from_raw("flaky");

        let err = cache.get(&key, url).await.unwrap_err();
        assert!(matches!(err, CacheError::Network { .. }));
        assert!(err.is_transient());
        assert!(cache.lookup(&key).await.is_none());
        assert_eq!(cache.total_size().await, 0);
        assert_eq!(entry_files(dir.path()), 0);
        assert_eq!(entry_files(&dir.path().join(INCOMING_DIR)), 0);
    }

    #[tokio::test]
    async fn test_concurrent_same_key_downloads_once() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new().with_delay(Duration::from_millis(50)));
        let (key, url) = serve(&transport, "build", 24);
        let cache = Arc::new(open(dir.path(), 100, &transport).await);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let key = key.clone();
                let url = url.clone();
                tokio::spawn(async move { cache.get(&key, &url).await })
            })
            .collect();

        let mut paths = Vec::new();
        for task in tasks {
            paths.push(task.await.unwrap().unwrap());
        }

        assert_eq!(transport.calls_for(&url), 1);
        assert!(paths.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(std::fs::read(&paths[0]).unwrap(), vec![b'b'; 24]);
        assert!(cache.key_locks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_zero_quota_bypasses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        let (key, url) = serve(&transport, "listing", 12);
        let cache = open(dir.path(), 0, &transport).await;

        let first = cache.get(&key, &url).await.unwrap();
        let second = cache.get(&key, &url).await.unwrap();

        assert_eq!(transport.calls(), 2);
        assert_eq!(first, second);
        assert_eq!(std::fs::read(&first).unwrap(), vec![b'l'; 12]);
        assert!(cache.lookup(&key).await.is_none());
        assert_eq!(cache.total_size().await, 0);
    }

    #[tokio::test]
    async fn test_zero_quota_keeps_only_latest_download() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        let bypass = dir.path().join(BYPASS_DIR);

        {
            let cache = open(dir.path(), 0, &transport).await;
            let mut last = None;
            for name in ["a", "b", "c", "d", "e"] {
                let (key, url) = serve(&transport, name, 1000);
                last = Some(cache.get(&key, &url).await.unwrap());
                assert_eq!(entry_files(&bypass), 1);
            }
            let last = last.unwrap();
            assert_eq!(std::fs::read(&last).unwrap(), vec![b'e'; 1000]);
        }

        let _cache = open(dir.path(), 0, &transport).await;
        assert_eq!(entry_files(&bypass), 0);
        assert_eq!(entry_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_enabling_cache_discards_bypass_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        let (key, url) = serve(&transport, "listing", 12);

        {
            let cache = open(dir.path(), 0, &transport).await;
            cache.get(&key, &url).await.unwrap();
        }

        let cache = open(dir.path(), 100, &transport).await;
        assert_eq!(entry_files(&dir.path().join(BYPASS_DIR)), 0);
        assert_eq!(cache.total_size().await, 0);
    }

    #[tokio::test]
    async fn test_file_deleted_outside_cache_is_fetched_again() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        let (key, url) = serve(&transport, "listing", 16);
        let cache = open(dir.path(), 100, &transport).await;

        let path = cache.get(&key, &url).await.unwrap();
        std::fs::remove_file(&path).unwrap();

        let again = cache.get(&key, &url).await.unwrap();
        assert_eq!(again, path);
        assert_eq!(std::fs::read(&again).unwrap(), vec![b'l'; 16]);
        assert_eq!(transport.calls(), 2);
        assert_eq!(cache.total_size().await, 16);
        assert_eq!(cache.stats().await.hits, 0);
    }

    #[tokio::test]
    async fn test_reopen_rebuilds_index() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        let (a, url_a) = serve(&transport, "a", 10);
        let (b, url_b) = serve(&transport, "b", 20);

        {
            let cache = open(dir.path(), 100, &transport).await;
            cache.get(&a, &url_a).await.unwrap();
            cache.get(&b, &url_b).await.unwrap();
        }
        // Leftovers from an interrupted run
        std::fs::write(dir.path().join(format!("{}.part", a.file_name())), b"junk").unwrap();
        std::fs::write(dir.path().join(INCOMING_DIR).join("stale"), b"junk").unwrap();

        let cache = open(dir.path(), 100, &transport).await;
        assert_eq!(cache.total_size().await, 30);
        assert_eq!(cache.lookup(&a).await.unwrap().size, 10);
        assert_eq!(entry_files(dir.path()), 2);
        assert_eq!(entry_files(&dir.path().join(INCOMING_DIR)), 0);

        cache.get(&a, &url_a).await.unwrap();
        cache.get(&b, &url_b).await.unwrap();
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_reopen_restores_recency_from_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        let (a, url_a) = serve(&transport, "a", 10);
        let (b, url_b) = serve(&transport, "b", 10);
        let (c, url_c) = serve(&transport, "c", 10);

        {
            let cache = open(dir.path(), 100, &transport).await;
            for (key, url) in [(&a, &url_a), (&b, &url_b), (&c, &url_c)] {
                cache.get(key, url).await.unwrap();
            }
        }

        // b oldest, then c, then a
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        for (key, offset) in [(&b, 0), (&c, 60), (&a, 120)] {
            std::fs::File::options()
                .write(true)
                .open(dir.path().join(key.file_name()))
                .unwrap()
                .set_modified(base + Duration::from_secs(offset))
                .unwrap();
        }

        let cache = open(dir.path(), 100, &transport).await;
        let order: Vec<_> = cache.entries().await.into_iter().map(|e| e.key).collect();
        assert_eq!(order, vec![b.clone(), c.clone(), a.clone()]);
    }

    #[tokio::test]
    async fn test_reopen_with_smaller_quota_trims() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        let (a, url_a) = serve(&transport, "a", 10);
        let (b, url_b) = serve(&transport, "b", 10);

        {
            let cache = open(dir.path(), 100, &transport).await;
            cache.get(&a, &url_a).await.unwrap();
            cache.get(&b, &url_b).await.unwrap();
        }

        let cache = open(dir.path(), 15, &transport).await;
        assert_eq!(cache.total_size().await, 10);
        assert_eq!(cache.entries().await.len(), 1);
        assert_eq!(entry_files(dir.path()), 1);
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        let cache = open(dir.path(), 100, &transport).await;

        for name in ["a", "b", "c"] {
            let (key, url) = serve(&transport, name, 5);
            cache.get(&key, &url).await.unwrap();
        }

        assert_eq!(cache.clear().await.unwrap(), 3);
        assert_eq!(cache.total_size().await, 0);
        assert_eq!(entry_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_clear_keeps_entry_it_cannot_delete() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        let cache = open(dir.path(), 100, &transport).await;

        let (stuck, stuck_url) = serve(&transport, "stuck", 5);
        let (other, other_url) = serve(&transport, "other", 5);
        let stuck_path = cache.get(&stuck, &stuck_url).await.unwrap();
        cache.get(&other, &other_url).await.unwrap();

        // A non-empty directory cannot be removed with remove_file
        std::fs::remove_file(&stuck_path).unwrap();
        std::fs::create_dir(&stuck_path).unwrap();
        std::fs::write(stuck_path.join("inner"), b"data").unwrap();

        let err = cache.clear().await.unwrap_err();
        assert!(matches!(err, CacheError::Io { .. }), "unexpected error: {err}");

        let entry = cache.lookup(&stuck).await.unwrap();
        assert_eq!(entry.path, stuck_path);
        assert!(cache.lookup(&other).await.is_none());
        assert_eq!(cache.total_size().await, 5);
        assert!(stuck_path.exists());
    }

    #[tokio::test]
    async fn test_get_url_derives_key() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        let url = "http://archive.test/pub/";
        transport.serve(url, MockResource::new(&b"<a href=\"x/\">x</a>"[..]));
        let cache = open(dir.path(), 100, &transport).await;

        let path = cache.get_url(url).await.unwrap();
        let key = CacheKey::from_url(url).unwrap();
        assert_eq!(path, dir.path().join(key.file_name()));
        assert!(cache.get_url("http://archive.test/pub/#frag").await.is_ok());
        assert_eq!(transport.calls(), 1);
    }
}
