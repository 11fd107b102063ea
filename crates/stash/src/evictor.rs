//! # Quota Evictor
//!
//! Frees space in the cache by evicting least recently used entries, deleting
//! the index record and the backing file together.

use std::io;

use tokio::fs;
use tracing::{debug, error, warn};

use crate::error::{CacheError, Result};
use crate::index::CacheIndex;
use crate::key::CacheKey;

#[derive(Debug, Clone, Copy)]
pub struct QuotaEvictor {
    quota: u64,
}

impl QuotaEvictor {
    pub fn new(quota: u64) -> Self {
        Self { quota }
    }

    pub fn quota(&self) -> u64 {
        self.quota
    }

    /// Evict entries until `for_size` more bytes fit under the quota.
    ///
    /// Returns the evicted keys, least recently used first. A request that
    /// could not fit even in an empty cache fails before anything is evicted.
    pub async fn make_room(&self, index: &mut CacheIndex, for_size: u64) -> Result<Vec<CacheKey>> {
        if for_size > self.quota {
            return Err(CacheError::QuotaTooSmall {
                size: for_size,
                quota: self.quota,
            });
        }

        let mut evicted = Vec::new();
        while index.total_size() + for_size > self.quota {
            let Some(key) = index.least_recently_used().cloned() else {
                break;
            };
            self.evict(index, &key).await?;
            evicted.push(key);
        }

        if !evicted.is_empty() {
            debug!(
                count = evicted.len(),
                for_size,
                total_size = index.total_size(),
                quota = self.quota,
                "Evicted cache entries"
            );
        }
        Ok(evicted)
    }

    async fn evict(&self, index: &mut CacheIndex, key: &CacheKey) -> Result<()> {
        let Some(entry) = index.take(key) else {
            return Ok(());
        };

        match fs::remove_file(&entry.path).await {
            Ok(()) => {
                debug!(key = %key, path = ?entry.path, size = entry.size, "Evicted cache entry");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(key = %key, path = ?entry.path, "Evicted entry whose file was already gone");
                Ok(())
            }
            Err(e) => {
                warn!(key = %key, path = ?entry.path, error = %e, "Failed to delete evicted file, restoring entry");
                let path = entry.path.clone();
                if let Err(restore_err) = index.restore(entry) {
                    error!(key = %key, path = ?path, error = %restore_err, "Could not restore entry after failed eviction");
                    return Err(CacheError::IndexDiskDivergence {
                        key: key.clone(),
                        path,
                        reason: format!("delete failed ({e}) and restore failed ({restore_err})"),
                    });
                }
                Err(CacheError::io(path, e))
            }
        }
    }
}
