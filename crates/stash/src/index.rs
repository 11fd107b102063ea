//! # Cache Index
//!
//! In-memory view of what the cache holds. Recency is tracked with a
//! monotonic sequence number per entry and an ordered map from sequence to
//! key, so touching and finding the least recently used entry are both
//! O(log n). Fresh sequence numbers are strictly increasing, which makes
//! insertion order the tie-breaker for entries that were never touched.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use crate::error::{CacheError, Result};
use crate::key::CacheKey;

/// Metadata for one cached file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub path: PathBuf,
    pub size: u64,
    /// Last-access sequence number; larger is more recent.
    pub last_access: u64,
}

#[derive(Debug, Default)]
pub struct CacheIndex {
    entries: HashMap<CacheKey, CacheEntry>,
    recency: BTreeMap<u64, CacheKey>,
    total_size: u64,
    next_seq: u64,
}

impl CacheIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Register a new entry as the most recently used one.
    pub fn insert(&mut self, key: CacheKey, path: impl Into<PathBuf>, size: u64) -> Result<()> {
        if self.entries.contains_key(&key) {
            return Err(CacheError::DuplicateKey(key));
        }

        let seq = self.bump();
        self.recency.insert(seq, key.clone());
        self.total_size += size;
        self.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                path: path.into(),
                size,
                last_access: seq,
            },
        );
        Ok(())
    }

    /// Mark an entry as just used. Returns false if the key is unknown.
    pub fn touch(&mut self, key: &CacheKey) -> bool {
        let seq = self.next_seq;
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        self.recency.remove(&entry.last_access);
        entry.last_access = seq;
        self.recency.insert(seq, key.clone());
        self.next_seq += 1;
        true
    }

    /// Drop an entry and hand back its path for the caller to delete.
    pub fn remove(&mut self, key: &CacheKey) -> Option<PathBuf> {
        self.take(key).map(|entry| entry.path)
    }

    /// Drop an entry, keeping everything needed to [`restore`](Self::restore) it.
    pub fn take(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.last_access);
        self.total_size -= entry.size;
        Some(entry)
    }

    /// Put back an entry obtained from [`take`](Self::take) at its original
    /// recency position.
    pub fn restore(&mut self, entry: CacheEntry) -> Result<()> {
        if self.entries.contains_key(&entry.key) {
            return Err(CacheError::DuplicateKey(entry.key));
        }
        if self.recency.contains_key(&entry.last_access) {
            return Err(CacheError::IndexDiskDivergence {
                key: entry.key,
                path: entry.path,
                reason: format!("recency slot {} already taken", entry.last_access),
            });
        }

        self.recency.insert(entry.last_access, entry.key.clone());
        self.total_size += entry.size;
        self.next_seq = self.next_seq.max(entry.last_access + 1);
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn least_recently_used(&self) -> Option<&CacheKey> {
        self.recency.values().next()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of all entries, least recently used first.
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.recency
            .values()
            .filter_map(|key| self.entries.get(key).cloned())
            .collect()
    }

    /// Remove every entry, least recently used first.
    pub fn drain(&mut self) -> Vec<CacheEntry> {
        let drained = self.entries();
        self.entries.clear();
        self.recency.clear();
        self.total_size = 0;
        drained
    }

    fn bump(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}
