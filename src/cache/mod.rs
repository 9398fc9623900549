//! Bounded LRU cache of per-collection vector sets
//!
//! Amortizes loading vectors out of the durable store. Entries are bounded
//! three ways: entry count, aggregate bytes, and TTL. Every write that
//! touches a collection invalidates its entry before the operation returns,
//! so readers never observe a stale set (the runtime is single-threaded
//! cooperative).

use crate::config::CacheConfig;
use crate::constants::VECTOR_OVERHEAD_BYTES;
use crate::domain::{now_nanos, CollectionId, Vector};
use crate::services::search::CentroidIndex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A cached vector set for one collection.
struct CachedEntry {
    vectors: Arc<Vec<Vector>>,

    /// Transient centroid index, built by the first approximate search
    /// after the entry was filled.
    centroid_index: Option<Arc<CentroidIndex>>,

    last_access: u64,
    inserted_at: u64,
    bytes: u64,
}

/// Observable cache counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

/// Bounded LRU vector cache keyed by collection.
pub struct VectorCache {
    entries: HashMap<CollectionId, CachedEntry>,
    total_bytes: u64,
    config: CacheConfig,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl VectorCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            total_bytes: 0,
            config,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
        }
    }

    /// Estimated bytes held by an entry of `count` vectors of `dim` components.
    fn entry_bytes(count: usize, dim: usize) -> u64 {
        count as u64 * (dim as u64 * 4 + VECTOR_OVERHEAD_BYTES)
    }

    fn ttl_nanos(&self) -> u64 {
        self.config.ttl_seconds.saturating_mul(NANOS_PER_SEC)
    }

    /// Fetch a collection's vectors, refreshing its LRU position.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get(&mut self, collection_id: &str) -> Option<Arc<Vec<Vector>>> {
        let now = now_nanos();
        let ttl = self.ttl_nanos();

        if let Some(entry) = self.entries.get(collection_id) {
            if now.saturating_sub(entry.inserted_at) > ttl {
                self.remove_entry(collection_id);
                self.expirations += 1;
                self.misses += 1;
                return None;
            }
        }

        match self.entries.get_mut(collection_id) {
            Some(entry) => {
                entry.last_access = now;
                self.hits += 1;
                Some(Arc::clone(&entry.vectors))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Fetch the centroid index attached to a live entry, if any.
    pub fn get_index(&mut self, collection_id: &str) -> Option<Arc<CentroidIndex>> {
        self.entries
            .get(collection_id)
            .and_then(|e| e.centroid_index.as_ref().map(Arc::clone))
    }

    /// Attach a centroid index to an existing entry; no-op when the entry
    /// has been evicted in the meantime.
    pub fn attach_index(&mut self, collection_id: &str, index: Arc<CentroidIndex>) {
        if let Some(entry) = self.entries.get_mut(collection_id) {
            entry.centroid_index = Some(index);
        }
    }

    /// Insert a collection's vector set, evicting least-recently-used
    /// entries until the bounds hold. Returns false when the entry alone
    /// exceeds the byte ceiling and was refused (callers fall back to
    /// direct store reads).
    pub fn insert(&mut self, collection_id: &str, vectors: Vec<Vector>) -> bool {
        self.insert_shared(collection_id, Arc::new(vectors))
    }

    /// `insert` for a vector set that is also kept by the caller.
    pub fn insert_shared(&mut self, collection_id: &str, vectors: Arc<Vec<Vector>>) -> bool {
        let dim = vectors.first().map(|v| v.embedding.len()).unwrap_or(0);
        let bytes = Self::entry_bytes(vectors.len(), dim);

        if bytes > self.config.max_bytes {
            debug!(
                "Refusing cache insert for {}: {} bytes exceeds ceiling",
                collection_id, bytes
            );
            return false;
        }

        // Replacing an entry must not double-count its bytes.
        self.remove_entry(collection_id);

        while self.entries.len() + 1 > self.config.max_entries
            || self.total_bytes + bytes > self.config.max_bytes
        {
            if !self.evict_lru() {
                break;
            }
        }

        let now = now_nanos();
        self.entries.insert(
            collection_id.to_string(),
            CachedEntry {
                vectors,
                centroid_index: None,
                last_access: now,
                inserted_at: now,
                bytes,
            },
        );
        self.total_bytes += bytes;
        true
    }

    /// Drop a collection's entry if present.
    pub fn invalidate(&mut self, collection_id: &str) {
        if self.remove_entry(collection_id) {
            debug!("Invalidated cache entry for {}", collection_id);
        }
    }

    /// Drop everything, keeping counters.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }

    /// Drop all entries older than the TTL. Returns the number removed.
    pub fn cleanup(&mut self) -> usize {
        let now = now_nanos();
        let ttl = self.ttl_nanos();

        let expired: Vec<CollectionId> = self
            .entries
            .iter()
            .filter(|(_, e)| now.saturating_sub(e.inserted_at) > ttl)
            .map(|(k, _)| k.clone())
            .collect();

        for cid in &expired {
            self.remove_entry(cid);
            self.expirations += 1;
        }
        expired.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            total_bytes: self.total_bytes,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            expirations: self.expirations,
        }
    }

    pub fn contains(&self, collection_id: &str) -> bool {
        self.entries.contains_key(collection_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remove_entry(&mut self, collection_id: &str) -> bool {
        if let Some(entry) = self.entries.remove(collection_id) {
            self.total_bytes -= entry.bytes;
            true
        } else {
            false
        }
    }

    fn evict_lru(&mut self) -> bool {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_access)
            .map(|(k, _)| k.clone());

        match victim {
            Some(cid) => {
                self.remove_entry(&cid);
                self.evictions += 1;
                debug!("Evicted cache entry for {}", cid);
                true
            }
            None => false,
        }
    }
}
