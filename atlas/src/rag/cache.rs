//! RAG result cache: TTL entries with an LRU bound.
//!
//! Key = hash of (query, strategy name, sorted canonical source
//! identities), so two configs naming the same sources in different order
//! share entries. One lock guards both the map and the recency order;
//! accesses are short and never held across awaits. Expired entries are
//! evicted lazily on lookup or on size pressure.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::rag::RetrievalResult;

struct CacheEntry {
    results: Vec<RetrievalResult>,
    expires_at: Instant,
}

struct CacheInner {
    map: HashMap<u64, CacheEntry>,
    /// Recency order, least-recent first.
    order: VecDeque<u64>,
}

/// Bounded TTL cache for retrieval results.
pub struct RagCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
    max_entries: usize,
}

impl RagCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Cache key for one retrieval request. Source identities are sorted and
    /// deduplicated so ordering and repetition in config do not split the
    /// cache.
    pub fn key(query: &str, strategy_name: &str, source_identities: &[String]) -> u64 {
        let mut identities: Vec<&String> = source_identities.iter().collect();
        identities.sort();
        identities.dedup();

        let mut hasher = DefaultHasher::new();
        query.hash(&mut hasher);
        strategy_name.hash(&mut hasher);
        for identity in identities {
            identity.hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Returns the cached results when present and unexpired. Expired
    /// entries are removed on the spot; hits refresh recency.
    pub fn get(&self, key: u64) -> Option<Vec<RetrievalResult>> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let expired = match inner.map.get(&key) {
            None => return None,
            Some(entry) => entry.expires_at <= Instant::now(),
        };
        if expired {
            inner.map.remove(&key);
            inner.order.retain(|k| *k != key);
            debug!(key, "cache entry expired");
            return None;
        }
        let results = inner.map.get(&key).map(|e| e.results.clone())?;
        inner.order.retain(|k| *k != key);
        inner.order.push_back(key);
        debug!(key, count = results.len(), "cache hit");
        Some(results)
    }

    /// Stores results under `key`, evicting least-recently-used entries on
    /// size pressure.
    pub fn put(&self, key: u64, results: Vec<RetrievalResult>) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let expires_at = Instant::now() + self.ttl;

        inner.order.retain(|k| *k != key);
        inner.map.insert(
            key,
            CacheEntry {
                results,
                expires_at,
            },
        );
        inner.order.push_back(key);

        while inner.map.len() > self.max_entries {
            let Some(evicted) = inner.order.pop_front() else {
                break;
            };
            inner.map.remove(&evicted);
            debug!(key = evicted, "cache entry evicted (lru)");
        }
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.map.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner).map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
