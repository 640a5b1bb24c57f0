//! Bounded in-memory hot cache in front of the durable store.
//!
//! The cache exists purely to avoid repeated deserialization of recently
//! touched entities. Correctness never depends on it: any miss falls through
//! to SQLite and the entry is repopulated.

use crate::types::EntityRecord;
use fieldsync_protocol::EntityKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct CacheEntry {
    record: EntityRecord,
    inserted_at: Instant,
    ttl: Option<Duration>,
    access_count: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.duration_since(self.inserted_at) >= ttl,
            None => false,
        }
    }

    /// Eviction score: accesses per second of residency. The entry with the
    /// lowest score is evicted first, approximating combined LRU/LFU.
    fn score(&self, now: Instant) -> f64 {
        let age = now.duration_since(self.inserted_at).as_secs_f64().max(1e-6);
        self.access_count as f64 / age
    }
}

/// A bounded cache keyed by entity identity, with entry-level TTL.
pub struct HotCache {
    entries: Mutex<HashMap<EntityKey, CacheEntry>>,
    capacity: usize,
    default_ttl: Option<Duration>,
}

impl HotCache {
    /// Creates a cache holding at most `capacity` entries.
    pub fn new(capacity: usize, default_ttl: Option<Duration>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            default_ttl,
        }
    }

    /// Returns the cached record if present and not expired.
    pub fn get(&self, key: &EntityKey) -> Option<EntityRecord> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => {
                entry.access_count += 1;
                Some(entry.record.clone())
            }
            None => None,
        }
    }

    /// Inserts or replaces an entry, evicting the lowest-scoring entry when
    /// over capacity.
    pub fn insert(&self, record: EntityRecord, ttl: Option<Duration>) {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let key = record.key.clone();
        entries.insert(
            key.clone(),
            CacheEntry {
                record,
                inserted_at: now,
                ttl: ttl.or(self.default_ttl),
                access_count: 1,
            },
        );

        while entries.len() > self.capacity {
            let victim = entries
                .iter()
                .filter(|(k, _)| **k != key)
                .min_by(|(_, a), (_, b)| {
                    a.score(now)
                        .partial_cmp(&b.score(now))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(k, _)| k.clone());

            match victim {
                Some(k) => {
                    entries.remove(&k);
                }
                None => break,
            }
        }
    }

    /// Removes an entry.
    pub fn evict(&self, key: &EntityKey) {
        self.entries.lock().remove(key);
    }

    /// Removes everything.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of cached entries (including not-yet-collected expired ones).
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
