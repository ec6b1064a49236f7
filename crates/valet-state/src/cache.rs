// Bounded, TTL-expiring cache over a durable document store
//
// Consistency model:
// - Per-key last-writer-wins within L1; L2 is authoritative
// - set is write-through: L2 first, then L1, so this process's readers
//   never observe the invalidate-then-repopulate staleness window (and
//   concurrent readers never stampede L2 after a write)
// - Two concurrent misses on one key may both read L2 and both populate
//   L1 with equivalent data; last writer wins and the data is identical,
//   so the race is benign
//
// Locking discipline: the L1 mutex wraps map mutation only. Clock reads,
// L2 round-trips, and logging all happen outside it; get takes the lock
// twice (check, then populate after the L2 read).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use crate::error::Result;
use crate::store::DocumentStore;

/// Default bound on the number of L1 entries
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// One cached document
///
/// Entries are replaced wholesale on update, never mutated in place, and
/// treated as absent once expired even if still occupying a slot.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    inserted_at: Instant,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Two-tier cache for keyed state records
///
/// Process-wide singleton in practice: one instance is shared (via `Arc`)
/// by every request handler. Keys are `"{collection}:{id}"`, values are
/// JSON documents.
pub struct StateCache<S> {
    store: S,
    entries: Mutex<HashMap<String, CacheEntry>>,
    max_entries: usize,
}

impl<S: DocumentStore> StateCache<S> {
    /// Create a cache with the default entry bound
    pub fn new(store: S) -> Self {
        Self::with_max_entries(store, DEFAULT_MAX_ENTRIES)
    }

    /// Create a cache bounded to `max_entries` L1 entries
    pub fn with_max_entries(store: S, max_entries: usize) -> Self {
        Self {
            store,
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// The durable store behind this cache
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Read a record, trying L1 before the durable store
    ///
    /// A fresh L1 entry (with the given TTL) is populated on an L2 hit.
    /// Misses are never cached, and an L2 read error degrades to a miss:
    /// the cache is best-effort on reads.
    pub async fn get(&self, collection: &str, id: &str, ttl: Duration) -> Option<Value> {
        let key = cache_key(collection, id);
        let now = Instant::now();

        let cached = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            match entries.get(&key) {
                Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
                Some(_) => {
                    // Expired: free the slot so it doesn't linger until
                    // eviction.
                    entries.remove(&key);
                    None
                }
                None => None,
            }
        };

        if let Some(value) = cached {
            tracing::debug!(%key, "cache hit");
            return Some(value);
        }

        match self.store.get_document(collection, id).await {
            Ok(Some(value)) => {
                let evicted = self.insert(&key, value.clone(), ttl);
                if evicted > 0 {
                    tracing::debug!(%key, evicted, "evicted oldest entries on cache fill");
                }
                Some(value)
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(%key, error = %err, "store read failed, treating as cache miss");
                None
            }
        }
    }

    /// Merge `delta` into a record and write it through both tiers
    ///
    /// Top-level fields of `delta` are merged into the live cached value,
    /// so partial updates leave other fields intact. With `persist`, the
    /// durable write happens first and a failure propagates with L1 left
    /// untouched; with `persist` false the value is ephemeral and only L1
    /// is updated.
    ///
    /// A set on a key with no live cached entry seeds L1 with the bare
    /// delta; callers doing partial updates on keys they have not read
    /// should `get` first.
    pub async fn set(
        &self,
        collection: &str,
        id: &str,
        delta: Value,
        ttl: Duration,
        persist: bool,
    ) -> Result<()> {
        let key = cache_key(collection, id);
        let now = Instant::now();

        let existing = {
            let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries
                .get(&key)
                .filter(|entry| entry.is_live(now))
                .map(|entry| entry.value.clone())
        };

        let merged = merge_values(existing, delta.clone());

        if persist {
            // Durable write first. The store merges the delta itself so
            // fields written by other processes survive too.
            self.store.set_document(collection, id, delta, true).await?;
        }

        let evicted = self.insert(&key, merged, ttl);
        if evicted > 0 {
            tracing::debug!(%key, evicted, "evicted oldest entries on write-through");
        }
        Ok(())
    }

    /// Drop the L1 entry for a record, leaving the durable store untouched
    ///
    /// For records changed via a path that bypassed `set` (e.g. an external
    /// admin action); the next read repopulates from L2.
    pub fn invalidate(&self, collection: &str, id: &str) {
        let key = cache_key(collection, id);
        let removed = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.remove(&key).is_some()
        };
        if removed {
            tracing::debug!(%key, "cache entry invalidated");
        }
    }

    /// Current number of L1 entries (live and expired)
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// True if L1 holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The configured L1 entry bound
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Insert an entry and evict down to the bound; returns evictions
    fn insert(&self, key: &str, value: Value, ttl: Duration) -> usize {
        let now = Instant::now();
        let entry = CacheEntry {
            value,
            inserted_at: now,
            expires_at: now + ttl,
        };

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), entry);

        // FIFO eviction by insertion time; only the size bound is
        // load-bearing.
        let mut evicted = 0;
        while entries.len() > self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(oldest_key) => {
                    entries.remove(&oldest_key);
                    evicted += 1;
                }
                None => break,
            }
        }
        evicted
    }
}

fn cache_key(collection: &str, id: &str) -> String {
    format!("{collection}:{id}")
}

/// Merge top-level fields of `delta` into `existing`
///
/// Falls back to the delta alone when there is no existing value or either
/// side is not a JSON object.
fn merge_values(existing: Option<Value>, delta: Value) -> Value {
    match (existing, delta) {
        (Some(Value::Object(mut base)), Value::Object(fields)) => {
            for (key, value) in fields {
                base.insert(key, value);
            }
            Value::Object(base)
        }
        (_, delta) => delta,
    }
}
