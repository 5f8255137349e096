use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::time::Instant;

/// The default time-to-live of a [`TtlCache`] entry: one day.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A single entry of the [`TtlCache`].
#[derive(Debug)]
struct TtlEntry<V> {
    /// When the payload was put into the cache.
    created_at: Instant,
    /// The shared payload.
    payload: Arc<V>,
}

impl<V> TtlEntry<V> {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.created_at) >= ttl
    }
}

/// A cache of shared, externally fetched objects with a fixed time-to-live.
///
/// Every entry is stamped with the (monotonic) time it was inserted. Expiry is lazy:
/// [`get`](Self::get) never checks the age of an entry, instead the owner of the cache calls
/// [`sweep`](Self::sweep) periodically to evict everything that has outlived the TTL.
///
/// All operations take an internal readers-writer lock, so a sweep never races a concurrent
/// [`put`](Self::put).
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: RwLock<HashMap<K, TtlEntry<V>>>,
}

impl<K, V> fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .entries
            .try_read()
            .map(|e| e.len())
            .unwrap_or_default();
        f.debug_struct("TtlCache")
            .field("ttl", &self.ttl)
            .field("entries", &entries)
            .finish()
    }
}

impl<K, V> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl<K, V> TtlCache<K, V> {
    /// Creates an empty cache whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// The time-to-live this cache was created with.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The number of entries, including the ones that expired since the last sweep.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Whether the cache holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes all entries.
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
{
    /// Returns the cached payload for `key`, if there is one.
    ///
    /// This does not look at the age of the entry. An entry that outlived the TTL stays
    /// retrievable until the next [`sweep`](Self::sweep).
    pub fn get<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let entries = self.entries.read().unwrap();
        entries.get(key).map(|entry| Arc::clone(&entry.payload))
    }

    /// Inserts or replaces the entry for `key`, stamping it with the current time.
    ///
    /// Returns the payload that was replaced.
    pub fn put(&self, key: K, payload: Arc<V>) -> Option<Arc<V>> {
        let entry = TtlEntry {
            created_at: Instant::now(),
            payload,
        };
        let mut entries = self.entries.write().unwrap();
        entries.insert(key, entry).map(|old| old.payload)
    }

    /// Removes the entry for `key` regardless of its age.
    pub fn remove<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let mut entries = self.entries.write().unwrap();
        entries.remove(key).map(|entry| entry.payload)
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Removes every entry whose age is at least the TTL.
    ///
    /// Returns the keys of all evicted entries, so that the owner can drop anything that is
    /// associated with them.
    pub fn sweep(&self) -> Vec<K> {
        let now = Instant::now();
        let mut evicted = Vec::new();

        let mut entries = self.entries.write().unwrap();
        entries.retain(|key, entry| {
            if entry.is_expired(now, self.ttl) {
                evicted.push(key.clone());
                false
            } else {
                true
            }
        });
        drop(entries);

        if !evicted.is_empty() {
            tracing::trace!(evicted = evicted.len(), "Swept expired cache entries");
        }
        evicted
    }
}
