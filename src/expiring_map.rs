//! TTL-bounded key/value store for ephemeral OAuth flow state
//!
//! Every live stage of the authorization flow (pending authorizations,
//! authorization codes, refresh tokens, dynamically registered clients)
//! lives in one of these maps. Entries are evicted lazily on read, so no
//! background sweep is required for correctness; [`ExpiringMap::evict_expired`]
//! may run opportunistically to reclaim memory.

use std::hash::Hash;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Thread-safe map with a default or per-entry time-to-live
pub struct ExpiringMap<K, V> {
    entries: DashMap<K, Entry<V>>,
    default_ttl: Duration,
}

/// A stored value with TTL metadata
struct Entry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
}

impl<V> Entry<V> {
    fn is_expired(&self) -> bool {
        Instant::now().duration_since(self.inserted_at) > self.ttl
    }
}

impl<K, V> ExpiringMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty map whose entries expire after `default_ttl`.
    #[must_use]
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
        }
    }

    /// Insert a value with the map's default TTL.
    pub fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    /// Insert a value with an explicit TTL overriding the default.
    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Get a value if present and not expired. Expired entries are evicted.
    pub fn get(&self, key: &K) -> Option<V> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.entries.remove(key);
                None
            } else {
                Some(entry.value.clone())
            }
        } else {
            None
        }
    }

    /// Atomically remove and return a value if present and not expired.
    ///
    /// This is the single-use consumption primitive: of two concurrent
    /// callers racing for the same key, exactly one observes the value and
    /// the other observes `None`. An expired entry is discarded, never
    /// returned.
    pub fn take(&self, key: &K) -> Option<V> {
        let (_, entry) = self.entries.remove(key)?;
        if entry.is_expired() {
            None
        } else {
            Some(entry.value)
        }
    }

    /// Remove an entry without returning it (explicit revocation).
    pub fn remove(&self, key: &K) {
        self.entries.remove(key);
    }

    /// Number of entries currently held, including not-yet-evicted expired ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict all expired entries (optional opportunistic sweep).
    pub fn evict_expired(&self) {
        self.entries.retain(|_, entry| !entry.is_expired());
    }
}
