use std::{
    collections::HashMap,
    hash::Hash,
    sync::{PoisonError, RwLock},
    time::{Duration, Instant},
};

/// Upper bound on stored entries unless overridden with
/// [`ExpiringCache::with_max_entries`].
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

struct Entries<K, V> {
    map: HashMap<K, CacheEntry<V>>,
    /// Bumped by every invalidation.
    generation: u64,
}

impl<K: Eq + Hash + Clone, V> Entries<K, V> {
    fn evict_expired(&mut self, now: Instant) {
        self.map.retain(|_, entry| entry.expires_at > now);
    }

    fn insert(&mut self, key: K, entry: CacheEntry<V>, max_entries: usize) {
        self.evict_expired(Instant::now());
        if self.map.len() >= max_entries
            && !self.map.contains_key(&key)
            && let Some(oldest) = self
                .map
                .iter()
                .min_by_key(|(_, e)| e.expires_at)
                .map(|(k, _)| k.clone())
        {
            self.map.remove(&oldest);
        }
        self.map.insert(key, entry);
    }
}

/// TTL-bounded key/value cache guarded by its own reader/writer lock.
///
/// A lookup past an entry's deadline counts as a miss and evicts the entry.
/// Writes sweep expired entries and evict the oldest one once
/// `max_entries` is reached. A zero TTL disables the cache: `set` is ignored
/// and every `get` misses.
///
/// Read-through callers should take [`generation`](Self::generation) before
/// loading from the backing store and fill with
/// [`set_if_generation`](Self::set_if_generation), so a value loaded before
/// a concurrent invalidation is never cached.
pub struct ExpiringCache<K, V> {
    entries: RwLock<Entries<K, V>>,
    ttl: Duration,
    max_entries: usize,
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(Entries {
                map: HashMap::new(),
                generation: 0,
            }),
            ttl,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Returns the cached value if present and not yet expired.
    pub fn get(&self, key: &K) -> Option<V> {
        if !self.is_enabled() {
            return None;
        }
        let now = Instant::now();
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.map.get(key) {
                Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
                Some(_) => {},
                None => return None,
            }
        }
        // Expired: evict, re-checking under the write lock in case a writer
        // refreshed the entry in between.
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.map.get(key).is_some_and(|e| e.expires_at <= now) {
            entries.map.remove(key);
        }
        None
    }

    pub fn set(&self, key: K, value: V) {
        if !self.is_enabled() {
            return;
        }
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, entry, self.max_entries);
    }

    /// Current invalidation generation.
    pub fn generation(&self) -> u64 {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    /// Store `value` only if no invalidation happened since `generation` was
    /// read. Returns whether the value was stored.
    pub fn set_if_generation(&self, key: K, value: V, generation: u64) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.generation != generation {
            return false;
        }
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        entries.insert(key, entry, self.max_entries);
        true
    }

    /// Drop the entry for `key`. Returns true if one was present.
    pub fn invalidate(&self, key: &K) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.generation = entries.generation.wrapping_add(1);
        entries.map.remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.generation = entries.generation.wrapping_add(1);
        entries.map.clear();
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .map
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
