//! Bounded LFU cache with TTL expiry
//!
//! Overflow evicts the entry with the lowest access count; ties go to the
//! least recently accessed entry. Expired entries are dropped lazily on `get`,
//! before any eviction, and by an optional sweeper timer.

use crate::infrastructure::resource_manager::{HandleId, ResourceManager};
use log::{debug, trace};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    access_count: u64,
    /// Monotonic access sequence; orders ties deterministically.
    last_access: u64,
}

struct CacheInner<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    seq: u64,
}

impl<K, V> CacheInner<K, V> {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

pub struct ResponseCache<K, V> {
    inner: Mutex<CacheInner<K, V>>,
    max_size: usize,
    ttl: Duration,
}

impl<K, V> ResponseCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                seq: 0,
            }),
            max_size,
            ttl,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner<K, V>> {
        // A panic while holding the lock cannot leave an entry half-written.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_expired(&self, entry: &CacheEntry<V>, now: Instant) -> bool {
        now.duration_since(entry.inserted_at) >= self.ttl
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.lock();
        let expired = match inner.entries.get(key) {
            Some(entry) => self.is_expired(entry, now),
            None => return None,
        };
        if expired {
            inner.entries.remove(key);
            trace!("Cache entry expired: key={:?}", key);
            return None;
        }

        let seq = inner.next_seq();
        let entry = inner.entries.get_mut(key)?;
        entry.access_count += 1;
        entry.last_access = seq;
        Some(entry.value.clone())
    }

    /// Inserts or replaces `key`. Replacing restarts the TTL and keeps the
    /// access count.
    pub fn set(&self, key: K, value: V) {
        if self.max_size == 0 {
            return;
        }
        let now = Instant::now();
        let mut inner = self.lock();
        let seq = inner.next_seq();

        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.value = value;
            entry.inserted_at = now;
            entry.last_access = seq;
            return;
        }

        if inner.entries.len() >= self.max_size {
            let ttl = self.ttl;
            inner
                .entries
                .retain(|_, entry| now.duration_since(entry.inserted_at) < ttl);
        }
        while inner.entries.len() >= self.max_size {
            let victim = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| (entry.access_count, entry.last_access))
                .map(|(key, _)| key.clone());
            match victim {
                Some(victim) => {
                    debug!("Evicting cache entry: key={:?}", victim);
                    inner.entries.remove(&victim);
                }
                None => break,
            }
        }

        inner.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                access_count: 0,
                last_access: seq,
            },
        );
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.lock().entries.remove(key).map(|entry| entry.value)
    }

    /// Removes every entry matching `predicate`; returns how many were removed.
    pub fn remove_where(&self, mut predicate: impl FnMut(&K) -> bool) -> usize {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !predicate(key));
        before - inner.entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn contains(&self, key: &K) -> bool {
        let now = Instant::now();
        self.lock()
            .entries
            .get(key)
            .map_or(false, |entry| !self.is_expired(entry, now))
    }

    /// Drops expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let ttl = self.ttl;
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, entry| now.duration_since(entry.inserted_at) < ttl);
        let purged = before - inner.entries.len();
        if purged > 0 {
            trace!("Purged expired cache entries: count={}", purged);
        }
        purged
    }
}

impl<K, V> ResponseCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Registers an interval timer that purges expired entries. The timer
    /// holds only a weak reference, so dropping the cache stops the sweeps.
    pub fn start_sweeper(
        self: &Arc<Self>,
        resources: &ResourceManager,
        scope: impl Into<String>,
        interval: Duration,
    ) -> HandleId {
        let cache = Arc::downgrade(self);
        resources.schedule_interval(scope, interval, move || {
            if let Some(cache) = cache.upgrade() {
                cache.purge_expired();
            }
        })
    }
}
