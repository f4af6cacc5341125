//! Bounded, time-expiring map.
//!
//! Every mutable cache in the bot (throttle counters, pending albums, the
//! error-dedup set) is one of these, owned by the service that uses it.
//! Writes refresh the entry's expiry. Reads never do.

use std::{collections::HashMap, hash::Hash, time::Duration};

use tokio::time::Instant;

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    capacity: usize,
    entries: HashMap<K, Entry<V>>,
}

impl<K: Eq + Hash + Clone, V> TtlCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: HashMap::new(),
        }
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&mut self, key: &K, now: Instant) -> Option<&V> {
        self.drop_if_expired(key, now);
        self.entries.get(key).map(|e| &e.value)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.get_mut_at(key, Instant::now())
    }

    pub fn get_mut_at(&mut self, key: &K, now: Instant) -> Option<&mut V> {
        self.drop_if_expired(key, now);
        self.entries.get_mut(key).map(|e| &mut e.value)
    }

    pub fn contains(&mut self, key: &K) -> bool {
        self.get(key).is_some()
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    pub fn insert_at(&mut self, key: K, value: V, now: Instant) {
        self.make_room(&key, now);
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Mutable access to a live entry, inserting `default()` when absent or
    /// expired. The expiry is refreshed either way.
    pub fn upsert_with(&mut self, key: K, default: impl FnOnce() -> V) -> &mut V {
        self.upsert_with_at(key, default, Instant::now())
    }

    pub fn upsert_with_at(&mut self, key: K, default: impl FnOnce() -> V, now: Instant) -> &mut V {
        self.drop_if_expired(&key, now);
        self.make_room(&key, now);
        let expires_at = now + self.ttl;
        let entry = self.entries.entry(key).or_insert_with(|| Entry {
            value: default(),
            expires_at,
        });
        entry.expires_at = expires_at;
        &mut entry.value
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|e| e.value)
    }

    /// Number of stored entries, expired ones included until they are touched.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn purge_expired(&mut self, now: Instant) {
        self.entries.retain(|_, e| e.expires_at > now);
    }

    fn make_room(&mut self, key: &K, now: Instant) {
        if self.entries.contains_key(key) || self.entries.len() < self.capacity {
            return;
        }
        self.purge_expired(now);
        if self.entries.len() >= self.capacity {
            self.evict_soonest();
        }
    }

    fn drop_if_expired(&mut self, key: &K, now: Instant) {
        if self
            .entries
            .get(key)
            .is_some_and(|e| e.expires_at <= now)
        {
            self.entries.remove(key);
        }
    }

    fn evict_soonest(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.expires_at)
            .map(|(k, _)| k.clone());
        if let Some(k) = victim {
            self.entries.remove(&k);
        }
    }
}
