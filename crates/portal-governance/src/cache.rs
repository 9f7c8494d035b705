//! Capacity-bounded, idle-evicting key/value cache.
//!
//! Entries leave the cache when the capacity is exceeded (least recently
//! used first) or when they have not been touched for longer than the idle
//! TTL. All operations take one lock, so a read-modify-write through
//! [`BoundedCache::upsert`] is atomic with respect to other callers.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::time::Duration;

#[derive(Debug)]
struct Slot<V> {
    value: V,
    stamp: u64,
    last_access: DateTime<Utc>,
}

#[derive(Debug)]
struct CacheState<K, V> {
    slots: HashMap<K, Slot<V>>,
    // access stamp -> key, oldest first
    recency: BTreeMap<u64, K>,
    next_stamp: u64,
}

impl<K, V> CacheState<K, V>
where
    K: Eq + Hash + Clone,
{
    fn bump(&mut self) -> u64 {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        stamp
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.slots.remove(key)?;
        self.recency.remove(&slot.stamp);
        Some(slot.value)
    }

    fn evict_oldest(&mut self) -> bool {
        match self.recency.pop_first() {
            Some((_, key)) => {
                self.slots.remove(&key);
                true
            }
            None => false,
        }
    }
}

/// Bounded LRU cache with idle expiry.
#[derive(Debug)]
pub struct BoundedCache<K, V> {
    state: Mutex<CacheState<K, V>>,
    capacity: usize,
    idle_ttl: Duration,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries.
    ///
    /// A capacity of zero is treated as one.
    #[must_use]
    pub fn new(capacity: usize, idle_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState {
                slots: HashMap::new(),
                recency: BTreeMap::new(),
                next_stamp: 0,
            }),
            capacity: capacity.max(1),
            idle_ttl,
        }
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Idle time after which an entry is dropped.
    #[must_use]
    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    /// Number of entries currently held, including idle ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_idle(&self, last_access: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        // A clock that went backwards never makes an entry idle
        now.signed_duration_since(last_access)
            .to_std()
            .map_or(false, |idle| idle > self.idle_ttl)
    }

    /// Read a value, refreshing its recency.
    pub fn get(&self, key: &K, now: DateTime<Utc>) -> Option<V> {
        let mut state = self.state.lock();

        let (old_stamp, idle) = {
            let slot = state.slots.get(key)?;
            (slot.stamp, self.is_idle(slot.last_access, now))
        };

        if idle {
            state.remove(key);
            return None;
        }

        let stamp = state.bump();
        state.recency.remove(&old_stamp);
        state.recency.insert(stamp, key.clone());

        let slot = state.slots.get_mut(key)?;
        slot.stamp = stamp;
        slot.last_access = now;
        Some(slot.value.clone())
    }

    /// Insert or replace a value.
    pub fn insert(&self, key: K, value: V, now: DateTime<Utc>) {
        self.upsert(key, now, move |_| value);
    }

    /// Compute a new value from the current one under a single lock.
    ///
    /// `f` receives `None` when the key is absent or idle-expired. The
    /// stored value is returned.
    pub fn upsert<F>(&self, key: K, now: DateTime<Utc>, f: F) -> V
    where
        F: FnOnce(Option<&V>) -> V,
    {
        let mut state = self.state.lock();

        let live = state
            .slots
            .get(&key)
            .map_or(false, |slot| !self.is_idle(slot.last_access, now));
        if !live {
            state.remove(&key);
        }

        let value = f(state.slots.get(&key).map(|slot| &slot.value));

        let stamp = state.bump();
        if let Some(old_stamp) = state.slots.get(&key).map(|slot| slot.stamp) {
            state.recency.remove(&old_stamp);
        }
        state.recency.insert(stamp, key.clone());
        state.slots.insert(
            key,
            Slot {
                value: value.clone(),
                stamp,
                last_access: now,
            },
        );

        while state.slots.len() > self.capacity {
            if !state.evict_oldest() {
                break;
            }
        }

        value
    }

    /// Remove a value.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.state.lock().remove(key)
    }

    /// Drop every idle entry. Returns how many were removed.
    pub fn purge_idle(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.lock();
        let idle: Vec<K> = state
            .slots
            .iter()
            .filter(|(_, slot)| self.is_idle(slot.last_access, now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &idle {
            state.remove(key);
        }
        idle.len()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.slots.clear();
        state.recency.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    #[test]
    fn test_insert_and_get() {
        let cache = BoundedCache::new(4, Duration::from_secs(60));
        cache.insert("a".to_string(), 1, t0());

        assert_eq!(cache.get(&"a".to_string(), t0()), Some(1));
        assert_eq!(cache.get(&"b".to_string(), t0()), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let cache = BoundedCache::new(2, Duration::from_secs(60));
        cache.insert("a", 1, t0());
        cache.insert("b", 2, t0());

        // Touch "a" so "b" becomes the oldest
        assert_eq!(cache.get(&"a", t0()), Some(1));
        cache.insert("c", 3, t0());

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"b", t0()), None);
        assert_eq!(cache.get(&"a", t0()), Some(1));
        assert_eq!(cache.get(&"c", t0()), Some(3));
    }

    #[test]
    fn test_idle_entries_expire() {
        let cache = BoundedCache::new(4, Duration::from_secs(60));
        cache.insert("a", 1, t0());

        assert_eq!(cache.get(&"a", t0() + secs(30)), Some(1));
        // Access at +30s refreshed the entry, so +80s is only 50s idle
        assert_eq!(cache.get(&"a", t0() + secs(80)), Some(1));
        assert_eq!(cache.get(&"a", t0() + secs(200)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_upsert_sees_current_value() {
        let cache = BoundedCache::new(4, Duration::from_secs(60));

        let first = cache.upsert("k", t0(), |current| current.map_or(1, |v| v + 1));
        let second = cache.upsert("k", t0(), |current| current.map_or(1, |v| v + 1));
        let third = cache.upsert("k", t0(), |current| current.map_or(1, |v| v + 1));

        assert_eq!((first, second, third), (1, 2, 3));
    }

    #[test]
    fn test_upsert_treats_idle_entry_as_missing() {
        let cache = BoundedCache::new(4, Duration::from_secs(10));
        cache.insert("k", 41, t0());

        let value = cache.upsert("k", t0() + secs(11), |current| {
            assert!(current.is_none());
            1
        });
        assert_eq!(value, 1);
    }

    #[test]
    fn test_purge_idle() {
        let cache = BoundedCache::new(8, Duration::from_secs(10));
        cache.insert("old", 1, t0());
        cache.insert("new", 2, t0() + secs(8));

        assert_eq!(cache.purge_idle(t0() + secs(15)), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"new", t0() + secs(15)), Some(2));
    }

    #[test]
    fn test_clock_going_backwards_keeps_entry() {
        let cache = BoundedCache::new(2, Duration::from_secs(1));
        cache.insert("k", 7, t0());
        assert_eq!(cache.get(&"k", t0() - secs(3600)), Some(7));
    }

    #[test]
    fn test_zero_capacity_holds_one_entry() {
        let cache = BoundedCache::new(0, Duration::from_secs(1));
        cache.insert("a", 1, t0());
        cache.insert("b", 2, t0());
        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.get(&"b", t0()), Some(2));
        assert_eq!(cache.get(&"a", t0()), None);
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = BoundedCache::new(4, Duration::from_secs(60));
        cache.insert("a", 1, t0());
        cache.insert("b", 2, t0());

        assert_eq!(cache.remove(&"a"), Some(1));
        assert_eq!(cache.remove(&"a"), None);
        cache.clear();
        assert!(cache.is_empty());
    }
}
