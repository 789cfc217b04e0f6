//! Clock-style cache with a lock-free "recently used" bit.
//!
//! Lookups only flip an atomic flag, so a cache behind a read lock can serve
//! hits concurrently. The clock hand sweeps in insertion order on eviction:
//! an entry with its flag set loses the flag and goes to the back, the first
//! entry without one is evicted.

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};

use hashbrown::HashMap;

struct Slot<V> {
    value: V,
    referenced: AtomicBool,
}

/// A bounded map with second-chance eviction.
///
/// ```
/// use trellis_core::cache::SecondChanceLru;
///
/// let mut cache = SecondChanceLru::new(2);
/// cache.insert("RETURN 1", 1);
/// cache.insert("RETURN 2", 2);
/// let _ = cache.get(&"RETURN 1");
///
/// let evicted = cache.insert("RETURN 3", 3);
/// assert_eq!(evicted, Some(("RETURN 2", 2)));
/// ```
pub struct SecondChanceLru<K, V> {
    slots: HashMap<K, Slot<V>>,
    clock: VecDeque<K>,
    capacity: usize,
}

impl<K: Hash + Eq + Clone, V> SecondChanceLru<K, V> {
    /// Creates a cache holding at most `capacity` entries (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: HashMap::with_capacity(capacity),
            clock: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Looks up `key` and marks it as recently used.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.slots.get(key).map(|slot| {
            slot.referenced.store(true, Ordering::Relaxed);
            &slot.value
        })
    }

    /// Presence check that leaves the reference bit alone.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    /// Inserts or replaces `key`. Returns the entry evicted to make room.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(slot) = self.slots.get_mut(&key) {
            slot.value = value;
            slot.referenced.store(true, Ordering::Relaxed);
            return None;
        }
        let evicted = if self.slots.len() >= self.capacity {
            self.evict_one()
        } else {
            None
        };
        self.slots.insert(
            key.clone(),
            Slot {
                value,
                referenced: AtomicBool::new(false),
            },
        );
        self.clock.push_back(key);
        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.slots.remove(key)?;
        self.clock.retain(|k| k != key);
        Some(slot.value)
    }

    /// Each entry is inspected at most twice, so a fully referenced cache
    /// still evicts its oldest entry.
    fn evict_one(&mut self) -> Option<(K, V)> {
        for _ in 0..self.clock.len() * 2 {
            let key = self.clock.pop_front()?;
            let Some(slot) = self.slots.get(&key) else {
                continue;
            };
            if slot.referenced.swap(false, Ordering::Relaxed) {
                self.clock.push_back(key);
            } else {
                return self.slots.remove(&key).map(|slot| (key, slot.value));
            }
        }
        let key = self.clock.pop_front()?;
        self.slots.remove(&key).map(|slot| (key, slot.value))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.clock.clear();
    }
}
