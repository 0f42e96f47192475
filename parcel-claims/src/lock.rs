//! Keyed mutual exclusion with a reference-counted lock table.
//!
//! Each key gets a lock slot on first use. The slot is dropped from the table
//! when its last guard is released and nobody is waiting, so the table only
//! ever holds keys that are in use.
//!
//! ```text
//! acquire(k) ── slot absent ──→ insert slot ──→ held
//!            ── slot free   ──────────────────→ held
//!            ── slot held   ──→ wait ─────────→ held
//! drop(guard) ──→ release ──→ no waiters? remove slot
//! ```

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex, PoisonError};

#[derive(Debug, Default)]
struct LockSlot {
    held: Mutex<bool>,
    released: Condvar,
}

/// A table of exclusive locks addressed by key.
pub struct KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    slots: DashMap<K, Arc<LockSlot>>,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Block until the lock for `key` is free, then take it.
    pub fn acquire(&self, key: K) -> KeyedGuard<'_, K> {
        // The shard lock is released at the end of this statement, before we block on the slot.
        let slot = Arc::clone(
            &*self
                .slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(LockSlot::default())),
        );

        let mut held = slot.held.lock().unwrap_or_else(PoisonError::into_inner);
        while *held {
            held = slot
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *held = true;
        drop(held);

        KeyedGuard {
            locks: self,
            key,
            slot,
        }
    }

    /// Number of keys currently locked or waited on.
    pub fn active_locks(&self) -> usize {
        self.slots.len()
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone + Ord,
{
    /// Take the locks for every key, in ascending key order. Duplicates are locked once.
    pub fn acquire_all<I>(&self, keys: I) -> Vec<KeyedGuard<'_, K>>
    where
        I: IntoIterator<Item = K>,
    {
        let ordered: BTreeSet<K> = keys.into_iter().collect();
        ordered.into_iter().map(|key| self.acquire(key)).collect()
    }
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLocks")
            .field("active", &self.slots.len())
            .finish()
    }
}

/// Holds the lock for one key. Released on drop.
pub struct KeyedGuard<'a, K>
where
    K: Eq + Hash + Clone,
{
    locks: &'a KeyedLocks<K>,
    key: K,
    slot: Arc<LockSlot>,
}

impl<K> KeyedGuard<'_, K>
where
    K: Eq + Hash + Clone,
{
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K> Drop for KeyedGuard<'_, K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        {
            let mut held = self.slot.held.lock().unwrap_or_else(PoisonError::into_inner);
            *held = false;
        }
        self.slot.released.notify_one();

        // Two references means only the table and this guard know the slot.
        self.locks
            .slots
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_table_empties_after_release() {
        let locks: KeyedLocks<u32> = KeyedLocks::new();
        {
            let _a = locks.acquire(1);
            let _b = locks.acquire(2);
            assert_eq!(locks.active_locks(), 2);
        }
        assert_eq!(locks.active_locks(), 0);
    }

    #[test]
    fn test_reacquire_after_release() {
        let locks: KeyedLocks<&str> = KeyedLocks::new();
        drop(locks.acquire("a"));
        let guard = locks.acquire("a");
        assert_eq!(*guard.key(), "a");
    }

    #[test]
    fn test_acquire_all_sorted_and_deduplicated() {
        let locks: KeyedLocks<i32> = KeyedLocks::new();
        let guards = locks.acquire_all(vec![3, 1, 2, 1]);
        let keys: Vec<i32> = guards.iter().map(|g| *g.key()).collect();
        assert_eq!(keys, vec![1, 2, 3]);
        assert_eq!(locks.active_locks(), 3);
        drop(guards);
        assert_eq!(locks.active_locks(), 0);
    }

    #[test]
    fn test_same_key_is_mutually_exclusive() {
        let locks: KeyedLocks<u8> = KeyedLocks::new();
        let inside = AtomicUsize::new(0);
        let max_inside = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..20 {
                        let _guard = locks.acquire(7);
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_micros(50));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active_locks(), 0);
    }

    #[test]
    fn test_different_keys_do_not_block() {
        let locks: KeyedLocks<u8> = KeyedLocks::new();
        let _a = locks.acquire(1);
        std::thread::scope(|s| {
            s.spawn(|| {
                let _b = locks.acquire(2);
            })
            .join()
            .unwrap();
        });
        assert_eq!(locks.active_locks(), 1);
    }
}
