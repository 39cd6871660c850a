//! Synchronization utilities for multi-threaded operations.
//!
//! This module provides the counted per-name lock table shared by the native library manager
//! (one lock per library name) and the module loader (one lock per class name within a domain).
//!
//! # Key Components
//!
//! - [`CountedLockTable`] - A concurrent map of reentrant locks that removes an entry as soon
//!   as the last holder or waiter releases it
//! - [`CountedLockGuard`] - Scope guard returned by [`CountedLockTable::acquire`]
//!
//! # Design
//!
//! Every entry carries a count of threads that hold or wait for its mutex. The count is only
//! changed while the map entry for the key is exclusively held:
//!
//! - acquire increments the count inside the entry operation, leaves the map, then blocks on
//!   the mutex;
//! - release re-enters the entry, unlocks the mutex and either decrements the count or, when
//!   it was the last reference, removes the entry before leaving the map.
//!
//! Because both transitions happen under the same entry lock, no thread can pick up an entry
//! that is already slated for removal, and a table entry never outlives its last user.

use std::{hash::Hash, sync::Arc};

use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::{lock_api::ArcReentrantMutexGuard, RawMutex, RawThreadId, ReentrantMutex};

type ArcReentrantGuard = ArcReentrantMutexGuard<RawMutex, RawThreadId, ()>;

/// A table entry: the shared reentrant mutex and the number of holders plus waiters.
struct CountedLock {
    mutex: Arc<ReentrantMutex<()>>,
    count: usize,
}

/// A concurrent table of reentrant per-key locks with exact reference counting.
///
/// The lock for a key is created on first acquire and dropped from the table when its holder
/// and waiter count returns to zero, so the table stays proportional to the number of keys
/// currently in use rather than the number of keys ever locked.
///
/// Locks are reentrant: the thread holding a key may acquire it again, which is required when
/// a library initialization routine triggers a nested load of the same library.
///
/// # Examples
///
/// ```rust,ignore
/// use modloader::utils::synchronization::CountedLockTable;
///
/// let table = CountedLockTable::new();
/// {
///     let _outer = table.acquire("libz".to_string());
///     let _inner = table.acquire("libz".to_string()); // same thread, no deadlock
///     assert_eq!(table.len(), 1);
/// }
/// assert!(table.is_empty());
/// ```
pub struct CountedLockTable<K: Eq + Hash + Clone> {
    locks: DashMap<K, CountedLock>,
}

impl<K: Eq + Hash + Clone> CountedLockTable<K> {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        CountedLockTable {
            locks: DashMap::new(),
        }
    }

    /// Acquire the lock for `key`, blocking while another thread holds it.
    ///
    /// The returned guard releases the lock, and removes the table entry when it was the last
    /// reference, when dropped.
    pub fn acquire(&self, key: K) -> CountedLockGuard<'_, K> {
        let mutex = {
            let mut entry = self.locks.entry(key.clone()).or_insert_with(|| CountedLock {
                mutex: Arc::new(ReentrantMutex::new(())),
                count: 0,
            });
            entry.count += 1;
            Arc::clone(&entry.mutex)
        };

        let guard = mutex.lock_arc();
        CountedLockGuard {
            table: self,
            key: Some(key),
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or waited for.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Returns `true` when no key is held or waited for.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Number of holders and waiters registered for `key`.
    #[must_use]
    pub fn count(&self, key: &K) -> usize {
        self.locks.get(key).map_or(0, |entry| entry.count)
    }

    fn release(&self, key: K, guard: ArcReentrantGuard) {
        match self.locks.entry(key) {
            Entry::Occupied(mut entry) => {
                drop(guard);
                if entry.get().count <= 1 {
                    entry.remove();
                } else {
                    entry.get_mut().count -= 1;
                }
            }
            Entry::Vacant(_) => drop(guard),
        }
    }
}

impl<K: Eq + Hash + Clone> Default for CountedLockTable<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Scope guard for one acquisition of a [`CountedLockTable`] key.
pub struct CountedLockGuard<'a, K: Eq + Hash + Clone> {
    table: &'a CountedLockTable<K>,
    key: Option<K>,
    guard: Option<ArcReentrantGuard>,
}

impl<K: Eq + Hash + Clone> Drop for CountedLockGuard<'_, K> {
    fn drop(&mut self) {
        if let (Some(key), Some(guard)) = (self.key.take(), self.guard.take()) {
            self.table.release(key, guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
        time::Duration,
    };

    #[test]
    fn test_entry_removed_after_release() {
        let table = CountedLockTable::new();
        {
            let _guard = table.acquire("a".to_string());
            assert_eq!(table.len(), 1);
            assert_eq!(table.count(&"a".to_string()), 1);
        }
        assert!(table.is_empty());
    }

    #[test]
    fn test_reentrant_acquire() {
        let table = CountedLockTable::new();
        let outer = table.acquire(7_u32);
        {
            let _inner = table.acquire(7_u32);
            assert_eq!(table.count(&7), 2);
        }
        assert_eq!(table.count(&7), 1);
        drop(outer);
        assert!(table.is_empty());
    }

    #[test]
    fn test_mutual_exclusion() {
        let table = Arc::new(CountedLockTable::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let _guard = table.acquire("shared");
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_micros(10));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_distinct_keys_do_not_block() {
        let table = Arc::new(CountedLockTable::new());
        let _held = table.acquire(1_u32);

        let other = Arc::clone(&table);
        let handle = thread::spawn(move || {
            let _guard = other.acquire(2_u32);
            true
        });

        assert!(handle.join().unwrap());
        assert_eq!(table.len(), 1);
    }
}
