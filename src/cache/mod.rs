//! Memoized per-domain, per-key value cache.
//!
//! [`KeyedValueCache`] associates values with a (domain, [`CompoundKey`]) pair and guarantees
//! that an expensive mapping function runs at most once per pair, no matter how many threads
//! ask for it concurrently. Typical payloads are derived data that is costly to rebuild: open
//! module readers, compiled proxy types, package maps.
//!
//! # Architecture
//!
//! Entries are either a terminal value or an in-flight computation token. `compute_if_absent`
//! installs a token atomically before running the mapping function; the token is swapped for
//! the bare value on success or removed on failure, so only the installing caller ever runs the
//! function. Other callers block on the token (never on the map) until it settles.
//!
//! # Failure and Recursion
//!
//! - A mapping function that re-enters its own (domain, key) from the same thread gets
//!   [`Error::RecursiveInvocation`] instead of deadlocking; the error propagates.
//! - A caller that finds somebody else's token settling as a failure treats the slot as
//!   transiently absent and retries; the failing caller removes its token and reports its own
//!   error.
//! - A mapping function that returns no value yields [`Error::EmptyValue`]; nothing is cached.
//!
//! There is no timeout: a stuck mapping function stalls every waiter for that pair. The cache
//! is meant for cheap, trusted mapping functions.
//!
//! # Examples
//!
//! ```rust
//! use modloader::{cache::KeyedValueCache, domain::DomainId};
//!
//! let cache: KeyedValueCache<String> = KeyedValueCache::new();
//! let names = cache.root("names");
//! let domain = DomainId::next();
//!
//! let value = cache.compute_if_absent(domain, &names.sub(1_u32), |_, _| {
//!     Ok(Some("one".to_string()))
//! })?;
//! assert_eq!(value, "one");
//! assert_eq!(cache.get(domain, &names.sub(1_u32))?, Some("one".to_string()));
//! # Ok::<(), modloader::Error>(())
//! ```

mod computation;
mod key;

pub use key::{CompoundKey, KeyArena, KeyPart};

use std::{sync::Arc, thread};

use dashmap::{mapref::entry::Entry, DashMap};

use crate::{cache::computation::Computation, domain::DomainId, Error, Result};

/// A cached slot: either a finished value or an in-flight computation.
enum Slot<V> {
    Value(V),
    Computing(Arc<Computation<V>>),
}

impl<V: Clone> Clone for Slot<V> {
    fn clone(&self) -> Self {
        match self {
            Slot::Value(value) => Slot::Value(value.clone()),
            Slot::Computing(token) => Slot::Computing(Arc::clone(token)),
        }
    }
}

type EntryKey = (DomainId, CompoundKey);

/// Per-domain, per-key memoizing cache.
///
/// All keys used with one cache should be built from that cache's [`KeyedValueCache::root`]
/// keys. Keys from different roots never collide, so several independent namespaces can share
/// one cache.
pub struct KeyedValueCache<V> {
    arena: Arc<KeyArena>,
    entries: DashMap<EntryKey, Slot<V>>,
}

impl<V: Clone + Send + Sync> KeyedValueCache<V> {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        KeyedValueCache {
            arena: Arc::new(KeyArena::new()),
            entries: DashMap::new(),
        }
    }

    /// Create a new root key.
    ///
    /// Each call returns a distinct namespace, even when names repeat.
    pub fn root(&self, name: &'static str) -> CompoundKey {
        CompoundKey::root(&self.arena, name)
    }

    /// Look up the value for `key` in `domain`.
    ///
    /// If the value is still being computed by another thread this waits for it. A computation
    /// that fails is reported as absent.
    ///
    /// # Errors
    /// Returns [`Error::RecursiveInvocation`] when called from inside the mapping function that
    /// is computing this very (domain, key).
    pub fn get(&self, domain: DomainId, key: &CompoundKey) -> Result<Option<V>> {
        let slot = self
            .entries
            .get(&(domain, key.clone()))
            .map(|entry| entry.value().clone());

        match slot {
            None => Ok(None),
            Some(Slot::Value(value)) => Ok(Some(value)),
            Some(Slot::Computing(token)) => token.wait(),
        }
    }

    /// Install `value` unless the (domain, key) already has one.
    ///
    /// Returns the existing value, or `None` if `value` was installed.
    ///
    /// # Errors
    /// Returns [`Error::RecursiveInvocation`] when called from inside the mapping function that
    /// is computing this very (domain, key).
    pub fn put_if_absent(&self, domain: DomainId, key: &CompoundKey, value: V) -> Result<Option<V>> {
        loop {
            let existing = match self.entries.entry((domain, key.clone())) {
                Entry::Vacant(entry) => {
                    entry.insert(Slot::Value(value));
                    return Ok(None);
                }
                Entry::Occupied(entry) => entry.get().clone(),
            };

            match existing {
                Slot::Value(value) => return Ok(Some(value)),
                Slot::Computing(token) => match token.wait()? {
                    Some(value) => return Ok(Some(value)),
                    None => thread::yield_now(),
                },
            }
        }
    }

    /// Return the value for `key`, computing it with `compute` if absent.
    ///
    /// `compute` runs at most once per (domain, key) across all concurrent callers; every caller
    /// observes the same value. A failed or empty computation leaves no entry behind, so a later
    /// call runs `compute` again.
    ///
    /// # Errors
    /// - The error returned by `compute`, for the caller that ran it
    /// - [`Error::EmptyValue`] if `compute` returned `Ok(None)`
    /// - [`Error::RecursiveInvocation`] if `compute` re-enters the same (domain, key)
    pub fn compute_if_absent<F>(&self, domain: DomainId, key: &CompoundKey, compute: F) -> Result<V>
    where
        F: FnOnce(DomainId, &CompoundKey) -> Result<Option<V>>,
    {
        loop {
            let existing = match self.entries.entry((domain, key.clone())) {
                Entry::Vacant(entry) => {
                    let token = Arc::new(Computation::started());
                    entry.insert(Slot::Computing(Arc::clone(&token)));
                    return self.run_computation(domain, key, token, compute);
                }
                Entry::Occupied(entry) => entry.get().clone(),
            };

            match existing {
                Slot::Value(value) => return Ok(value),
                Slot::Computing(token) => match token.wait()? {
                    Some(value) => return Ok(value),
                    // a foreign computation failed; its owner removes the slot
                    None => thread::yield_now(),
                },
            }
        }
    }

    /// Remove the entry for `key` if it currently holds `expected`.
    ///
    /// In-flight computations are never removed by this call.
    pub fn remove(&self, domain: DomainId, key: &CompoundKey, expected: &V) -> bool
    where
        V: PartialEq,
    {
        self.entries
            .remove_if(&(domain, key.clone()), |_, slot| {
                matches!(slot, Slot::Value(value) if value == expected)
            })
            .is_some()
    }

    /// Remove every entry for which `predicate` returns `true`.
    ///
    /// This is a best-effort maintenance operation: it is not atomic with respect to concurrent
    /// installs and may miss entries added while it runs. Intended for tests and cleanup.
    pub fn remove_all<P>(&self, predicate: P)
    where
        P: Fn(DomainId, &CompoundKey) -> bool,
    {
        self.entries
            .retain(|(domain, key), _| !predicate(*domain, key));
    }

    /// Remove `key` and every key below it in `domain` (best-effort, see [`Self::remove_all`]).
    pub fn remove_subtree(&self, domain: DomainId, key: &CompoundKey) {
        self.remove_all(|d, k| d == domain && k.is_equal_or_descendant_of(key));
    }

    /// Remove every entry of `domain` (best-effort, see [`Self::remove_all`]).
    pub fn evict_domain(&self, domain: DomainId) {
        self.remove_all(|d, _| d == domain);
    }

    /// Number of entries, including in-flight computations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the settled values stored for `domain`.
    #[must_use]
    pub fn values(&self, domain: DomainId) -> Vec<V> {
        self.entries
            .iter()
            .filter(|entry| entry.key().0 == domain)
            .filter_map(|entry| match entry.value() {
                Slot::Value(value) => Some(value.clone()),
                Slot::Computing(_) => None,
            })
            .collect()
    }

    fn run_computation<F>(
        &self,
        domain: DomainId,
        key: &CompoundKey,
        token: Arc<Computation<V>>,
        compute: F,
    ) -> Result<V>
    where
        F: FnOnce(DomainId, &CompoundKey) -> Result<Option<V>>,
    {
        let mut pending = PendingComputation {
            cache: self,
            domain,
            key,
            token,
            settled: false,
        };

        match compute(domain, key) {
            Ok(Some(value)) => {
                pending.succeed(value.clone());
                Ok(value)
            }
            Ok(None) => {
                pending.fail();
                Err(Error::EmptyValue)
            }
            Err(error) => {
                pending.fail();
                Err(error)
            }
        }
    }
}

impl<V: Clone + Send + Sync> Default for KeyedValueCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Settles a computation token exactly once, failing it if the mapping function unwinds.
struct PendingComputation<'a, V: Clone + Send + Sync> {
    cache: &'a KeyedValueCache<V>,
    domain: DomainId,
    key: &'a CompoundKey,
    token: Arc<Computation<V>>,
    settled: bool,
}

impl<V: Clone + Send + Sync> PendingComputation<'_, V> {
    fn succeed(&mut self, value: V) {
        self.settled = true;
        self.token.complete(Some(value.clone()));
        if let Some(mut slot) = self.cache.entries.get_mut(&(self.domain, self.key.clone())) {
            if matches!(&*slot, Slot::Computing(token) if Arc::ptr_eq(token, &self.token)) {
                *slot = Slot::Value(value);
            }
        }
    }

    fn fail(&mut self) {
        self.settled = true;
        self.token.complete(None);
        let token = &self.token;
        self.cache
            .entries
            .remove_if(&(self.domain, self.key.clone()), |_, slot| {
                matches!(slot, Slot::Computing(current) if Arc::ptr_eq(current, token))
            });
    }
}

impl<V: Clone + Send + Sync> Drop for PendingComputation<'_, V> {
    fn drop(&mut self) {
        if !self.settled {
            self.fail();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        panic::{self, AssertUnwindSafe},
        sync::{
            atomic::{AtomicUsize, Ordering},
            Barrier,
        },
        time::Duration,
    };

    #[test]
    fn test_compute_once_under_contention() {
        let cache = Arc::new(KeyedValueCache::<Arc<String>>::new());
        let key = cache.root("k").sub("shared");
        let domain = DomainId::next();
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let key = key.clone();
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .compute_if_absent(domain, &key, |_, _| {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(20));
                            Ok(Some(Arc::new("value".to_string())))
                        })
                        .unwrap()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|v| Arc::ptr_eq(v, &results[0])));
    }

    #[test]
    fn test_failed_compute_leaves_no_entry() {
        let cache = KeyedValueCache::<u32>::new();
        let key = cache.root("k");
        let domain = DomainId::next();

        let result = cache.compute_if_absent(domain, &key, |_, _| Err(Error::Error("boom".into())));
        assert!(matches!(result, Err(Error::Error(_))));
        assert!(cache.is_empty());

        let calls = AtomicUsize::new(0);
        let value = cache
            .compute_if_absent(domain, &key, |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Some(5))
            })
            .unwrap();
        assert_eq!(value, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_value_not_cached() {
        let cache = KeyedValueCache::<u32>::new();
        let key = cache.root("k");
        let domain = DomainId::next();

        let result = cache.compute_if_absent(domain, &key, |_, _| Ok(None));
        assert!(matches!(result, Err(Error::EmptyValue)));
        assert_eq!(cache.get(domain, &key).unwrap(), None);
    }

    #[test]
    fn test_recursive_compute_fails() {
        let cache = KeyedValueCache::<u32>::new();
        let key = cache.root("k");
        let domain = DomainId::next();

        let result = cache.compute_if_absent(domain, &key, |d, k| {
            let inner = cache.compute_if_absent(d, k, |_, _| Ok(Some(1)));
            assert!(matches!(inner, Err(Error::RecursiveInvocation)));
            assert!(matches!(cache.get(d, k), Err(Error::RecursiveInvocation)));
            inner.map(Some)
        });

        assert!(matches!(result, Err(Error::RecursiveInvocation)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_nested_different_keys_allowed() {
        let cache = KeyedValueCache::<u32>::new();
        let root = cache.root("k");
        let domain = DomainId::next();

        let value = cache
            .compute_if_absent(domain, &root.sub(1_u8), |d, _| {
                let inner = cache.compute_if_absent(d, &root.sub(2_u8), |_, _| Ok(Some(2)))?;
                Ok(Some(inner + 1))
            })
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_domains_are_isolated() {
        let cache = KeyedValueCache::<u32>::new();
        let key = cache.root("k");
        let first = DomainId::next();
        let second = DomainId::next();

        cache.compute_if_absent(first, &key, |_, _| Ok(Some(1))).unwrap();
        cache.compute_if_absent(second, &key, |_, _| Ok(Some(2))).unwrap();

        assert_eq!(cache.get(first, &key).unwrap(), Some(1));
        assert_eq!(cache.get(second, &key).unwrap(), Some(2));

        cache.evict_domain(first);
        assert_eq!(cache.get(first, &key).unwrap(), None);
        assert_eq!(cache.get(second, &key).unwrap(), Some(2));
    }

    #[test]
    fn test_put_if_absent_and_remove() {
        let cache = KeyedValueCache::<u32>::new();
        let key = cache.root("k");
        let domain = DomainId::next();

        assert_eq!(cache.put_if_absent(domain, &key, 1).unwrap(), None);
        assert_eq!(cache.put_if_absent(domain, &key, 2).unwrap(), Some(1));

        assert!(!cache.remove(domain, &key, &2));
        assert!(cache.remove(domain, &key, &1));
        assert_eq!(cache.get(domain, &key).unwrap(), None);
    }

    #[test]
    fn test_remove_subtree() {
        let cache = KeyedValueCache::<u32>::new();
        let root = cache.root("k");
        let domain = DomainId::next();

        cache.put_if_absent(domain, &root.sub("a"), 1).unwrap();
        cache.put_if_absent(domain, &root.sub("a").sub("b"), 2).unwrap();
        cache.put_if_absent(domain, &root.sub("c"), 3).unwrap();

        cache.remove_subtree(domain, &root.sub("a"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(domain, &root.sub("c")).unwrap(), Some(3));
    }

    #[test]
    fn test_panicking_compute_releases_slot() {
        let cache = KeyedValueCache::<u32>::new();
        let key = cache.root("k");
        let domain = DomainId::next();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let _ = cache.compute_if_absent(domain, &key, |_, _| panic!("compute panicked"));
        }));
        assert!(outcome.is_err());
        assert!(cache.is_empty());

        assert_eq!(
            cache.compute_if_absent(domain, &key, |_, _| Ok(Some(9))).unwrap(),
            9
        );
    }

    #[test]
    fn test_waiter_retries_after_foreign_failure() {
        let cache = Arc::new(KeyedValueCache::<u32>::new());
        let key = cache.root("k");
        let domain = DomainId::next();
        let started = Arc::new(Barrier::new(2));

        let failing = {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            let started = Arc::clone(&started);
            thread::spawn(move || {
                cache.compute_if_absent(domain, &key, |_, _| {
                    started.wait();
                    thread::sleep(Duration::from_millis(30));
                    Err(Error::Error("first attempt failed".into()))
                })
            })
        };

        started.wait();
        let value = cache
            .compute_if_absent(domain, &key, |_, _| Ok(Some(7)))
            .unwrap();

        assert!(failing.join().unwrap().is_err());
        assert_eq!(value, 7);
    }
}
