//! Process-wide native library state.

use std::sync::{Arc, OnceLock};

use crossbeam_skiplist::SkipMap;

use crate::{domain::DomainId, utils::synchronization::CountedLockTable};

static GLOBAL: OnceLock<Arc<NativeRegistry>> = OnceLock::new();

/// Which domain holds each library name, and the per-name locks that serialize load and unload.
///
/// A platform library can only be mapped once per process, so the name set is shared by every
/// manager. Managers use [`NativeRegistry::global`]; separate instances exist for isolated
/// embeddings and tests.
#[derive(Default)]
pub struct NativeRegistry {
    /// Lock-free name -> owning domain map
    names: SkipMap<String, DomainId>,
    pub(crate) locks: CountedLockTable<String>,
}

impl NativeRegistry {
    /// Create an empty, isolated registry.
    #[must_use]
    pub fn new() -> Self {
        NativeRegistry {
            names: SkipMap::new(),
            locks: CountedLockTable::new(),
        }
    }

    /// The process-wide registry.
    pub fn global() -> Arc<NativeRegistry> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(NativeRegistry::new())))
    }

    /// The domain currently holding `name`.
    #[must_use]
    pub fn owner(&self, name: &str) -> Option<DomainId> {
        self.names.get(name).map(|entry| *entry.value())
    }

    /// Every registered name, sorted.
    #[must_use]
    pub fn loaded_names(&self) -> Vec<String> {
        self.names.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of library names currently locked or waited for.
    #[must_use]
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }

    pub(crate) fn register(&self, name: &str, owner: DomainId) {
        self.names.insert(name.to_string(), owner);
    }

    pub(crate) fn unregister(&self, name: &str) {
        self.names.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_unregister() {
        let registry = NativeRegistry::new();
        let domain = DomainId::next();

        registry.register("b", domain);
        registry.register("a", domain);
        assert_eq!(registry.owner("a"), Some(domain));
        assert_eq!(registry.loaded_names(), vec!["a".to_string(), "b".to_string()]);

        registry.unregister("a");
        assert_eq!(registry.owner("a"), None);
        assert_eq!(registry.active_locks(), 0);
    }

    #[test]
    fn test_global_is_shared() {
        assert!(Arc::ptr_eq(&NativeRegistry::global(), &NativeRegistry::global()));
    }
}
