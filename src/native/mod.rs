//! Native library loading and unloading per domain.
//!
//! A platform library can be mapped only once per process, yet several isolated domains may ask
//! for it. [`NativeLibraryManager`] arbitrates: each domain has one manager, a library name
//! belongs to at most one domain at a time, and a second domain asking for it fails with
//! [`crate::Error::CrossDomainConflict`].
//!
//! # Architecture
//!
//! - A process-wide [`NativeRegistry`] holds the lock-free name-to-owner map and a
//!   [`crate::utils::synchronization::CountedLockTable`] with one reentrant lock per name.
//!   Load and unload of a name are serialized by that lock; the lock is reentrant because a
//!   library initializer may load further libraries, including (transitively) itself.
//! - Each thread keeps a stack of libraries whose load is in progress. A nested load of a name
//!   that is still loading returns the in-progress record when it comes from the same domain,
//!   and fails for any other domain.
//! - [`current_loading_domain`] exposes the innermost in-progress load to symbol-resolution
//!   callbacks.
//!
//! # Unloading
//!
//! In [`crate::config::UnloadMode::Manual`] mode libraries unload only through
//! [`NativeLibraryManager::unload`]. In [`crate::config::UnloadMode::Auto`] mode explicit unloads
//! are refused; libraries of a reclaimable domain unload when the manager is dropped, and
//! libraries of system domains stay loaded for the life of the process.
//!
//! # Examples
//!
//! ```rust,ignore
//! use modloader::{config::NativeConfig, domain::{Domain, DomainKind}, native::NativeLibraryManager};
//!
//! let domain = Domain::new("plugins", DomainKind::Custom);
//! let natives = NativeLibraryManager::new(&domain, NativeConfig::manual().with_search_dir("/opt/lib"));
//!
//! let zlib = natives.load("z")?;
//! let deflate = natives.find("deflate");
//! natives.unload(&zlib)?;
//! # Ok::<(), modloader::Error>(())
//! ```

mod context;
mod dynamic;
mod library;
mod registry;

pub use context::{current_loading_domain, loading_depth};
pub use dynamic::{DynamicOpener, LibraryPaths};
pub use library::{LibraryState, NativeHandle, NativeLibrary, NativeOpener};
pub use registry::NativeRegistry;

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::{
    config::{NativeConfig, UnloadMode},
    domain::{Domain, DomainId},
    native::context::{in_progress, LoadingScope},
    Error, Result,
};

/// The native libraries loaded by one domain.
pub struct NativeLibraryManager {
    domain: DomainId,
    reclaimable: bool,
    mode: UnloadMode,
    opener: Arc<dyn NativeOpener>,
    registry: Arc<NativeRegistry>,
    libraries: DashMap<String, Arc<NativeLibrary>>,
}

impl NativeLibraryManager {
    /// A manager for `domain` using the platform loader and the process-wide registry.
    #[must_use]
    pub fn new(domain: &Domain, config: NativeConfig) -> Self {
        let opener = Arc::new(DynamicOpener::new(LibraryPaths::new(config.search_dirs.clone())));
        Self::with_opener(domain, config, opener, NativeRegistry::global())
    }

    /// A manager for `domain` with an explicit opener and registry.
    #[must_use]
    pub fn with_opener(
        domain: &Domain,
        config: NativeConfig,
        opener: Arc<dyn NativeOpener>,
        registry: Arc<NativeRegistry>,
    ) -> Self {
        NativeLibraryManager {
            domain: domain.id(),
            reclaimable: domain.is_reclaimable(),
            mode: config.mode,
            opener,
            registry,
            libraries: DashMap::new(),
        }
    }

    /// The domain this manager loads for.
    #[must_use]
    pub fn domain(&self) -> DomainId {
        self.domain
    }

    /// The registry shared with other managers.
    #[must_use]
    pub fn registry(&self) -> &Arc<NativeRegistry> {
        &self.registry
    }

    /// Load the library `name` for this manager's domain.
    ///
    /// Returns the existing record when this domain already loaded the library, or when the
    /// call is a nested load (from the library's own initializer) of a library this domain is
    /// still loading.
    ///
    /// # Errors
    /// - [`crate::Error::CrossDomainConflict`] when another domain holds or is loading the name
    /// - [`crate::Error::LibraryOpen`] when the platform loader fails
    pub fn load(&self, name: &str) -> Result<Arc<NativeLibrary>> {
        let resolved = self.opener.resolve(name);
        let _lock = self.registry.locks.acquire(resolved.clone());

        if let Some(loaded) = self.libraries.get(&resolved) {
            return Ok(Arc::clone(loaded.value()));
        }

        if let Some(pending) = in_progress(&resolved) {
            if pending.owner() == self.domain {
                return Ok(pending);
            }
            return Err(Error::CrossDomainConflict {
                library: resolved,
                owner: pending.owner(),
            });
        }

        if let Some(owner) = self.registry.owner(&resolved) {
            return Err(Error::CrossDomainConflict {
                library: resolved,
                owner,
            });
        }

        let auto_unload = self.mode == UnloadMode::Auto && self.reclaimable;
        let library = Arc::new(NativeLibrary::new(resolved.clone(), self.domain, auto_unload));
        library.set_state(LibraryState::Loading);

        let opened = {
            let _scope = LoadingScope::enter(Arc::clone(&library));
            self.opener.open(&resolved)
        };
        let handle = match opened {
            Ok(handle) => handle,
            Err(error) => {
                library.set_state(LibraryState::Unloaded);
                return Err(error);
            }
        };

        library.install(handle);
        self.registry.register(&resolved, self.domain);
        self.libraries.insert(resolved.clone(), Arc::clone(&library));
        library.set_state(LibraryState::Loaded);

        debug!(library = %resolved, domain = %self.domain, auto_unload, "loaded native library");
        Ok(library)
    }

    /// Unload `library`.
    ///
    /// # Errors
    /// - [`crate::Error::UnloadNotPermitted`] when the manager unloads automatically
    /// - [`crate::Error::NotOwner`] when `library` is not loaded by this manager
    /// - [`crate::Error::LibraryOpen`] when the platform refuses to close the handle
    pub fn unload(&self, library: &Arc<NativeLibrary>) -> Result<()> {
        if self.mode == UnloadMode::Auto {
            return Err(Error::UnloadNotPermitted(library.name().to_string()));
        }

        let name = library.name().to_string();
        let _lock = self.registry.locks.acquire(name.clone());

        if self
            .libraries
            .remove_if(&name, |_, loaded| Arc::ptr_eq(loaded, library))
            .is_none()
        {
            return Err(Error::NotOwner(name));
        }

        self.registry.unregister(&name);
        debug!(library = %name, domain = %self.domain, "unloading native library");
        library.release()
    }

    /// Address of `symbol` in any library loaded by this manager.
    #[must_use]
    pub fn find(&self, symbol: &str) -> Option<usize> {
        self.libraries
            .iter()
            .find_map(|entry| entry.value().find(symbol))
    }

    /// The record for `name`, if this manager loaded it.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<NativeLibrary>> {
        let resolved = self.opener.resolve(name);
        self.libraries.get(&resolved).map(|entry| Arc::clone(entry.value()))
    }

    /// Names of the libraries loaded by this manager.
    #[must_use]
    pub fn loaded(&self) -> Vec<String> {
        self.libraries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Unload every auto-unload library of this manager.
    fn unload_all(&self) {
        let names: Vec<String> = self.loaded();
        for name in names {
            let _lock = self.registry.locks.acquire(name.clone());
            let Some((_, library)) = self
                .libraries
                .remove_if(&name, |_, library| library.is_auto_unload())
            else {
                continue;
            };

            self.registry.unregister(&name);
            if let Err(error) = library.release() {
                warn!(library = %name, %error, "failed to unload native library");
            } else {
                debug!(library = %name, domain = %self.domain, "unloaded native library with its domain");
            }
        }
    }
}

impl Drop for NativeLibraryManager {
    fn drop(&mut self) {
        if self.mode == UnloadMode::Auto && self.reclaimable {
            self.unload_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::DomainKind,
        test::{FakeOpener, OpenHook},
    };
    use std::{
        sync::{Barrier, Mutex},
        thread,
    };

    fn manager(domain: &Domain, opener: &Arc<FakeOpener>, registry: &Arc<NativeRegistry>, config: NativeConfig) -> NativeLibraryManager {
        NativeLibraryManager::with_opener(domain, config, opener.clone(), Arc::clone(registry))
    }

    #[test]
    fn test_load_is_cached() {
        let registry = Arc::new(NativeRegistry::new());
        let opener = Arc::new(FakeOpener::new(["deflate"]));
        let domain = Domain::new("d", DomainKind::Custom);
        let natives = manager(&domain, &opener, &registry, NativeConfig::manual());

        let first = natives.load("z").unwrap();
        let second = natives.load("z").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(opener.open_count(), 1);
        assert_eq!(first.state(), LibraryState::Loaded);
        assert_eq!(registry.owner("z"), Some(domain.id()));
        assert!(natives.find("deflate").is_some());
        assert!(natives.find("missing").is_none());
        assert_eq!(registry.active_locks(), 0);
    }

    #[test]
    fn test_cross_domain_conflict() {
        let registry = Arc::new(NativeRegistry::new());
        let opener = Arc::new(FakeOpener::new(["f"]));
        let first_domain = Domain::new("first", DomainKind::Custom);
        let second_domain = Domain::new("second", DomainKind::Custom);
        let first = manager(&first_domain, &opener, &registry, NativeConfig::manual());
        let second = manager(&second_domain, &opener, &registry, NativeConfig::manual());

        let library = first.load("x").unwrap();
        match second.load("x") {
            Err(Error::CrossDomainConflict { library, owner }) => {
                assert_eq!(library, "x");
                assert_eq!(owner, first_domain.id());
            }
            other => panic!("expected a cross-domain conflict, got {:?}", other),
        }

        first.unload(&library).unwrap();
        assert!(second.load("x").is_ok());
    }

    #[test]
    fn test_unload_rules() {
        let registry = Arc::new(NativeRegistry::new());
        let opener = Arc::new(FakeOpener::new(["f"]));
        let domain = Domain::new("d", DomainKind::Custom);
        let other_domain = Domain::new("o", DomainKind::Custom);

        let auto = manager(&domain, &opener, &registry, NativeConfig::default());
        let library = auto.load("a").unwrap();
        assert!(library.is_auto_unload());
        assert!(matches!(auto.unload(&library), Err(Error::UnloadNotPermitted(_))));

        let manual = manager(&other_domain, &opener, &registry, NativeConfig::manual());
        let foreign = manual.load("b").unwrap();
        let stranger = manager(&Domain::new("s", DomainKind::Custom), &opener, &registry, NativeConfig::manual());
        assert!(matches!(stranger.unload(&foreign), Err(Error::NotOwner(_))));

        manual.unload(&foreign).unwrap();
        assert_eq!(foreign.state(), LibraryState::Unloaded);
        assert!(matches!(manual.unload(&foreign), Err(Error::NotOwner(_))));
        assert_eq!(opener.close_count(), 1);
    }

    #[test]
    fn test_nested_load_returns_in_progress_record() {
        let registry = Arc::new(NativeRegistry::new());
        let opener = Arc::new(FakeOpener::new(["f"]));
        let domain = Domain::new("d", DomainKind::Custom);
        let natives = Arc::new(manager(&domain, &opener, &registry, NativeConfig::manual()));

        let observed = Arc::new(Mutex::new(Vec::new()));
        {
            let natives = Arc::downgrade(&natives);
            let observed = Arc::clone(&observed);
            let hook: OpenHook = Arc::new(move |name: &str| {
                if name != "outer" {
                    return;
                }
                let natives = natives.upgrade().unwrap();
                let nested = natives.load("outer").unwrap();
                observed
                    .lock()
                    .unwrap()
                    .push((nested.state(), current_loading_domain()));
            });
            opener.set_hook(hook);
        }

        let library = natives.load("outer").unwrap();
        let observed = observed.lock().unwrap();
        assert_eq!(observed.len(), 1);
        assert_eq!(observed[0], (LibraryState::Loading, Some(domain.id())));
        assert_eq!(library.state(), LibraryState::Loaded);
        assert_eq!(opener.open_count(), 1);
        assert_eq!(current_loading_domain(), None);
    }

    #[test]
    fn test_nested_load_from_other_domain_conflicts() {
        let registry = Arc::new(NativeRegistry::new());
        let opener = Arc::new(FakeOpener::new(["f"]));
        let domain = Domain::new("d", DomainKind::Custom);
        let other_domain = Domain::new("o", DomainKind::Custom);
        let natives = manager(&domain, &opener, &registry, NativeConfig::manual());
        let other = Arc::new(manager(&other_domain, &opener, &registry, NativeConfig::manual()));

        let nested_result = Arc::new(Mutex::new(None));
        {
            let other = Arc::clone(&other);
            let nested_result = Arc::clone(&nested_result);
            opener.set_hook(Arc::new(move |name: &str| {
                if name == "shared" {
                    let outcome = other.load("shared");
                    *nested_result.lock().unwrap() = Some(outcome.is_err());
                }
            }));
        }

        natives.load("shared").unwrap();
        assert_eq!(*nested_result.lock().unwrap(), Some(true));
    }

    #[test]
    fn test_failed_open_leaves_nothing() {
        let registry = Arc::new(NativeRegistry::new());
        let opener = Arc::new(FakeOpener::new(["f"]).failing(["broken"]));
        let domain = Domain::new("d", DomainKind::Custom);
        let natives = manager(&domain, &opener, &registry, NativeConfig::manual());

        assert!(matches!(natives.load("broken"), Err(Error::LibraryOpen { .. })));
        assert!(natives.loaded().is_empty());
        assert_eq!(registry.owner("broken"), None);
        assert_eq!(registry.active_locks(), 0);
    }

    #[test]
    fn test_drop_unloads_reclaimable_domain() {
        let registry = Arc::new(NativeRegistry::new());
        let opener = Arc::new(FakeOpener::new(["f"]));

        let reclaimable = Domain::new("plugin", DomainKind::Pooled);
        let natives = manager(&reclaimable, &opener, &registry, NativeConfig::default());
        natives.load("p").unwrap();
        drop(natives);
        assert_eq!(registry.owner("p"), None);
        assert_eq!(opener.close_count(), 1);

        let system = Domain::new("app", DomainKind::Application);
        let natives = manager(&system, &opener, &registry, NativeConfig::default());
        let library = natives.load("s").unwrap();
        assert!(!library.is_auto_unload());
        drop(natives);
        assert_eq!(registry.owner("s"), Some(system.id()));
    }

    #[test]
    fn test_lock_table_empty_after_contention() {
        let registry = Arc::new(NativeRegistry::new());
        let opener = Arc::new(FakeOpener::new(["f"]));
        let barrier = Arc::new(Barrier::new(100));

        let handles: Vec<_> = (0..100)
            .map(|i| {
                let registry = Arc::clone(&registry);
                let opener = Arc::clone(&opener);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let domain = Domain::new(format!("d{}", i), DomainKind::Custom);
                    let natives = manager(&domain, &opener, &registry, NativeConfig::manual());
                    barrier.wait();
                    for round in 0..5 {
                        let name = format!("lib{}", (i + round) % 7);
                        if let Ok(library) = natives.load(&name) {
                            natives.unload(&library).unwrap();
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.active_locks(), 0);
        assert!(registry.loaded_names().is_empty());
        assert_eq!(opener.open_count(), opener.close_count());
    }
}
