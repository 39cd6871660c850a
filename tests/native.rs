//! Integration tests for native library arbitration across domains.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier,
    },
    thread,
};

use modloader::{
    config::NativeConfig,
    domain::{Domain, DomainKind},
    loader::ModuleLoader,
    native::{NativeHandle, NativeLibraryManager, NativeOpener, NativeRegistry},
    Error, Result,
};

/// Opens handles that export nothing, counting opens.
#[derive(Default)]
struct CountingOpener {
    opens: AtomicUsize,
}

struct NullHandle;

impl NativeHandle for NullHandle {
    fn find(&self, _symbol: &str) -> Option<usize> {
        None
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

impl NativeOpener for CountingOpener {
    fn open(&self, _resolved: &str) -> Result<Box<dyn NativeHandle>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(NullHandle))
    }
}

fn manager(name: &str, opener: &Arc<CountingOpener>, registry: &Arc<NativeRegistry>) -> NativeLibraryManager {
    NativeLibraryManager::with_opener(
        &Domain::new(name, DomainKind::Custom),
        NativeConfig::manual(),
        Arc::clone(opener) as Arc<dyn NativeOpener>,
        Arc::clone(registry),
    )
}

/// The same library name cannot be held by two domains.
#[test]
fn test_cross_domain_conflict() -> Result<()> {
    let registry = Arc::new(NativeRegistry::new());
    let opener = Arc::new(CountingOpener::default());
    let first = manager("first", &opener, &registry);
    let second = manager("second", &opener, &registry);

    let library = first.load("crypto")?;
    assert!(matches!(
        second.load("crypto"),
        Err(Error::CrossDomainConflict { .. })
    ));
    assert_eq!(registry.loaded_names(), vec!["crypto".to_string()]);

    first.unload(&library)?;
    assert!(registry.loaded_names().is_empty());
    second.load("crypto")?;
    Ok(())
}

/// After 100 threads load and unload concurrently, no lock entry survives.
#[test]
fn test_lock_table_is_empty_after_concurrent_use() {
    let registry = Arc::new(NativeRegistry::new());
    let opener = Arc::new(CountingOpener::default());
    let natives = Arc::new(manager("busy", &opener, &registry));
    let barrier = Arc::new(Barrier::new(100));

    let handles: Vec<_> = (0..100)
        .map(|i| {
            let natives = Arc::clone(&natives);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let shared = natives.load("shared").unwrap();
                assert_eq!(shared.name(), "shared");

                let own = natives.load(&format!("lib{}", i)).unwrap();
                natives.unload(&own).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(registry.active_locks(), 0);
    assert_eq!(registry.loaded_names(), vec!["shared".to_string()]);
    assert_eq!(opener.opens.load(Ordering::SeqCst), 101);
}

/// A loader's native manager acts for the loader's domain.
#[test]
fn test_loader_natives_belong_to_its_domain() -> Result<()> {
    let registry = Arc::new(NativeRegistry::new());
    let opener = Arc::new(CountingOpener::default());
    let loader = ModuleLoader::builder(Domain::new("plugin", DomainKind::Custom))
        .native_opener(Arc::clone(&opener) as Arc<dyn NativeOpener>, Arc::clone(&registry))
        .build();

    let library = loader.natives().load("plugin_native")?;
    assert_eq!(library.owner(), loader.domain().id());
    assert_eq!(registry.owner("plugin_native"), Some(loader.domain().id()));

    // auto mode and a reclaimable domain: reclaiming the loader unloads the library
    drop(library);
    drop(loader);
    assert_eq!(registry.owner("plugin_native"), None);
    Ok(())
}
