//! Module-aware class and resource loading.
//!
//! A [`ModuleLoader`] owns one [`Domain`] and answers class and resource lookups for it. Every
//! lookup is classified by the package it names:
//!
//! 1. **Local** - a module registered with this loader owns the package. The module is the only
//!    place searched for classes (closed world).
//! 2. **Remote** - the package is routed to another loader. That loader answers, and its answer
//!    is final.
//! 3. **Unowned** - classes go to the parent (or the bootstrap loader), then to this loader's
//!    own search path. Resources are searched in every local module, then on the search path.
//!
//! # Architecture
//!
//! Registration tables (modules, package owners, remote routes) are append-only and written
//! under one registration mutex; lookups read them without locking. A route whose chain would
//! lead back to the adding loader is rejected, so delegation along routes always terminates. Module readers are opened
//! lazily through a [`KeyedValueCache`], so each module is opened at most once even under
//! concurrent first access. Class definition is serialized per class name by a
//! [`CountedLockTable`] scoped to this loader; the lock is never held while delegating to
//! another loader.
//!
//! # Key Components
//!
//! - [`ModuleLoader`] / [`ModuleLoaderBuilder`] - The loader and its construction
//! - [`DefinedClass`] / [`ClassMaterializer`] - Class records and the hook producing them
//! - [`LoaderPool`] / [`Configuration`] - One loader per module, wired from a read graph
//!
//! # Examples
//!
//! ```rust
//! use modloader::{
//!     domain::{Domain, DomainKind},
//!     loader::ModuleLoader,
//!     module::{MemoryModule, ModuleDescriptor, ModuleReference},
//! };
//!
//! let boot = ModuleLoader::builder(Domain::new("boot", DomainKind::Boot)).build();
//! boot.register_module(ModuleReference::new(
//!     ModuleDescriptor::builder("base").exports("a.b").build()?,
//!     MemoryModule::new("base").with_entry("a/b/C.class", vec![0xCA, 0xFE]),
//! ))?;
//!
//! let app = ModuleLoader::builder(Domain::new("app", DomainKind::Application)).build();
//! app.add_remote_route("a.b", &boot)?;
//!
//! let class = app.load_class("a.b.C")?;
//! assert_eq!(class.domain(), boot.domain().id());
//! # Ok::<(), modloader::Error>(())
//! ```

mod class;
mod pool;
mod resources;

pub use class::{ClassDefinition, ClassMaterializer, DefinedClass, RetainBytes};
pub use pool::{Configuration, LoaderPool};

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, RwLock, Weak},
};

use dashmap::{mapref::entry::Entry, DashMap};
use tracing::{debug, trace, warn};

use crate::{
    cache::{CompoundKey, KeyedValueCache},
    classpath::{AccessCheck, ArchiveOpener, PathSpec, SearchPathResolver},
    config::LoaderConfig,
    domain::{Domain, DomainKind},
    location::{class_package, class_resource_name, is_binary_name, Location},
    module::{EmptyReader, ModuleReader, ModuleReference},
    native::{NativeLibraryManager, NativeOpener, NativeRegistry},
    utils::synchronization::CountedLockTable,
    Conflict, Error, Result,
};

/// Misc resource name -> every local module location holding it.
type MiscResources = DashMap<String, Arc<[Location]>>;

/// Serializes route additions across all loaders so the cycle check and the insert are atomic.
static ROUTE_WIRING: Mutex<()> = Mutex::new(());

/// Where a package is served from, as seen by one loader.
enum PackageRoute {
    Local(ModuleReference),
    Remote(Weak<ModuleLoader>),
    Unowned,
}

/// The class and resource loader of one domain.
///
/// Loaders are always handled through `Arc`; remote routes hold weak references, so a loader
/// pointing at another never keeps it alive.
pub struct ModuleLoader {
    domain: Domain,
    parent: Option<Arc<ModuleLoader>>,
    bootstrap: Option<Arc<ModuleLoader>>,
    config: LoaderConfig,
    /// Serializes writers of the module, package and route tables
    registration: Mutex<()>,
    modules: boxcar::Vec<ModuleReference>,
    module_index: DashMap<String, usize>,
    packages: DashMap<String, usize>,
    routes: DashMap<String, Weak<ModuleLoader>>,
    path: Option<SearchPathResolver>,
    readers: KeyedValueCache<Arc<dyn ModuleReader>>,
    reader_root: CompoundKey,
    classes: DashMap<String, Arc<DefinedClass>>,
    class_locks: CountedLockTable<String>,
    misc: RwLock<Option<Arc<MiscResources>>>,
    materializer: Arc<dyn ClassMaterializer>,
    natives: NativeLibraryManager,
}

impl ModuleLoader {
    /// Start building a loader for `domain`.
    #[must_use]
    pub fn builder(domain: Domain) -> ModuleLoaderBuilder {
        ModuleLoaderBuilder::new(domain)
    }

    /// The domain this loader serves.
    #[must_use]
    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// The parent loader, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&Arc<ModuleLoader>> {
        self.parent.as_ref()
    }

    /// The loader configuration.
    #[must_use]
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// The loader's own search path, if it has one.
    #[must_use]
    pub fn search_path(&self) -> Option<&SearchPathResolver> {
        self.path.as_ref()
    }

    /// The native library manager of this loader's domain.
    #[must_use]
    pub fn natives(&self) -> &NativeLibraryManager {
        &self.natives
    }

    /// Register `module` with this loader and claim its packages.
    ///
    /// Registration is all-or-nothing: on a conflict none of the module's packages are claimed.
    ///
    /// # Errors
    /// Returns [`Error::ConfigurationConflict`] when a module of that name is already
    /// registered, when another local module owns one of its packages, or when one of its
    /// packages is routed to another loader.
    pub fn register_module(&self, module: ModuleReference) -> Result<()> {
        let _guard = lock!(self.registration);

        if self.module_index.contains_key(module.name()) {
            return Err(Error::ConfigurationConflict(Conflict::DuplicateModule(
                module.name().to_string(),
            )));
        }

        for package in module.descriptor().packages() {
            if let Some(owner) = self.packages.get(package) {
                return Err(Error::ConfigurationConflict(Conflict::DuplicatePackage {
                    package: package.clone(),
                    existing: self.modules[*owner].name().to_string(),
                    incoming: module.name().to_string(),
                }));
            }
            if let Some(route) = self.routes.get(package) {
                return Err(Error::ConfigurationConflict(Conflict::AlreadyRouted {
                    package: package.clone(),
                    module: module.name().to_string(),
                    target: route
                        .upgrade()
                        .map_or_else(|| "<reclaimed>".to_string(), |target| target.domain.name().to_string()),
                }));
            }
        }

        let packages: Vec<String> = module.descriptor().packages().iter().cloned().collect();
        let name = module.name().to_string();
        let index = self.modules.push(module);
        for package in packages {
            self.packages.insert(package, index);
        }
        self.module_index.insert(name.clone(), index);

        // a module registered after a misc lookup may hold resources the cache reported absent
        self.clear_resource_cache();

        debug!(domain = %self.domain, module = %name, "registered module");
        Ok(())
    }

    /// Route lookups for `package` to `target`.
    ///
    /// Adding the same route twice is a no-op.
    ///
    /// # Errors
    /// Returns [`Error::ConfigurationConflict`] when a local module owns `package`, when
    /// `package` is already routed to a different loader, or when following `target`'s routes
    /// for `package` leads back to this loader.
    pub fn add_remote_route(&self, package: &str, target: &Arc<ModuleLoader>) -> Result<()> {
        let _wiring = lock!(ROUTE_WIRING);
        let _guard = lock!(self.registration);

        if let Some(owner) = self.packages.get(package) {
            return Err(Error::ConfigurationConflict(Conflict::LocallyOwned {
                package: package.to_string(),
                module: self.modules[*owner].name().to_string(),
            }));
        }
        if self.routes_back_here(package, target) {
            return Err(Error::ConfigurationConflict(Conflict::ConflictingRoute {
                package: package.to_string(),
                existing: self.domain.name().to_string(),
                incoming: target.domain.name().to_string(),
            }));
        }

        match self.routes.entry(package.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(Arc::downgrade(target));
            }
            Entry::Occupied(mut entry) => {
                let existing = entry.get().upgrade();
                match existing {
                    Some(existing) if Arc::ptr_eq(&existing, target) => return Ok(()),
                    Some(existing) => {
                        return Err(Error::ConfigurationConflict(Conflict::ConflictingRoute {
                            package: package.to_string(),
                            existing: existing.domain.name().to_string(),
                            incoming: target.domain.name().to_string(),
                        }));
                    }
                    // the previous target was reclaimed
                    None => {
                        entry.insert(Arc::downgrade(target));
                    }
                }
            }
        }

        trace!(domain = %self.domain, package, target = %target.domain, "added remote route");
        Ok(())
    }

    /// Every registered module, in registration order.
    #[must_use]
    pub fn modules(&self) -> Vec<ModuleReference> {
        self.modules.iter().map(|(_, module)| module.clone()).collect()
    }

    /// The registered module named `name`.
    #[must_use]
    pub fn module(&self, name: &str) -> Option<ModuleReference> {
        self.module_index
            .get(name)
            .map(|index| self.modules[*index].clone())
    }

    /// The local module owning `package`.
    #[must_use]
    pub fn module_for_package(&self, package: &str) -> Option<ModuleReference> {
        self.packages
            .get(package)
            .map(|index| self.modules[*index].clone())
    }

    /// Every package owned by a local module, sorted.
    #[must_use]
    pub fn defined_packages(&self) -> Vec<String> {
        let mut packages: Vec<String> = self.packages.iter().map(|entry| entry.key().clone()).collect();
        packages.sort();
        packages
    }

    /// Every package routed to another loader, sorted.
    #[must_use]
    pub fn remote_packages(&self) -> Vec<String> {
        let mut packages: Vec<String> = self.routes.iter().map(|entry| entry.key().clone()).collect();
        packages.sort();
        packages
    }

    /// The class `name` if this loader already defined it.
    #[must_use]
    pub fn find_loaded_class(&self, name: &str) -> Option<Arc<DefinedClass>> {
        self.classes.get(name).map(|class| Arc::clone(class.value()))
    }

    /// Number of classes defined by this loader.
    #[must_use]
    pub fn defined_class_count(&self) -> usize {
        self.classes.len()
    }

    /// Load the class `name` as seen from this domain.
    ///
    /// # Errors
    /// - [`Error::NotFound`] when the class is not visible from this domain
    /// - [`Error::IndexIntegrity`] when a search path index is corrupt
    /// - the error of the [`ClassMaterializer`] rejecting the bytes
    pub fn load_class(&self, name: &str) -> Result<Arc<DefinedClass>> {
        self.load_class_or_none(name)?
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Load the class `name`, reporting absence as `Ok(None)`.
    ///
    /// # Errors
    /// Same as [`Self::load_class`], minus [`Error::NotFound`].
    pub fn load_class_or_none(&self, name: &str) -> Result<Option<Arc<DefinedClass>>> {
        if !is_binary_name(name) {
            trace!(domain = %self.domain, class = name, "rejected malformed class name");
            return Ok(None);
        }
        if let Some(class) = self.find_loaded_class(name) {
            return Ok(Some(class));
        }

        match self.route(class_package(name)) {
            PackageRoute::Local(module) => {
                trace!(domain = %self.domain, class = name, module = module.name(), "local class lookup");
                self.define_from_module(&module, name)
            }
            PackageRoute::Remote(target) => match target.upgrade() {
                Some(target) => {
                    trace!(domain = %self.domain, class = name, target = %target.domain, "delegating to remote loader");
                    target.load_class_or_none(name)
                }
                None => Ok(None),
            },
            PackageRoute::Unowned => {
                if let Some(delegate) = self.delegate() {
                    if let Some(class) = delegate.load_class_or_none(name)? {
                        return Ok(Some(class));
                    }
                }
                self.define_from_path(name)
            }
        }
    }

    /// Load the class `name` from the local module `module` only.
    ///
    /// Returns `Ok(None)` when `module` is not registered here, does not own the class's
    /// package, or `name` is not a binary name.
    ///
    /// # Errors
    /// Returns the error of the [`ClassMaterializer`] rejecting the bytes.
    pub fn find_class_in_module(&self, module: &str, name: &str) -> Result<Option<Arc<DefinedClass>>> {
        if !is_binary_name(name) {
            return Ok(None);
        }
        let Some(module) = self.module(module) else {
            return Ok(None);
        };
        if !module.descriptor().contains(class_package(name)) {
            return Ok(None);
        }
        self.define_from_module(&module, name)
    }

    /// Whether lookups of `package` sent to `target` would eventually come back to this loader.
    ///
    /// Callers hold [`ROUTE_WIRING`], so the chain cannot change underneath the walk.
    fn routes_back_here(&self, package: &str, target: &Arc<ModuleLoader>) -> bool {
        let mut visited = HashSet::new();
        let mut current = Arc::clone(target);
        loop {
            if std::ptr::eq(Arc::as_ptr(&current), self) || !visited.insert(Arc::as_ptr(&current)) {
                return true;
            }
            if current.packages.contains_key(package) {
                return false;
            }
            let next = current.routes.get(package).and_then(|route| route.upgrade());
            match next {
                Some(next) => current = next,
                None => return false,
            }
        }
    }

    fn route(&self, package: &str) -> PackageRoute {
        if let Some(module) = self.module_for_package(package) {
            return PackageRoute::Local(module);
        }
        match self.routes.get(package) {
            Some(target) => PackageRoute::Remote(target.value().clone()),
            None => PackageRoute::Unowned,
        }
    }

    /// Where unowned lookups go before the search path.
    fn delegate(&self) -> Option<&Arc<ModuleLoader>> {
        if self.parent.is_some() {
            return self.parent.as_ref();
        }
        if self.domain.kind() == DomainKind::Boot {
            return None;
        }
        self.bootstrap
            .as_ref()
            .filter(|bootstrap| !std::ptr::eq(Arc::as_ptr(bootstrap), self))
    }

    /// The reader of `module`, opened on first use.
    fn reader(&self, module: &ModuleReference) -> Result<Arc<dyn ModuleReader>> {
        let key = self.reader_root.sub(module.name().to_string());
        self.readers.compute_if_absent(self.domain.id(), &key, |_, _| {
            let reader: Arc<dyn ModuleReader> = match module.open() {
                Ok(reader) => reader,
                Err(error) => {
                    warn!(domain = %self.domain, module = module.name(), %error, "module could not be opened, treating it as empty");
                    Arc::new(EmptyReader)
                }
            };
            Ok(Some(reader))
        })
    }

    fn class_entry(&self, name: &str) -> String {
        class_resource_name(name, &self.config.class_suffix)
    }

    fn define_from_module(&self, module: &ModuleReference, name: &str) -> Result<Option<Arc<DefinedClass>>> {
        let _lock = self.class_locks.acquire(name.to_string());
        if let Some(class) = self.find_loaded_class(name) {
            return Ok(Some(class));
        }

        let reader = self.reader(module)?;
        let entry = self.class_entry(name);
        let bytes = match reader.read(&entry) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(None),
            Err(error) => {
                warn!(domain = %self.domain, module = module.name(), class = name, %error, "failed to read class bytes");
                return Ok(None);
            }
        };

        let source = Location::Module {
            module: module.name().to_string(),
            entry,
        };
        let defined = self.define(name, Some(module.name()), &source, &bytes);
        reader.release(bytes);
        defined.map(Some)
    }

    fn define_from_path(&self, name: &str) -> Result<Option<Arc<DefinedClass>>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };

        let _lock = self.class_locks.acquire(name.to_string());
        if let Some(class) = self.find_loaded_class(name) {
            return Ok(Some(class));
        }

        let entry = self.class_entry(name);
        let handle = match path.get_resource(&entry) {
            Ok(Some(handle)) => handle,
            Ok(None) => return Ok(None),
            Err(error @ Error::IndexIntegrity { .. }) => return Err(error),
            Err(error) => {
                warn!(domain = %self.domain, class = name, %error, "search path lookup failed");
                return Ok(None);
            }
        };
        let bytes = match handle.bytes() {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(domain = %self.domain, class = name, %error, "failed to read class bytes");
                return Ok(None);
            }
        };

        self.define(name, None, handle.location(), &bytes).map(Some)
    }

    /// Materialize and record a class. Callers hold the class name lock.
    fn define(&self, name: &str, module: Option<&str>, source: &Location, bytes: &[u8]) -> Result<Arc<DefinedClass>> {
        if self.classes.contains_key(name) {
            return Err(Error::DuplicateDefinition {
                name: name.to_string(),
                domain: self.domain.id(),
            });
        }

        let class = Arc::new(self.materializer.materialize(ClassDefinition {
            name,
            domain: self.domain.id(),
            module,
            source,
            bytes,
        })?);

        match self.classes.entry(name.to_string()) {
            Entry::Occupied(_) => Err(Error::DuplicateDefinition {
                name: name.to_string(),
                domain: self.domain.id(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&class));
                debug!(domain = %self.domain, class = name, source = %source, "defined class");
                Ok(class)
            }
        }
    }
}

impl Drop for ModuleLoader {
    fn drop(&mut self) {
        for reader in self.readers.values(self.domain.id()) {
            if let Err(error) = reader.close() {
                warn!(domain = %self.domain, %error, "failed to close module reader");
            }
        }
        self.readers.evict_domain(self.domain.id());

        if let Some(path) = &self.path {
            for error in path.close() {
                warn!(domain = %self.domain, %error, "failed to close search path entry");
            }
        }
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("domain", &self.domain)
            .field("modules", &self.module_index.len())
            .field("routes", &self.routes.len())
            .field("classes", &self.classes.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ModuleLoader`].
pub struct ModuleLoaderBuilder {
    domain: Domain,
    parent: Option<Arc<ModuleLoader>>,
    bootstrap: Option<Arc<ModuleLoader>>,
    config: LoaderConfig,
    search_path: Vec<PathSpec>,
    archives: Option<Arc<dyn ArchiveOpener>>,
    access: Option<Arc<dyn AccessCheck>>,
    materializer: Arc<dyn ClassMaterializer>,
    natives: Option<(Arc<dyn NativeOpener>, Arc<NativeRegistry>)>,
}

impl ModuleLoaderBuilder {
    fn new(domain: Domain) -> Self {
        ModuleLoaderBuilder {
            domain,
            parent: None,
            bootstrap: None,
            config: LoaderConfig::default(),
            search_path: Vec::new(),
            archives: None,
            access: None,
            materializer: Arc::new(RetainBytes),
            natives: None,
        }
    }

    /// Delegate unowned lookups to `parent`.
    #[must_use]
    pub fn parent(mut self, parent: Arc<ModuleLoader>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Delegate unowned lookups to `bootstrap` when there is no parent.
    #[must_use]
    pub fn bootstrap(mut self, bootstrap: Arc<ModuleLoader>) -> Self {
        self.bootstrap = Some(bootstrap);
        self
    }

    /// Replace the loader configuration.
    #[must_use]
    pub fn config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Give the loader its own search path.
    #[must_use]
    pub fn search_path(mut self, paths: Vec<PathSpec>) -> Self {
        self.search_path = paths;
        self
    }

    /// Open search path archives with `opener`.
    #[must_use]
    pub fn archive_opener(mut self, opener: Arc<dyn ArchiveOpener>) -> Self {
        self.archives = Some(opener);
        self
    }

    /// Check every search path location with `access`.
    #[must_use]
    pub fn access_check(mut self, access: Arc<dyn AccessCheck>) -> Self {
        self.access = Some(access);
        self
    }

    /// Materialize classes with `materializer` instead of [`RetainBytes`].
    #[must_use]
    pub fn materializer(mut self, materializer: Arc<dyn ClassMaterializer>) -> Self {
        self.materializer = materializer;
        self
    }

    /// Open native libraries with `opener`, arbitrated by `registry`.
    #[must_use]
    pub fn native_opener(mut self, opener: Arc<dyn NativeOpener>, registry: Arc<NativeRegistry>) -> Self {
        self.natives = Some((opener, registry));
        self
    }

    /// Build the loader.
    ///
    /// A search path resolver is created only when search path entries or an archive opener
    /// were supplied.
    #[must_use]
    pub fn build(self) -> Arc<ModuleLoader> {
        let path = (!self.search_path.is_empty() || self.archives.is_some()).then(|| {
            let resolver = match self.archives {
                Some(opener) => SearchPathResolver::with_opener(self.search_path, opener, self.config.search_path.clone()),
                None => SearchPathResolver::new(self.search_path, self.config.search_path.clone()),
            };
            match self.access {
                Some(access) => resolver.with_access_check(access),
                None => resolver,
            }
        });

        let natives = match self.natives {
            Some((opener, registry)) => {
                NativeLibraryManager::with_opener(&self.domain, self.config.native.clone(), opener, registry)
            }
            None => NativeLibraryManager::new(&self.domain, self.config.native.clone()),
        };

        let readers = KeyedValueCache::new();
        let reader_root = readers.root("module-readers");

        Arc::new(ModuleLoader {
            domain: self.domain,
            parent: self.parent,
            bootstrap: self.bootstrap,
            config: self.config,
            registration: Mutex::new(()),
            modules: boxcar::Vec::new(),
            module_index: DashMap::new(),
            packages: DashMap::new(),
            routes: DashMap::new(),
            path,
            readers,
            reader_root,
            classes: DashMap::new(),
            class_locks: CountedLockTable::new(),
            misc: RwLock::new(None),
            materializer: self.materializer,
            natives,
        })
    }
}
