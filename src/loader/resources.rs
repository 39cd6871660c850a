//! Resource lookup for [`ModuleLoader`].
//!
//! Resources share the package routing of classes with two differences. Names in no known
//! package are never delegated: every local module is searched ("miscellaneous" resources)
//! and the result is cached per loader. Resources found in a local module are only returned
//! when the module lets other code see them.
//!
//! Unlike class lookup, I/O errors raised while reading resource bytes reach the caller.

use std::sync::Arc;

use tracing::trace;

use crate::{
    loader::{MiscResources, ModuleLoader, PackageRoute},
    location::{resource_package, Location},
    module::ModuleReference,
    Error, Result,
};

impl ModuleLoader {
    /// Locate the resource `name` in this domain.
    ///
    /// The parent chain is not consulted; see [`Self::get_resource`].
    ///
    /// # Errors
    /// - [`Error::FileError`] when a module reader fails
    /// - [`Error::IndexIntegrity`] when a search path index is corrupt
    pub fn find_resource(&self, name: &str) -> Result<Option<Location>> {
        match self.route(&resource_package(name)) {
            PackageRoute::Remote(target) => {
                return match target.upgrade() {
                    Some(target) => target.find_resource(name),
                    None => Ok(None),
                };
            }
            PackageRoute::Local(module) => {
                if let Some(location) = self.find_visible(&module, name)? {
                    return Ok(Some(location));
                }
            }
            PackageRoute::Unowned => {
                if let Some(location) = self.misc_resources(name)?.first() {
                    return Ok(Some(location.clone()));
                }
            }
        }

        match &self.path {
            Some(path) => path.find_resource(name),
            None => Ok(None),
        }
    }

    /// Every location of the resource `name` in this domain: module locations first, then the
    /// search path in order.
    ///
    /// # Errors
    /// Same as [`Self::find_resource`].
    pub fn find_resources(&self, name: &str) -> Result<Vec<Location>> {
        let mut found = Vec::new();

        match self.route(&resource_package(name)) {
            PackageRoute::Remote(target) => {
                return match target.upgrade() {
                    Some(target) => target.find_resources(name),
                    None => Ok(found),
                };
            }
            PackageRoute::Local(module) => found.extend(self.find_visible(&module, name)?),
            PackageRoute::Unowned => found.extend(self.misc_resources(name)?.iter().cloned()),
        }

        if let Some(path) = &self.path {
            for location in &path.find_resources(name) {
                found.push(location?);
            }
        }
        Ok(found)
    }

    /// Read the bytes of the resource `name` as seen from this domain.
    ///
    /// # Errors
    /// - [`Error::NotFound`] when the resource is not visible
    /// - [`Error::FileError`] when reading fails
    /// - [`Error::IndexIntegrity`] when a search path index is corrupt
    pub fn read_resource(&self, name: &str) -> Result<Vec<u8>> {
        match self.route(&resource_package(name)) {
            PackageRoute::Remote(target) => {
                return match target.upgrade() {
                    Some(target) => target.read_resource(name),
                    None => Err(Error::NotFound(name.to_string())),
                };
            }
            PackageRoute::Local(module) => {
                if self.find_visible(&module, name)?.is_some() {
                    if let Some(bytes) = self.reader(&module)?.read(name)? {
                        return Ok(bytes);
                    }
                }
            }
            PackageRoute::Unowned => {
                for location in self.misc_resources(name)?.iter() {
                    if let Some(bytes) = self.read_location(location)? {
                        return Ok(bytes);
                    }
                }
            }
        }

        if let Some(path) = &self.path {
            if let Some(handle) = path.get_resource(name)? {
                return handle.bytes();
            }
        }
        Err(Error::NotFound(name.to_string()))
    }

    /// Locate the resource `name` along the parent chain, then in this domain.
    ///
    /// The parent (or, for a loader without a parent, the bootstrap loader) is asked first, so a
    /// resource visible to an ancestor shadows one of the same name in this domain.
    ///
    /// # Errors
    /// Same as [`Self::find_resource`].
    pub fn get_resource(&self, name: &str) -> Result<Option<Location>> {
        if let Some(delegate) = self.delegate() {
            if let Some(location) = delegate.get_resource(name)? {
                return Ok(Some(location));
            }
        }
        self.find_resource(name)
    }

    /// Every location of the resource `name`: the parent chain's locations first, then this
    /// domain's.
    ///
    /// # Errors
    /// Same as [`Self::find_resource`].
    pub fn get_resources(&self, name: &str) -> Result<Vec<Location>> {
        let mut found = match self.delegate() {
            Some(delegate) => delegate.get_resources(name)?,
            None => Vec::new(),
        };
        found.extend(self.find_resources(name)?);
        Ok(found)
    }

    /// Locate the resource `name` in the local module `module`, without the visibility filter.
    ///
    /// # Errors
    /// Returns [`Error::FileError`] when the module reader fails.
    pub fn find_resource_in_module(&self, module: &str, name: &str) -> Result<Option<Location>> {
        match self.module(module) {
            Some(module) => self.reader(&module)?.find(name),
            None => Ok(None),
        }
    }

    /// Drop the cache of miscellaneous resource locations.
    ///
    /// Lookups running concurrently keep the cache they started with; the next lookup starts a
    /// fresh one.
    pub fn clear_resource_cache(&self) {
        write_lock!(self.misc).take();
    }

    /// Number of cached miscellaneous resource names.
    #[must_use]
    pub fn cached_resource_count(&self) -> usize {
        read_lock!(self.misc).as_ref().map_or(0, |misc| misc.len())
    }

    /// The location of `name` in `module` if other modules may see it.
    fn find_visible(&self, module: &ModuleReference, name: &str) -> Result<Option<Location>> {
        let Some(location) = self.reader(module)?.find(name)? else {
            return Ok(None);
        };

        let package = resource_package(name);
        let visible = module.descriptor().opens_unconditionally(&package)
            || name.ends_with(self.config.class_suffix.as_str())
            || location.is_directory();

        if !visible {
            trace!(domain = %self.domain, module = module.name(), resource = name, "resource is encapsulated");
        }
        Ok(visible.then_some(location))
    }

    /// Every local module location of `name`, in registration order.
    ///
    /// The answer is cached only after every module was searched, so a cached answer is never
    /// partial.
    fn misc_resources(&self, name: &str) -> Result<Arc<[Location]>> {
        let cache = self.config.cache_misc_resources.then(|| self.misc_cache());
        if let Some(hit) = cache.as_ref().and_then(|cache| cache.get(name)) {
            return Ok(Arc::clone(hit.value()));
        }

        let mut found = Vec::new();
        for (_, module) in self.modules.iter() {
            if let Some(location) = self.reader(module)?.find(name)? {
                found.push(location);
            }
        }
        let found: Arc<[Location]> = found.into();

        match cache {
            Some(cache) => Ok(Arc::clone(cache.entry(name.to_string()).or_insert(found).value())),
            None => Ok(found),
        }
    }

    fn misc_cache(&self) -> Arc<MiscResources> {
        if let Some(cache) = read_lock!(self.misc).as_ref() {
            return Arc::clone(cache);
        }
        Arc::clone(write_lock!(self.misc).get_or_insert_with(Default::default))
    }

    fn read_location(&self, location: &Location) -> Result<Option<Vec<u8>>> {
        let Location::Module { module, entry } = location else {
            return Ok(None);
        };
        match self.module(module) {
            Some(module) => self.reader(&module)?.read(entry),
            None => Ok(None),
        }
    }
}
