//! One loader per module, wired from a read graph.
//!
//! A [`LoaderPool`] gives every module of a [`Configuration`] its own pooled domain and
//! [`ModuleLoader`], then routes each package a module may use to the loader of the module
//! that exports it. The read graph itself is computed elsewhere and handed in.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use rayon::prelude::*;
use tracing::debug;

use crate::{
    config::PoolConfig,
    domain::{Domain, DomainKind},
    loader::ModuleLoader,
    module::ModuleReference,
    Error, Result,
};

/// A resolved set of modules and the read edges between them.
///
/// A read edge may name a module outside the configuration; such modules are resolved through
/// loaders registered with [`Configuration::with_external`].
#[derive(Default)]
pub struct Configuration {
    modules: Vec<ModuleReference>,
    reads: HashMap<String, BTreeSet<String>>,
    external: HashMap<String, Arc<ModuleLoader>>,
}

impl Configuration {
    /// An empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module to the configuration.
    #[must_use]
    pub fn with_module(mut self, module: ModuleReference) -> Self {
        self.modules.push(module);
        self
    }

    /// Record that `reader` reads `target`.
    #[must_use]
    pub fn with_read(mut self, reader: impl Into<String>, target: impl Into<String>) -> Self {
        self.reads.entry(reader.into()).or_default().insert(target.into());
        self
    }

    /// Resolve reads of the module `name` through `loader`, which must have it registered.
    #[must_use]
    pub fn with_external(mut self, name: impl Into<String>, loader: Arc<ModuleLoader>) -> Self {
        self.external.insert(name.into(), loader);
        self
    }

    /// The modules of the configuration, in insertion order.
    #[must_use]
    pub fn modules(&self) -> &[ModuleReference] {
        &self.modules
    }

    /// The modules read by `name`.
    pub fn reads(&self, name: &str) -> impl Iterator<Item = &str> {
        self.reads
            .get(name)
            .into_iter()
            .flat_map(|targets| targets.iter().map(String::as_str))
    }
}

/// The loaders created for one [`Configuration`].
///
/// Routes between pooled loaders are weak, so the pool owns its loaders: dropping the pool
/// reclaims every pooled domain.
pub struct LoaderPool {
    loaders: Vec<Arc<ModuleLoader>>,
    by_module: HashMap<String, usize>,
}

impl LoaderPool {
    /// Create one loader per module of `configuration` and wire the remote routes.
    ///
    /// For every read edge `m -> r`, each package of `r` exported to `m` (every package when `r`
    /// is automatic) is routed from `m`'s loader to `r`'s.
    ///
    /// # Errors
    /// - [`Error::ConfigurationConflict`] when two modules claim the same route, or a route
    ///   collides with a package the reading module owns
    /// - [`Error::NotFound`] when a read edge names a module that is neither pooled nor external
    pub fn new(configuration: &Configuration, parent: Option<Arc<ModuleLoader>>, config: PoolConfig) -> Result<Self> {
        let mut loaders = Vec::with_capacity(configuration.modules.len());
        let mut by_module = HashMap::new();

        for module in &configuration.modules {
            let mut builder = ModuleLoader::builder(Domain::new(module.name(), DomainKind::Pooled))
                .config(config.loader.clone());
            if let Some(parent) = &parent {
                builder = builder.parent(Arc::clone(parent));
            }

            let loader = builder.build();
            loader.register_module(module.clone())?;
            by_module.insert(module.name().to_string(), loaders.len());
            loaders.push(loader);
        }

        let pool = LoaderPool { loaders, by_module };

        if config.parallel_wiring {
            pool.loaders
                .par_iter()
                .try_for_each(|loader| pool.wire(loader, configuration))?;
        } else {
            pool.loaders
                .iter()
                .try_for_each(|loader| pool.wire(loader, configuration))?;
        }

        debug!(loaders = pool.loaders.len(), "created loader pool");
        Ok(pool)
    }

    /// The loader of the module `name`.
    #[must_use]
    pub fn loader_for(&self, name: &str) -> Option<&Arc<ModuleLoader>> {
        self.by_module.get(name).map(|&index| &self.loaders[index])
    }

    /// Every pooled loader, in configuration order.
    #[must_use]
    pub fn loaders(&self) -> &[Arc<ModuleLoader>] {
        &self.loaders
    }

    /// Number of pooled loaders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    /// Returns `true` if the pool holds no loaders.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }

    /// Route the packages `loader`'s module may use to the loaders of the modules it reads.
    fn wire(&self, loader: &Arc<ModuleLoader>, configuration: &Configuration) -> Result<()> {
        let Some(module) = loader.modules().into_iter().next() else {
            return Ok(());
        };
        let reader = module.name();

        for target_name in configuration.reads(reader) {
            if target_name == reader {
                continue;
            }

            let (target, exporter) = self.resolve(target_name, configuration)?;
            for package in exporter.descriptor().packages_visible_to(reader) {
                loader.add_remote_route(package, &target)?;
            }
            debug!(reader, target = target_name, "wired module read");
        }
        Ok(())
    }

    fn resolve(&self, name: &str, configuration: &Configuration) -> Result<(Arc<ModuleLoader>, ModuleReference)> {
        let loader = match self.loader_for(name) {
            Some(loader) => Arc::clone(loader),
            None => configuration
                .external
                .get(name)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("module {}", name)))?,
        };
        let module = loader
            .module(name)
            .ok_or_else(|| Error::NotFound(format!("module {} in domain {}", name, loader.domain())))?;

        Ok((loader, module))
    }
}
