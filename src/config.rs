//! Configuration for loaders, search paths, pools and native library managers.
//!
//! All configuration types are plain structs with public fields and a [`Default`]
//! implementation; the builder-style setters are conveniences for the common tweaks.

use std::path::PathBuf;

use strum::Display;

/// Configuration for a [`crate::loader::ModuleLoader`].
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Cache the locations of resources that belong to no known package (default: true).
    ///
    /// The cache never lies: it is only populated once every local module was searched, and it
    /// can be dropped at any time with [`crate::loader::ModuleLoader::clear_resource_cache`].
    pub cache_misc_resources: bool,

    /// Suffix of the resource holding a class's compiled form (default: `.class`).
    ///
    /// Resources with this suffix are visible to other modules even in packages that are not
    /// opened.
    pub class_suffix: String,

    /// Search path behavior for the loader's own search path.
    pub search_path: SearchPathConfig,

    /// Native library handling for the loader's domain.
    pub native: NativeConfig,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            cache_misc_resources: true,
            class_suffix: ".class".to_string(),
            search_path: SearchPathConfig::default(),
            native: NativeConfig::default(),
        }
    }
}

impl LoaderConfig {
    /// Creates a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable the miscellaneous resource cache.
    #[must_use]
    pub fn with_misc_resource_cache(mut self, enabled: bool) -> Self {
        self.cache_misc_resources = enabled;
        self
    }

    /// Replace the search path configuration.
    #[must_use]
    pub fn with_search_path(mut self, search_path: SearchPathConfig) -> Self {
        self.search_path = search_path;
        self
    }

    /// Replace the native library configuration.
    #[must_use]
    pub fn with_native(mut self, native: NativeConfig) -> Self {
        self.native = native;
        self
    }
}

/// Configuration for a [`crate::classpath::SearchPathResolver`].
#[derive(Debug, Clone)]
pub struct SearchPathConfig {
    /// Consult archive indexes for names absent from an indexed archive (default: true).
    pub use_index: bool,

    /// Append the class-path extension declared by an archive (default: true).
    pub follow_class_path: bool,

    /// Log class-path extension entries that are skipped (default: false).
    pub log_ignored: bool,
}

impl Default for SearchPathConfig {
    fn default() -> Self {
        Self {
            use_index: true,
            follow_class_path: true,
            log_ignored: false,
        }
    }
}

impl SearchPathConfig {
    /// Creates a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A configuration that only searches the declared path entries.
    #[must_use]
    pub fn flat() -> Self {
        Self {
            use_index: false,
            follow_class_path: false,
            log_ignored: false,
        }
    }

    /// Enable or disable index lookups.
    #[must_use]
    pub fn with_index(mut self, enabled: bool) -> Self {
        self.use_index = enabled;
        self
    }

    /// Enable or disable following declared class-path extensions.
    #[must_use]
    pub fn with_class_path(mut self, enabled: bool) -> Self {
        self.follow_class_path = enabled;
        self
    }
}

/// When native libraries of a domain are unloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum UnloadMode {
    /// Libraries unload only through an explicit unload call
    #[strum(serialize = "manual")]
    Manual,
    /// Libraries unload when their (reclaimable) domain is dropped; explicit unload is refused
    #[strum(serialize = "auto")]
    Auto,
}

/// Configuration for a [`crate::native::NativeLibraryManager`].
#[derive(Debug, Clone)]
pub struct NativeConfig {
    /// Unload policy (default: [`UnloadMode::Auto`]).
    pub mode: UnloadMode,

    /// Directories searched for bare library names, in order.
    pub search_dirs: Vec<PathBuf>,
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            mode: UnloadMode::Auto,
            search_dirs: Vec::new(),
        }
    }
}

impl NativeConfig {
    /// Creates a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A configuration whose libraries only unload explicitly.
    #[must_use]
    pub fn manual() -> Self {
        Self {
            mode: UnloadMode::Manual,
            ..Self::default()
        }
    }

    /// Append a library search directory.
    #[must_use]
    pub fn with_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dirs.push(dir.into());
        self
    }
}

/// Configuration for a [`crate::loader::LoaderPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Configuration applied to every pooled loader.
    pub loader: LoaderConfig,

    /// Wire remote routes on the rayon thread pool (default: true).
    pub parallel_wiring: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            loader: LoaderConfig::default(),
            parallel_wiring: true,
        }
    }
}

impl PoolConfig {
    /// Creates a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the per-loader configuration.
    #[must_use]
    pub fn with_loader(mut self, loader: LoaderConfig) -> Self {
        self.loader = loader;
        self
    }

    /// Wire routes sequentially on the calling thread.
    #[must_use]
    pub fn sequential(mut self) -> Self {
        self.parallel_wiring = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoaderConfig::default();
        assert!(config.cache_misc_resources);
        assert_eq!(config.class_suffix, ".class");
        assert!(config.search_path.use_index);
        assert_eq!(config.native.mode, UnloadMode::Auto);
        assert!(PoolConfig::default().parallel_wiring);
    }

    #[test]
    fn test_builders() {
        let config = LoaderConfig::new()
            .with_misc_resource_cache(false)
            .with_search_path(SearchPathConfig::flat())
            .with_native(NativeConfig::manual().with_search_dir("/opt/lib"));

        assert!(!config.cache_misc_resources);
        assert!(!config.search_path.follow_class_path);
        assert_eq!(config.native.mode, UnloadMode::Manual);
        assert_eq!(config.native.search_dirs, vec![PathBuf::from("/opt/lib")]);
        assert_eq!(UnloadMode::Auto.to_string(), "auto");
        assert!(!PoolConfig::new().sequential().parallel_wiring);
    }
}
