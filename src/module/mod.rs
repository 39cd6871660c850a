//! Modules: named units of code and resources.
//!
//! A module is described by an immutable [`ModuleDescriptor`] and backed by a
//! [`ModuleSource`] that opens its content. The pair travels as a [`ModuleReference`], which is
//! what loaders register and pools are configured with.
//!
//! # Key Components
//!
//! - [`ModuleDescriptor`] - Name, packages, exports and opens
//! - [`ModuleReference`] - Descriptor plus content source
//! - [`ModuleReader`] - Reads entries of an opened module
//! - [`MemoryModule`], [`DirectoryModule`] - Ready-made sources
//!
//! # Examples
//!
//! ```rust
//! use modloader::module::{MemoryModule, ModuleDescriptor, ModuleReference};
//!
//! let descriptor = ModuleDescriptor::builder("app").exports("com.example").build()?;
//! let content = MemoryModule::new("app").with_entry("com/example/Main.class", vec![0xCA]);
//! let module = ModuleReference::new(descriptor, content);
//!
//! assert_eq!(module.name(), "app");
//! assert!(module.descriptor().contains("com.example"));
//! # Ok::<(), modloader::Error>(())
//! ```

mod descriptor;
mod reader;

pub use descriptor::{ModuleDescriptor, ModuleDescriptorBuilder, ModuleFlags, PackageAccess};
pub use reader::{DirectoryModule, EmptyReader, MemoryModule, ModuleReader, ModuleSource};

use std::{fmt, sync::Arc};

use crate::Result;

/// A module descriptor together with the source of its content.
///
/// Cheap to clone; clones share the descriptor and the source.
#[derive(Clone)]
pub struct ModuleReference {
    descriptor: Arc<ModuleDescriptor>,
    source: Arc<dyn ModuleSource>,
}

impl ModuleReference {
    /// Pair `descriptor` with the content `source`.
    pub fn new<S>(descriptor: ModuleDescriptor, source: S) -> Self
    where
        S: ModuleSource + 'static,
    {
        ModuleReference {
            descriptor: Arc::new(descriptor),
            source: Arc::new(source),
        }
    }

    /// Pair `descriptor` with an already shared `source`.
    pub fn with_shared_source(descriptor: ModuleDescriptor, source: Arc<dyn ModuleSource>) -> Self {
        ModuleReference {
            descriptor: Arc::new(descriptor),
            source,
        }
    }

    /// The module name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    /// The module descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    /// Open a reader over the module content.
    ///
    /// # Errors
    /// Returns the error raised by the module source.
    pub fn open(&self) -> Result<Arc<dyn ModuleReader>> {
        self.source.open()
    }
}

impl fmt::Debug for ModuleReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleReference")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}
