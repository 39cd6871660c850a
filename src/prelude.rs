//! # modloader Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the modloader library. Import this module to get quick access to the loaders, their
//! configuration and the module building blocks.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all modloader operations
pub use crate::Error;

/// The result type used throughout modloader
pub use crate::Result;

// ================================================================================================
// Domains and Loaders
// ================================================================================================

/// Loading domains
pub use crate::domain::{Domain, DomainId, DomainKind};

/// Per-domain class and resource loading
pub use crate::loader::{Configuration, DefinedClass, LoaderPool, ModuleLoader};

/// Resource locations
pub use crate::location::Location;

// ================================================================================================
// Modules
// ================================================================================================

/// Module descriptions and content
pub use crate::module::{
    DirectoryModule, MemoryModule, ModuleDescriptor, ModuleReader, ModuleReference, ModuleSource,
};

// ================================================================================================
// Search Paths, Caching and Native Libraries
// ================================================================================================

/// Search path resolution
pub use crate::classpath::{PathSpec, SearchPathResolver};

/// Memoizing cache
pub use crate::cache::{CompoundKey, KeyedValueCache};

/// Native library management
pub use crate::native::{NativeLibrary, NativeLibraryManager};

/// Configuration
pub use crate::config::{LoaderConfig, NativeConfig, PoolConfig, SearchPathConfig, UnloadMode};
