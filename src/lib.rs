// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
//#![deny(unsafe_code)]
// - 'file/physical.rs' uses mmap to map a file into memory
// - 'native/dynamic.rs' opens platform libraries and resolves their symbols

//! # modloader
//!
//! A loading and resolution engine for module-based runtimes. `modloader` finds, opens and
//! materializes classes and resources that live in modules or on a search path, and
//! arbitrates exclusive access to native libraries across isolated loading domains.
//!
//! ## Features
//!
//! - **Package-based delegation** - Lookups routed by package ownership, remote routes, a
//!   parent chain and a search path fallback
//! - **Lazy search paths** - Directories and archives opened only when a lookup needs them,
//!   with class-path extensions and cross-archive indexes
//! - **One-shot computation** - A per-domain memoizing cache that runs each computation at most
//!   once and detects recursion instead of deadlocking
//! - **Native library arbitration** - One owner domain per library, reentrant per-name locks
//!   and a per-thread loading stack for nested loads
//!
//! ## Quick Start
//!
//! ```rust
//! use modloader::prelude::*;
//!
//! let boot = ModuleLoader::builder(Domain::new("boot", DomainKind::Boot)).build();
//! boot.register_module(ModuleReference::new(
//!     ModuleDescriptor::builder("base").exports("a.b").opens("a.b").build()?,
//!     MemoryModule::new("base")
//!         .with_entry("a/b/C.class", vec![0xCA, 0xFE])
//!         .with_entry("a/b/R.txt", b"hello".to_vec()),
//! ))?;
//!
//! let app = ModuleLoader::builder(Domain::new("app", DomainKind::Application))
//!     .parent(boot.clone())
//!     .build();
//!
//! let class = app.load_class("a.b.C")?;
//! assert_eq!(class.domain(), boot.domain().id());
//! assert_eq!(app.get_resource("a/b/R.txt")?.map(|l| l.to_string()), Some("module:/base/a/b/R.txt".to_string()));
//! # Ok::<(), modloader::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`loader`] - [`loader::ModuleLoader`], the per-domain delegation engine, and
//!   [`loader::LoaderPool`]
//! - [`classpath`] - [`classpath::SearchPathResolver`] and the archive/index machinery
//! - [`cache`] - [`cache::KeyedValueCache`], the memoizing per-domain cache
//! - [`native`] - [`native::NativeLibraryManager`] and the process-wide registry
//! - [`module`] - Module descriptors, references and readers
//! - [`config`] - Configuration for every component
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Logging
//!
//! Every component emits structured [`tracing`] events: `debug` for loads, definitions and
//! archive opens, `trace` for per-lookup routing and `warn` for failures that are deliberately
//! swallowed. The crate never installs a subscriber.
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T, Error>`](Result). Lookups report absence as
//! [`Error::NotFound`]; broken topologies surface as [`Error::ConfigurationConflict`] when they
//! are configured, never later.
//!
//! ```rust
//! use modloader::{prelude::*, Error};
//!
//! let loader = ModuleLoader::builder(Domain::new("empty", DomainKind::Custom)).build();
//! match loader.load_class("com.example.Missing") {
//!     Err(Error::NotFound(name)) => assert_eq!(name, "com.example.Missing"),
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```
#[macro_use]
pub(crate) mod macros;

pub(crate) mod error;
pub(crate) mod file;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use modloader::prelude::*;
///
/// let cache: KeyedValueCache<u32> = KeyedValueCache::new();
/// let loader = ModuleLoader::builder(Domain::new("app", DomainKind::Application)).build();
/// assert!(cache.is_empty());
/// assert!(loader.modules().is_empty());
/// ```
pub mod prelude;

/// Memoized per-domain, per-key value computation.
pub mod cache;

/// Ordered search paths over directories and archives.
pub mod classpath;

/// Configuration types.
pub mod config;

/// Loading domains and their identities.
pub mod domain;

/// Class and resource loaders.
pub mod loader;

/// Resource locations and name helpers.
pub mod location;

/// Module descriptors, references and readers.
pub mod module;

/// Native library management.
pub mod native;

/// Shared utilities.
pub mod utils;

/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
/// This is used consistently throughout the crate for all fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `modloader` Error type
///
/// The main error type for all operations in this crate.
pub use error::{Conflict, Error};
