use thiserror::Error;

use crate::domain::DomainId;

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors fall into two families. Setup-time errors ([`Error::ConfigurationConflict`]) indicate
/// a broken loader topology and are raised immediately by the registration calls. Steady-state
/// lookups prefer [`Error::NotFound`], except where reporting absence would mask a correctness
/// bug ([`Error::RecursiveInvocation`], [`Error::IndexIntegrity`]); those always propagate.
///
/// # Error Categories
///
/// ## Lookup Errors
/// - [`Error::NotFound`] - Class or resource is absent (recoverable, expected)
/// - [`Error::IndexIntegrity`] - A cross-archive index pointed at an archive that cannot hold the name
///
/// ## Topology Errors
/// - [`Error::ConfigurationConflict`] - Duplicate package ownership or conflicting remote routes
///
/// ## Cache Errors
/// - [`Error::RecursiveInvocation`] - A compute function re-entered its own key
/// - [`Error::EmptyValue`] - A compute function produced no value
///
/// ## Native Library Errors
/// - [`Error::CrossDomainConflict`] - The library name is held by another domain
/// - [`Error::NotOwner`] - Unloading a library this manager does not own
/// - [`Error::UnloadNotPermitted`] - Explicit unload on an auto-unloading manager
/// - [`Error::LibraryOpen`] - The platform loader refused the library
///
/// ## I/O and Miscellaneous
/// - [`Error::FileError`] - Filesystem or reader I/O errors
/// - [`Error::Closed`] - The resolver or reader was already closed
///
/// # Examples
///
/// ```rust,no_run
/// use modloader::{Error, loader::ModuleLoader};
///
/// # fn example(loader: &ModuleLoader) {
/// match loader.load_class("com.example.Main") {
///     Ok(class) => println!("Defined in {}", class.domain()),
///     Err(Error::NotFound(name)) => eprintln!("{} is not visible", name),
///     Err(e) => eprintln!("Lookup failed: {}", e),
/// }
/// # }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The requested class or resource is not visible from the initiating domain.
    #[error("Not found - {0}")]
    NotFound(String),

    /// The loader topology is inconsistent.
    ///
    /// Raised by module registration and remote-route construction. A conflicting topology
    /// is never repaired by picking a winner.
    #[error("Configuration conflict - {0}")]
    ConfigurationConflict(Conflict),

    /// A compute function accessed the very key it is computing.
    #[error("Recursive invocation of a value computation")]
    RecursiveInvocation,

    /// A compute function finished without producing a value.
    #[error("Value computation produced no value")]
    EmptyValue,

    /// A cross-archive index listed an archive that has no entry in the requested directory.
    ///
    /// # Fields
    ///
    /// * `archive` - The candidate archive that failed the check
    /// * `name` - The resource name being resolved
    #[error("Invalid archive index - {archive} cannot contain {name}")]
    IndexIntegrity {
        /// The candidate archive location
        archive: String,
        /// The name being resolved
        name: String,
    },

    /// The native library is loaded, or being loaded, by a different domain.
    #[error("Native library {library} is already held by domain {owner}")]
    CrossDomainConflict {
        /// The library name
        library: String,
        /// The domain currently holding it
        owner: DomainId,
    },

    /// The native library was not loaded by this manager.
    #[error("Native library {0} is not loaded by this manager")]
    NotOwner(String),

    /// Explicit unloading was requested on a manager whose libraries unload with their domain.
    #[error("Explicit unloading cannot be used with automatic unloading - {0}")]
    UnloadNotPermitted(String),

    /// The platform loader failed to open a native library.
    #[error("Failed to open native library {library}: {message}")]
    LibraryOpen {
        /// The library name
        library: String,
        /// The platform error message
        message: String,
    },

    /// A class of the same name was already materialized in this domain.
    #[error("Duplicate definition of {name} in domain {domain}")]
    DuplicateDefinition {
        /// The class name
        name: String,
        /// The domain in which the definition was attempted
        domain: DomainId,
    },

    /// File I/O error.
    ///
    /// Wraps standard I/O errors raised by module readers, directory roots and archives.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// The resolver, reader or archive has been closed.
    #[error("Already closed")]
    Closed,

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}

impl Error {
    /// Returns `true` for [`Error::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Returns `true` for [`Error::ConfigurationConflict`].
    #[must_use]
    pub fn is_configuration_conflict(&self) -> bool {
        matches!(self, Error::ConfigurationConflict(_))
    }
}

/// The specific inconsistency behind an [`Error::ConfigurationConflict`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// A package is already owned by another module in the same domain.
    #[error("package {package} in module {incoming} is already owned by module {existing}")]
    DuplicatePackage {
        /// The contested package
        package: String,
        /// The module that already owns it
        existing: String,
        /// The module that tried to claim it
        incoming: String,
    },
    /// A module of the same name is already registered in the domain.
    #[error("module {0} is already registered")]
    DuplicateModule(String),
    /// A package is already routed to a different domain, or the route would loop back.
    #[error("package {package} is routed to {existing} and cannot also be routed to {incoming}")]
    ConflictingRoute {
        /// The contested package
        package: String,
        /// The domain it is already routed to
        existing: String,
        /// The domain the new route points at
        incoming: String,
    },
    /// A package cannot be routed away because a local module owns it.
    #[error("package {package} is owned by local module {module} and cannot be routed")]
    LocallyOwned {
        /// The contested package
        package: String,
        /// The local owner
        module: String,
    },
    /// A module cannot claim a package that is already routed to another domain.
    #[error("package {package} in module {module} is already routed to {target}")]
    AlreadyRouted {
        /// The contested package
        package: String,
        /// The module that tried to claim it
        module: String,
        /// The domain the package is routed to
        target: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_display() {
        let err = Error::ConfigurationConflict(Conflict::DuplicatePackage {
            package: "a.b".to_string(),
            existing: "m1".to_string(),
            incoming: "m2".to_string(),
        });

        assert!(err.is_configuration_conflict());
        assert!(!err.is_not_found());
        assert_eq!(
            err.to_string(),
            "Configuration conflict - package a.b in module m2 is already owned by module m1"
        );
    }

    #[test]
    fn test_conflict_is_an_error() {
        let conflict = Conflict::ConflictingRoute {
            package: "p".to_string(),
            existing: "b".to_string(),
            incoming: "a".to_string(),
        };
        let source: &dyn std::error::Error = &conflict;

        assert!(source.source().is_none());
        assert_eq!(source.to_string(), "package p is routed to b and cannot also be routed to a");
        assert_eq!(Conflict::DuplicateModule("m".to_string()).to_string(), "module m is already registered");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::FileError(_)));
    }
}
