//! Resource locations returned by lookups.
//!
//! A [`Location`] identifies where a resource was found: a file under a directory root, an
//! entry inside an archive, or an entry inside a module. Its [`std::fmt::Display`] form is a
//! URL-like string (`file:`, `jar:file:...!/`, `module:/`) suitable for logging and for access
//! checks that match on prefixes.

use std::{
    fmt,
    path::{Component, Path, PathBuf},
};

/// Where a resource lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    /// A file below a directory root
    File {
        /// The directory root
        root: PathBuf,
        /// The resource name relative to the root
        entry: String,
    },
    /// An entry inside an archive
    Archive {
        /// The normalized archive location
        archive: PathBuf,
        /// The entry name inside the archive
        entry: String,
    },
    /// An entry inside a module
    Module {
        /// The module name
        module: String,
        /// The entry name inside the module
        entry: String,
    },
}

impl Location {
    /// The resource name this location was found for.
    #[must_use]
    pub fn entry(&self) -> &str {
        match self {
            Location::File { entry, .. }
            | Location::Archive { entry, .. }
            | Location::Module { entry, .. } => entry,
        }
    }

    /// Whether the location denotes a directory listing rather than a single resource.
    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.entry().ends_with('/')
    }

    /// The filesystem path of a [`Location::File`].
    #[must_use]
    pub fn file_path(&self) -> Option<PathBuf> {
        match self {
            Location::File { root, entry } => Some(root.join(entry)),
            _ => None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::File { root, entry } => {
                write!(f, "file:{}/{}", root.display(), entry)
            }
            Location::Archive { archive, entry } => {
                write!(f, "jar:file:{}!/{}", archive.display(), entry)
            }
            Location::Module { module, entry } => write!(f, "module:/{}/{}", module, entry),
        }
    }
}

/// Lexically normalize a path: drop `.` components and fold `..` into its parent.
///
/// No filesystem access is performed, so the result is stable for locations that do not exist
/// yet, which is what the archive dedup map needs.
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Whether a resource name stays inside its root (no absolute paths or `..` escapes).
#[must_use]
pub fn is_contained(name: &str) -> bool {
    let mut depth: usize = 0;
    for part in name.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            _ => depth += 1,
        }
    }
    !name.starts_with('/') && !name.contains('\\')
}

/// Package of a resource name: `a/b/R.txt` -> `a.b`.
///
/// Names at the top level, and directory names ending in `/`, belong to the unnamed package
/// (returned as an empty string).
#[must_use]
pub fn resource_package(name: &str) -> String {
    let name = name.strip_prefix('/').unwrap_or(name);
    match name.rfind('/') {
        Some(index) if index + 1 < name.len() => name[..index].replace('/', "."),
        _ => String::new(),
    }
}

/// Whether `class_name` is a binary name a loader may look up.
///
/// Internal forms (`a/b/C`) and array descriptors (`[La.b.C;`) are rejected: they would be
/// filed under the wrong package. The empty name is accepted and simply never found.
#[must_use]
pub fn is_binary_name(class_name: &str) -> bool {
    !class_name.contains('/') && !class_name.starts_with('[')
}

/// Package of a class name: `a.b.C` -> `a.b`.
#[must_use]
pub fn class_package(class_name: &str) -> &str {
    class_name
        .rfind('.')
        .map_or("", |index| &class_name[..index])
}

/// Resource name holding the compiled form of a class: `a.b.C` -> `a/b/C.class`.
#[must_use]
pub fn class_resource_name(class_name: &str, suffix: &str) -> String {
    format!("{}{}", class_name.replace('.', "/"), suffix)
}
