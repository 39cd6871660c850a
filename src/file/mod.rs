//! Filesystem access shared by directory-backed modules and search-path roots.
//!
//! # Key Components
//!
//! - [`crate::file::Physical`] - Read-only memory map of a single file
//! - [`crate::file::resolve_contained`] - Join a resource name onto a root, refusing escapes

pub mod physical;

pub use physical::Physical;

use std::path::{Path, PathBuf};

use crate::location::is_contained;

/// Join the resource `name` onto `root` if it stays below `root`.
///
/// Returns `None` for absolute names, names containing `\`, and names whose `..` components
/// climb above the root.
#[must_use]
pub fn resolve_contained(root: &Path, name: &str) -> Option<PathBuf> {
    if !is_contained(name) {
        return None;
    }
    Some(root.join(name.trim_end_matches('/')))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_contained() {
        let root = Path::new("/srv/classes");
        assert_eq!(
            resolve_contained(root, "a/b.txt"),
            Some(PathBuf::from("/srv/classes/a/b.txt"))
        );
        assert_eq!(
            resolve_contained(root, "a/"),
            Some(PathBuf::from("/srv/classes/a"))
        );
        assert_eq!(resolve_contained(root, "../etc/passwd"), None);
        assert_eq!(resolve_contained(root, "/etc/passwd"), None);
    }
}
