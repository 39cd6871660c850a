//! Platform libraries opened through `libloading`.
//!
//! [`LibraryPaths`] turns a bare library name into a platform file name and searches the
//! configured directories for it; [`DynamicOpener`] opens the result with
//! [`libloading::Library`].

use std::{
    ffi::c_void,
    path::{Path, PathBuf},
};

use libloading::{Library, Symbol};

use crate::{
    native::library::{NativeHandle, NativeOpener},
    Error, Result,
};

/// Directories searched for native libraries.
#[derive(Debug, Clone, Default)]
pub struct LibraryPaths {
    dirs: Vec<PathBuf>,
}

impl LibraryPaths {
    /// Search `dirs` in order.
    #[must_use]
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        LibraryPaths { dirs }
    }

    /// The platform file name of the library `name`: `libz.so`, `z.dll` or `libz.dylib`.
    #[must_use]
    pub fn map_library_name(name: &str) -> String {
        libloading::library_filename(name)
            .to_string_lossy()
            .into_owned()
    }

    /// Files that may hold the library `name`, in search order.
    ///
    /// A name that already is a path (absolute, or containing a separator) is its own only
    /// candidate.
    #[must_use]
    pub fn candidates(&self, name: &str) -> Vec<PathBuf> {
        let path = Path::new(name);
        if path.is_absolute() || path.components().count() > 1 {
            return vec![path.to_path_buf()];
        }

        let file_name = Self::map_library_name(name);
        self.dirs.iter().map(|dir| dir.join(&file_name)).collect()
    }

    /// The first existing candidate for `name`, canonicalized.
    #[must_use]
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        self.candidates(name)
            .into_iter()
            .find(|candidate| candidate.is_file())
            .map(|found| found.canonicalize().unwrap_or(found))
    }
}

/// Opens libraries with the platform dynamic loader.
#[derive(Debug, Clone, Default)]
pub struct DynamicOpener {
    paths: LibraryPaths,
}

impl DynamicOpener {
    /// An opener that searches `paths` for bare names.
    #[must_use]
    pub fn new(paths: LibraryPaths) -> Self {
        DynamicOpener { paths }
    }
}

impl NativeOpener for DynamicOpener {
    fn resolve(&self, name: &str) -> String {
        match self.paths.locate(name) {
            Some(path) => path.to_string_lossy().into_owned(),
            None => name.to_string(),
        }
    }

    fn open(&self, resolved: &str) -> Result<Box<dyn NativeHandle>> {
        let library = unsafe {
            Library::new(resolved).map_err(|error| Error::LibraryOpen {
                library: resolved.to_string(),
                message: error.to_string(),
            })?
        };
        Ok(Box::new(DynamicHandle {
            name: resolved.to_string(),
            library,
        }))
    }
}

struct DynamicHandle {
    name: String,
    library: Library,
}

impl NativeHandle for DynamicHandle {
    fn find(&self, symbol: &str) -> Option<usize> {
        let address: Symbol<*const c_void> = unsafe { self.library.get(symbol.as_bytes()) }.ok()?;
        Some(*address as usize)
    }

    fn close(self: Box<Self>) -> Result<()> {
        let DynamicHandle { name, library } = *self;
        library.close().map_err(|error| Error::LibraryOpen {
            library: name,
            message: error.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_map_library_name() {
        let mapped = LibraryPaths::map_library_name("z");
        assert!(mapped.contains('z'));
        if cfg!(target_os = "linux") {
            assert_eq!(mapped, "libz.so");
        }
        if cfg!(windows) {
            assert_eq!(mapped, "z.dll");
        }
    }

    #[test]
    fn test_candidates_and_locate() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let file_name = LibraryPaths::map_library_name("probe");
        fs::write(second.path().join(&file_name), b"").unwrap();

        let paths = LibraryPaths::new(vec![first.path().to_path_buf(), second.path().to_path_buf()]);
        assert_eq!(paths.candidates("probe").len(), 2);
        assert_eq!(
            paths.candidates("/opt/lib/libx.so"),
            vec![PathBuf::from("/opt/lib/libx.so")]
        );

        let located = paths.locate("probe").unwrap();
        assert!(located.ends_with(&file_name));
        assert!(paths.locate("absent").is_none());
    }

    #[test]
    fn test_open_missing_library_fails() {
        let opener = DynamicOpener::default();
        let resolved = opener.resolve("definitely_not_a_real_library_name");
        assert_eq!(resolved, "definitely_not_a_real_library_name");
        assert!(matches!(
            opener.open("/nonexistent/libdefinitely_missing.so"),
            Err(Error::LibraryOpen { .. })
        ));
    }
}
