//! Module content access.
//!
//! A [`ModuleSource`] knows how to open a module's content; opening yields a
//! [`ModuleReader`] that locates and reads named entries. Readers are opened lazily by the
//! owning loader and shared between threads, so every reader is `Send + Sync`.
//!
//! # Key Components
//!
//! - [`ModuleReader`] / [`ModuleSource`] - The consumed interfaces
//! - [`MemoryModule`] - Module content held in memory, with open and read counters
//! - [`DirectoryModule`] - Module content laid out below a filesystem directory
//! - [`EmptyReader`] - Stand-in for a module whose content could not be opened

use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use crate::{
    file::{resolve_contained, Physical},
    location::Location,
    Error, Result,
};

/// Locates and reads the entries of one opened module.
pub trait ModuleReader: Send + Sync {
    /// Locate the entry `name`.
    ///
    /// Names ending in `/` denote directories; a directory is found when at least one entry
    /// lies below it.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] on I/O failure and [`crate::Error::Closed`] once the
    /// reader was closed.
    fn find(&self, name: &str) -> Result<Option<Location>>;

    /// Read the bytes of the entry `name`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] on I/O failure and [`crate::Error::Closed`] once the
    /// reader was closed.
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Hand back a buffer returned by [`ModuleReader::read`] once the caller is done with it.
    fn release(&self, bytes: Vec<u8>) {
        drop(bytes);
    }

    /// Release the reader's resources. Later calls fail with [`crate::Error::Closed`].
    ///
    /// # Errors
    /// Returns the error raised while releasing resources.
    fn close(&self) -> Result<()>;
}

/// Opens module content on demand.
pub trait ModuleSource: Send + Sync {
    /// Open a reader over the module content.
    ///
    /// # Errors
    /// Returns the error raised while opening; the loader logs it and substitutes an
    /// [`EmptyReader`].
    fn open(&self) -> Result<Arc<dyn ModuleReader>>;
}

/// A reader that contains nothing.
#[derive(Debug, Default)]
pub struct EmptyReader;

impl ModuleReader for EmptyReader {
    fn find(&self, _name: &str) -> Result<Option<Location>> {
        Ok(None)
    }

    fn read(&self, _name: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Module content held in memory.
///
/// Clones share their entries and their counters, so a test can keep one handle and observe
/// how often the loader opened or read the module.
///
/// # Examples
///
/// ```rust
/// use modloader::module::{MemoryModule, ModuleSource};
///
/// let module = MemoryModule::new("app")
///     .with_entry("com/example/Main.class", vec![0xCA, 0xFE])
///     .with_entry("com/example/app.properties", b"debug=false".to_vec());
///
/// let reader = module.open()?;
/// assert!(reader.find("com/example/")?.is_some());
/// assert_eq!(reader.read("com/example/Main.class")?, Some(vec![0xCA, 0xFE]));
/// assert_eq!(module.open_count(), 1);
/// # Ok::<(), modloader::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct MemoryModule {
    name: String,
    entries: BTreeMap<String, Arc<[u8]>>,
    fail_open: bool,
    fail_reads: bool,
    opens: Arc<AtomicUsize>,
    finds: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
}

impl MemoryModule {
    /// Create an empty in-memory module named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        MemoryModule {
            name: name.into(),
            entries: BTreeMap::new(),
            fail_open: false,
            fail_reads: false,
            opens: Arc::new(AtomicUsize::new(0)),
            finds: Arc::new(AtomicUsize::new(0)),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Add an entry.
    #[must_use]
    pub fn with_entry(mut self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.entries.insert(name.into(), Arc::from(bytes));
        self
    }

    /// Make every [`ModuleSource::open`] fail.
    #[must_use]
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Make every [`ModuleReader::read`] fail with an I/O error.
    #[must_use]
    pub fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    /// The module name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// How many times the module was opened.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// How many entry lookups were made across all readers.
    #[must_use]
    pub fn find_count(&self) -> usize {
        self.finds.load(Ordering::SeqCst)
    }

    /// How many entry reads were attempted across all readers.
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl ModuleSource for MemoryModule {
    fn open(&self) -> Result<Arc<dyn ModuleReader>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(Error::FileError(io::Error::new(
                io::ErrorKind::NotFound,
                format!("module {} is unavailable", self.name),
            )));
        }

        Ok(Arc::new(MemoryReader {
            module: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryReader {
    module: MemoryModule,
    closed: AtomicBool,
}

impl MemoryReader {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

impl ModuleReader for MemoryReader {
    fn find(&self, name: &str) -> Result<Option<Location>> {
        self.ensure_open()?;
        self.module.finds.fetch_add(1, Ordering::SeqCst);

        let present = if name.ends_with('/') {
            self.module
                .entries
                .range(name.to_string()..)
                .next()
                .is_some_and(|(entry, _)| entry.starts_with(name))
        } else {
            self.module.entries.contains_key(name)
        };

        Ok(present.then(|| Location::Module {
            module: self.module.name.clone(),
            entry: name.to_string(),
        }))
    }

    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        self.module.reads.fetch_add(1, Ordering::SeqCst);

        if self.module.fail_reads {
            return Err(Error::FileError(io::Error::other(format!(
                "failed to read {} from module {}",
                name, self.module.name
            ))));
        }

        Ok(self.module.entries.get(name).map(|bytes| bytes.to_vec()))
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Module content laid out below a directory, one file per entry.
#[derive(Debug, Clone)]
pub struct DirectoryModule {
    name: String,
    root: PathBuf,
}

impl DirectoryModule {
    /// A module named `name` whose entries live below `root`.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Self {
        DirectoryModule {
            name: name.into(),
            root: root.as_ref().to_path_buf(),
        }
    }

    /// The directory holding the module content.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ModuleSource for DirectoryModule {
    fn open(&self) -> Result<Arc<dyn ModuleReader>> {
        if !self.root.is_dir() {
            return Err(Error::FileError(io::Error::new(
                io::ErrorKind::NotFound,
                format!("module directory {} does not exist", self.root.display()),
            )));
        }

        Ok(Arc::new(DirectoryReader {
            name: self.name.clone(),
            root: self.root.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct DirectoryReader {
    name: String,
    root: PathBuf,
    closed: AtomicBool,
}

impl ModuleReader for DirectoryReader {
    fn find(&self, name: &str) -> Result<Option<Location>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let Some(path) = resolve_contained(&self.root, name) else {
            return Ok(None);
        };

        let present = if name.ends_with('/') {
            path.is_dir()
        } else {
            path.is_file()
        };
        Ok(present.then(|| Location::Module {
            module: self.name.clone(),
            entry: name.to_string(),
        }))
    }

    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let Some(path) = resolve_contained(&self.root, name) else {
            return Ok(None);
        };
        if name.ends_with('/') || !path.is_file() {
            return Ok(None);
        }

        Ok(Some(Physical::new(&path)?.into_data()))
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_memory_module_directory_lookup() {
        let module = MemoryModule::new("m").with_entry("p/q/R.txt", b"r".to_vec());
        let reader = module.open().unwrap();

        assert!(reader.find("p/").unwrap().is_some());
        assert!(reader.find("p/q/").unwrap().is_some());
        assert!(reader.find("p/x/").unwrap().is_none());
        assert!(reader.find("p/q/R.txt").unwrap().is_some());
        assert!(reader.find("p/q/S.txt").unwrap().is_none());
    }

    #[test]
    fn test_memory_module_failures() {
        let module = MemoryModule::new("m").failing_open();
        assert!(module.open().is_err());
        assert_eq!(module.open_count(), 1);

        let module = MemoryModule::new("m")
            .with_entry("a", vec![1])
            .failing_reads();
        let reader = module.open().unwrap();
        assert!(matches!(reader.read("a"), Err(Error::FileError(_))));
        assert_eq!(module.read_count(), 1);
    }

    #[test]
    fn test_closed_reader() {
        let module = MemoryModule::new("m").with_entry("a", vec![1]);
        let reader = module.open().unwrap();
        reader.close().unwrap();
        assert!(matches!(reader.read("a"), Err(Error::Closed)));
        assert!(matches!(reader.find("a"), Err(Error::Closed)));
    }

    #[test]
    fn test_directory_module() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("p")).unwrap();
        fs::write(dir.path().join("p/R.txt"), b"hello").unwrap();

        let module = DirectoryModule::new("d", dir.path());
        let reader = module.open().unwrap();

        assert_eq!(reader.read("p/R.txt").unwrap(), Some(b"hello".to_vec()));
        assert!(reader.find("p/").unwrap().is_some());
        assert_eq!(reader.read("p/missing").unwrap(), None);
        assert_eq!(reader.read("../outside").unwrap(), None);
        assert!(reader.find("../outside").unwrap().is_none());
    }

    #[test]
    fn test_missing_directory_fails_open() {
        let module = DirectoryModule::new("d", "/nonexistent/module/root");
        assert!(matches!(module.open(), Err(Error::FileError(_))));
    }
}
