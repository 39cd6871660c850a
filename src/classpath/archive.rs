//! The archive interface consumed by the search path, and an in-memory implementation.
//!
//! Container formats are not parsed here. An [`ArchiveOpener`] turns a location into an
//! [`Archive`]; embedders plug in their own opener for real container files, while
//! [`MemoryArchiveStore`] serves archives assembled in memory.

use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use dashmap::DashMap;

use crate::{
    classpath::index::{ArchiveIndex, INDEX_NAME},
    Error, Result,
};

/// An opened archive.
pub trait Archive: Send + Sync {
    /// Whether the archive holds the entry `name`.
    ///
    /// Names ending in `/` denote directories, which exist when any entry lies below them.
    fn contains(&self, name: &str) -> bool;

    /// Read the entry `name`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] on I/O failure and [`crate::Error::Closed`] after
    /// [`Archive::close`].
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Every entry name, used to validate index claims.
    fn entry_names(&self) -> Vec<String>;

    /// The class-path extension declared by the archive, relative to its directory.
    ///
    /// Entries ending in `/` are directories, all others archives.
    fn class_path(&self) -> Vec<String> {
        Vec::new()
    }

    /// Release the archive.
    ///
    /// # Errors
    /// Returns the error raised while releasing resources.
    fn close(&self) -> Result<()> {
        Ok(())
    }

    /// The archive's cross-archive index, if it carries one.
    ///
    /// # Errors
    /// Returns the error raised while reading or parsing [`INDEX_NAME`].
    fn index(&self) -> Result<Option<ArchiveIndex>> {
        match self.read(INDEX_NAME)? {
            Some(data) => ArchiveIndex::parse(&data).map(Some),
            None => Ok(None),
        }
    }
}

/// Opens archives by location.
pub trait ArchiveOpener: Send + Sync {
    /// Open the archive at the normalized `location`.
    ///
    /// # Errors
    /// Returns the error raised while opening; the resolver skips the entry.
    fn open(&self, location: &Path) -> Result<Arc<dyn Archive>>;
}

/// An opener for embeddings without archive support: every open fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoArchives;

impl ArchiveOpener for NoArchives {
    fn open(&self, location: &Path) -> Result<Arc<dyn Archive>> {
        Err(Error::FileError(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("no archive support for {}", location.display()),
        )))
    }
}

/// An archive assembled in memory.
///
/// # Examples
///
/// ```rust
/// use modloader::classpath::{Archive, ArchiveIndex, MemoryArchive};
///
/// let mut index = ArchiveIndex::new();
/// index.add_mapping("com/example", "app.jar");
/// index.add_mapping("com/example/util", "util.jar");
///
/// let archive = MemoryArchive::new()
///     .with_entry("com/example/Main.class", vec![0xCA, 0xFE])
///     .with_index(&index)
///     .with_class_path(["lib/extra.jar"]);
///
/// assert!(archive.contains("com/example/"));
/// assert!(archive.index()?.is_some());
/// # Ok::<(), modloader::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryArchive {
    entries: BTreeMap<String, Arc<[u8]>>,
    class_path: Vec<String>,
    closed: Arc<AtomicBool>,
}

impl MemoryArchive {
    /// Create an empty archive.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry.
    #[must_use]
    pub fn with_entry(mut self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.entries.insert(name.into(), Arc::from(bytes));
        self
    }

    /// Store `index` as the archive's [`INDEX_NAME`] entry.
    #[must_use]
    pub fn with_index(self, index: &ArchiveIndex) -> Self {
        self.with_entry(INDEX_NAME, index.to_string().into_bytes())
    }

    /// Declare a class-path extension.
    #[must_use]
    pub fn with_class_path<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.class_path.extend(entries.into_iter().map(Into::into));
        self
    }

    /// Whether [`Archive::close`] was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Archive for MemoryArchive {
    fn contains(&self, name: &str) -> bool {
        if name.ends_with('/') {
            return self
                .entries
                .range(name.to_string()..)
                .next()
                .is_some_and(|(entry, _)| entry.starts_with(name));
        }
        self.entries.contains_key(name)
    }

    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(self.entries.get(name).map(|bytes| bytes.to_vec()))
    }

    fn entry_names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn class_path(&self) -> Vec<String> {
        self.class_path.clone()
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// An [`ArchiveOpener`] over in-memory archives keyed by location.
///
/// Counts opens per location, which makes lazy opening observable.
#[derive(Default)]
pub struct MemoryArchiveStore {
    archives: DashMap<PathBuf, MemoryArchive>,
    opens: DashMap<PathBuf, usize>,
    total: AtomicUsize,
}

impl MemoryArchiveStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `archive` available at `location`.
    pub fn insert(&self, location: impl Into<PathBuf>, archive: MemoryArchive) {
        self.archives.insert(location.into(), archive);
    }

    /// How often the archive at `location` was opened.
    #[must_use]
    pub fn open_count(&self, location: impl AsRef<Path>) -> usize {
        self.opens.get(location.as_ref()).map_or(0, |count| *count)
    }

    /// Total number of opens across all locations.
    #[must_use]
    pub fn total_opens(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

impl ArchiveOpener for MemoryArchiveStore {
    fn open(&self, location: &Path) -> Result<Arc<dyn Archive>> {
        let archive = self.archives.get(location).map(|entry| entry.clone());
        let Some(archive) = archive else {
            return Err(Error::FileError(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", location.display()),
            )));
        };

        *self.opens.entry(location.to_path_buf()).or_insert(0) += 1;
        self.total.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(archive))
    }
}
