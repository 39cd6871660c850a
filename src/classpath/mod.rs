//! Lazily expanding search paths with cross-archive indexes.
//!
//! A [`SearchPathResolver`] answers resource queries against an ordered list of directories
//! and archives. Entries are opened on first need: a lookup satisfied by entry `k` never opens
//! entry `k + 1`.
//!
//! # Architecture
//!
//! The resolver keeps three pieces of state behind one coarse lock:
//!
//! - the pending queue of entries not yet opened (front = next to open);
//! - the opened roots, in path order;
//! - a dedup map from normalized location to opened root.
//!
//! Opening an archive may extend the path: its declared class-path extension is pushed onto
//! the front of the pending queue, in declared order, so it is searched before the remaining
//! configured entries. An archive that carries an index instead registers the archives its
//! index mentions as placeholders in the dedup map; those archives are then reached only
//! through the index, never as ordinary path entries.
//!
//! Opened roots are read without holding the resolver lock.
//!
//! # Index Lookup
//!
//! When a name is absent from an indexed archive, the archive's index lists candidate
//! archives. Each candidate is opened through the dedup map (at most once per location), its
//! own index is merged into the searching archive's index with the candidate's relative
//! directory as prefix, and the candidate is searched. Visited candidates are tracked so that
//! mutually referencing indexes terminate; the candidate list is re-read after merges until it
//! stops growing. A first-visited candidate that has no entry in the requested directory
//! contradicts its index and fails the lookup with [`crate::Error::IndexIntegrity`].
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use modloader::{
//!     classpath::{MemoryArchive, MemoryArchiveStore, PathSpec, SearchPathResolver},
//!     config::SearchPathConfig,
//! };
//!
//! let store = Arc::new(MemoryArchiveStore::new());
//! store.insert("/lib/a.jar", MemoryArchive::new().with_entry("a.txt", b"a".to_vec()));
//! store.insert("/lib/b.jar", MemoryArchive::new().with_entry("b.txt", b"b".to_vec()));
//!
//! let resolver = SearchPathResolver::with_opener(
//!     vec![PathSpec::Archive("/lib/a.jar".into()), PathSpec::Archive("/lib/b.jar".into())],
//!     store.clone(),
//!     SearchPathConfig::default(),
//! );
//!
//! assert!(resolver.find_resource("a.txt")?.is_some());
//! assert_eq!(store.open_count("/lib/b.jar"), 0);
//! # Ok::<(), modloader::Error>(())
//! ```

mod access;
mod archive;
mod index;
mod root;

pub use access::{AccessCheck, AllowAll};
pub use archive::{Archive, ArchiveOpener, MemoryArchive, MemoryArchiveStore, NoArchives};
pub use index::{ArchiveIndex, INDEX_NAME};
pub use root::PathSpec;

use std::{
    collections::{HashMap, HashSet, VecDeque},
    path::PathBuf,
    sync::{Arc, Mutex},
};

use tracing::{debug, trace, warn};

use crate::{
    classpath::{access::permitted, root::PathRoot},
    config::SearchPathConfig,
    location::{normalize, Location},
    Error, Result,
};

struct PathState {
    /// The configured path, plus entries added later
    path: Vec<PathSpec>,
    /// Entries not opened yet; the front is opened next
    pending: VecDeque<PathSpec>,
    /// Opened roots in search order
    roots: Vec<Arc<PathRoot>>,
    /// Normalized location -> opened root; `None` marks an archive reachable only by index
    opened: HashMap<PathBuf, Option<Arc<PathRoot>>>,
    closed: bool,
}

/// An ordered, lazily opened search path.
pub struct SearchPathResolver {
    state: Mutex<PathState>,
    opener: Arc<dyn ArchiveOpener>,
    access: Arc<dyn AccessCheck>,
    config: SearchPathConfig,
}

impl SearchPathResolver {
    /// A resolver over `paths` without archive support; archive entries are skipped.
    #[must_use]
    pub fn new(paths: Vec<PathSpec>, config: SearchPathConfig) -> Self {
        Self::with_opener(paths, Arc::new(NoArchives), config)
    }

    /// A resolver over `paths` that opens archives with `opener`.
    #[must_use]
    pub fn with_opener(paths: Vec<PathSpec>, opener: Arc<dyn ArchiveOpener>, config: SearchPathConfig) -> Self {
        SearchPathResolver {
            state: Mutex::new(PathState {
                pending: paths.iter().cloned().collect(),
                path: paths,
                roots: Vec::new(),
                opened: HashMap::new(),
                closed: false,
            }),
            opener,
            access: Arc::new(AllowAll),
            config,
        }
    }

    /// Replace the access check applied to every returned location.
    #[must_use]
    pub fn with_access_check(mut self, access: Arc<dyn AccessCheck>) -> Self {
        self.access = access;
        self
    }

    /// Append `spec` to the path.
    ///
    /// Ignored once the resolver is closed, or when the entry is already on the path.
    pub fn add_path(&self, spec: PathSpec) {
        let mut state = lock!(self.state);
        if state.closed || state.path.contains(&spec) {
            return;
        }
        state.path.push(spec.clone());
        state.pending.push_back(spec);
    }

    /// The path as configured plus entries added with [`Self::add_path`].
    ///
    /// Class-path extensions discovered while opening archives are not included.
    #[must_use]
    pub fn paths(&self) -> Vec<PathSpec> {
        lock!(self.state).path.clone()
    }

    /// Number of entries opened so far in search order.
    #[must_use]
    pub fn opened_count(&self) -> usize {
        lock!(self.state).roots.len()
    }

    /// Locate the first resource named `name`.
    ///
    /// # Errors
    /// Returns [`crate::Error::IndexIntegrity`] when an archive index is found to be corrupt.
    pub fn find_resource(&self, name: &str) -> Result<Option<Location>> {
        Ok(self.find(name)?.map(|(_, location)| location))
    }

    /// Locate the first resource named `name` and return a handle that can read it.
    ///
    /// # Errors
    /// Returns [`crate::Error::IndexIntegrity`] when an archive index is found to be corrupt.
    pub fn get_resource(&self, name: &str) -> Result<Option<ResourceHandle>> {
        Ok(self.find(name)?.map(|(root, location)| ResourceHandle {
            name: name.to_string(),
            location,
            root,
        }))
    }

    /// Every resource named `name`, in path order.
    ///
    /// The sequence is lazy and restartable: each call to [`ResourceSequence::iter`]
    /// starts again from the first path entry, opening further entries only as it advances.
    #[must_use]
    pub fn find_resources(&self, name: &str) -> ResourceSequence<'_> {
        ResourceSequence {
            resolver: self,
            name: name.to_string(),
        }
    }

    /// Close every opened root.
    ///
    /// Later lookups find nothing. Returns the errors raised by individual roots; closing an
    /// already closed resolver returns nothing.
    pub fn close(&self) -> Vec<Error> {
        let roots: Vec<Arc<PathRoot>> = {
            let mut state = lock!(self.state);
            if state.closed {
                return Vec::new();
            }
            state.closed = true;
            state.pending.clear();
            state.roots.clear();
            state.opened.drain().filter_map(|(_, root)| root).collect()
        };

        let mut errors = Vec::new();
        for root in roots {
            if let Err(error) = root.close() {
                warn!(location = %root.location().display(), %error, "failed to close path entry");
                errors.push(error);
            }
        }
        errors
    }

    fn find(&self, name: &str) -> Result<Option<(Arc<PathRoot>, Location)>> {
        let mut index = 0;
        while let Some(root) = self.root_at(index)? {
            index += 1;
            if let Some((owner, location)) = self.find_in_root(&root, name)? {
                if permitted(self.access.as_ref(), &location) {
                    trace!(name, %location, "resource found on search path");
                    return Ok(Some((owner, location)));
                }
            }
        }
        Ok(None)
    }

    fn find_in_root(&self, root: &Arc<PathRoot>, name: &str) -> Result<Option<(Arc<PathRoot>, Location)>> {
        if let Some(location) = root.locate(name) {
            return Ok(Some((Arc::clone(root), location)));
        }
        if !self.config.use_index || root.index().is_none() {
            return Ok(None);
        }

        let mut visited = HashSet::new();
        self.find_indexed(root, name, &mut visited)
    }

    /// The opened root at `position`, opening pending entries as needed.
    fn root_at(&self, position: usize) -> Result<Option<Arc<PathRoot>>> {
        let mut state = lock!(self.state);
        if state.closed {
            return Ok(None);
        }

        while state.roots.len() <= position {
            let Some(spec) = state.pending.pop_front() else {
                return Ok(None);
            };

            let location = normalize(spec.path());
            if state.opened.contains_key(&location) {
                if self.config.log_ignored {
                    debug!(location = %location.display(), "skipping path entry opened elsewhere");
                }
                continue;
            }

            let root = match self.open_root(&spec, location.clone()) {
                Ok(root) => Arc::new(root),
                Err(error) => {
                    if self.config.log_ignored {
                        warn!(location = %location.display(), %error, "ignoring unusable path entry");
                    }
                    continue;
                }
            };

            self.register_index_members(&mut state, &root);
            state.opened.insert(location, Some(Arc::clone(&root)));
            state.roots.push(Arc::clone(&root));

            if self.config.follow_class_path {
                for extension in root.class_path().into_iter().rev() {
                    state.pending.push_front(extension);
                }
            }
        }

        Ok(Some(Arc::clone(&state.roots[position])))
    }

    fn open_root(&self, spec: &PathSpec, location: PathBuf) -> Result<PathRoot> {
        match spec {
            PathSpec::Directory(_) => {
                if !location.is_dir() {
                    return Err(Error::Error(format!(
                        "{} is not a directory",
                        location.display()
                    )));
                }
                debug!(location = %location.display(), "opened directory root");
                Ok(PathRoot::directory(location))
            }
            PathSpec::Archive(_) => self.open_archive(location),
        }
    }

    fn open_archive(&self, location: PathBuf) -> Result<PathRoot> {
        let archive = self.opener.open(&location)?;
        let index = if self.config.use_index {
            match archive.index() {
                Ok(index) => index,
                Err(error) => {
                    warn!(location = %location.display(), %error, "ignoring unreadable archive index");
                    None
                }
            }
        } else {
            None
        };

        debug!(location = %location.display(), indexed = index.is_some(), "opened archive");
        Ok(PathRoot::archive(location, archive, index))
    }

    /// Reserve the archives named by `root`'s index so they are only reached through it.
    fn register_index_members(&self, state: &mut PathState, root: &PathRoot) {
        let Some(index) = root.index() else {
            return;
        };

        let members: Vec<PathBuf> = read_lock!(index)
            .archives()
            .iter()
            .map(|archive| normalize(&root.base().join(archive)))
            .collect();
        for member in members {
            if member != root.location() {
                state.opened.entry(member).or_insert(None);
            }
        }
    }

    /// Open (or reuse) the candidate archive at `location` on behalf of `parent`'s index.
    ///
    /// A newly opened candidate's index is merged into the parent's before it is returned.
    fn open_candidate(&self, parent: &Arc<PathRoot>, relative: &str, location: PathBuf) -> Result<Arc<PathRoot>> {
        let mut state = lock!(self.state);
        if state.closed {
            return Err(Error::Closed);
        }
        if let Some(Some(existing)) = state.opened.get(&location) {
            return Ok(Arc::clone(existing));
        }

        let candidate = Arc::new(self.open_archive(location.clone())?);
        if let (Some(source), Some(target)) = (candidate.index(), parent.index()) {
            if !Arc::ptr_eq(&candidate, parent) {
                let prefix = relative.rfind('/').map(|split| &relative[..=split]);
                let snapshot = read_lock!(source).clone();
                snapshot.merge_into(&mut write_lock!(target), prefix);
            }
        }

        self.register_index_members(&mut state, &candidate);
        state.opened.insert(location, Some(Arc::clone(&candidate)));
        Ok(candidate)
    }

    fn find_indexed(
        &self,
        root: &Arc<PathRoot>,
        name: &str,
        visited: &mut HashSet<PathBuf>,
    ) -> Result<Option<(Arc<PathRoot>, Location)>> {
        let Some(index) = root.index() else {
            return Ok(None);
        };
        let Some(mut candidates) = read_lock!(index).get(name) else {
            return Ok(None);
        };

        let mut consumed = 0;
        loop {
            while consumed < candidates.len() {
                let relative = candidates[consumed].clone();
                consumed += 1;

                let location = normalize(&root.base().join(&relative));
                let candidate = match self.open_candidate(root, &relative, location.clone()) {
                    Ok(candidate) => candidate,
                    Err(Error::Closed) => return Ok(None),
                    Err(error) => {
                        debug!(location = %location.display(), %error, "skipping unusable index candidate");
                        continue;
                    }
                };

                let first_visit = visited.insert(location.clone());
                if first_visit {
                    if let Some(found) = candidate.locate(name) {
                        return Ok(Some((candidate, found)));
                    }
                    if !candidate.holds_directory_of(name) {
                        return Err(Error::IndexIntegrity {
                            archive: location.display().to_string(),
                            name: name.to_string(),
                        });
                    }
                }

                if !first_visit || Arc::ptr_eq(&candidate, root) || candidate.index().is_none() {
                    continue;
                }
                if let Some(found) = self.find_indexed(&candidate, name, visited)? {
                    return Ok(Some(found));
                }
            }

            // merges may have extended the list while it was being walked
            match read_lock!(index).get(name) {
                Some(refreshed) if refreshed.len() > consumed => candidates = refreshed,
                _ => return Ok(None),
            }
        }
    }
}

impl Drop for SearchPathResolver {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// A located resource that can be read.
pub struct ResourceHandle {
    name: String,
    location: Location,
    root: Arc<PathRoot>,
}

impl ResourceHandle {
    /// The resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where the resource was found.
    #[must_use]
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Read the resource bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] on I/O failure, [`crate::Error::Closed`] if the
    /// resolver was closed, and [`crate::Error::NotFound`] if the resource disappeared.
    pub fn bytes(&self) -> Result<Vec<u8>> {
        self.root
            .read(self.location.entry())?
            .ok_or_else(|| Error::NotFound(self.location.to_string()))
    }
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("name", &self.name)
            .field("location", &self.location)
            .finish()
    }
}

/// All resources of one name on a search path. See [`SearchPathResolver::find_resources`].
pub struct ResourceSequence<'a> {
    resolver: &'a SearchPathResolver,
    name: String,
}

impl<'a> ResourceSequence<'a> {
    /// Start a fresh pass over the path.
    #[must_use]
    pub fn iter(&self) -> ResourceIter<'a> {
        ResourceIter {
            resolver: self.resolver,
            name: self.name.clone(),
            position: 0,
            seen: HashSet::new(),
        }
    }

    /// The resource name being enumerated.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<'a> IntoIterator for &ResourceSequence<'a> {
    type Item = Result<Location>;
    type IntoIter = ResourceIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One pass over a [`ResourceSequence`].
pub struct ResourceIter<'a> {
    resolver: &'a SearchPathResolver,
    name: String,
    position: usize,
    seen: HashSet<Location>,
}

impl Iterator for ResourceIter<'_> {
    type Item = Result<Location>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let root = match self.resolver.root_at(self.position) {
                Ok(Some(root)) => root,
                Ok(None) => return None,
                Err(error) => return Some(Err(error)),
            };
            self.position += 1;

            match self.resolver.find_in_root(&root, &self.name) {
                Ok(Some((_, location))) => {
                    if self.seen.insert(location.clone())
                        && permitted(self.resolver.access.as_ref(), &location)
                    {
                        return Some(Ok(location));
                    }
                }
                Ok(None) => {}
                Err(error) => return Some(Err(error)),
            }
        }
    }
}
