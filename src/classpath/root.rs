//! Opened search path roots.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use crate::{
    classpath::{archive::Archive, index::ArchiveIndex},
    file::{resolve_contained, Physical},
    location::Location,
    Result,
};

/// A path entry as configured, before it is opened.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSpec {
    /// A directory whose files are resources
    Directory(PathBuf),
    /// An archive opened through the resolver's archive opener
    Archive(PathBuf),
}

impl PathSpec {
    /// The configured location.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            PathSpec::Directory(path) | PathSpec::Archive(path) => path,
        }
    }

    /// Interpret a declared class-path extension entry relative to `base`.
    ///
    /// A trailing `/` marks a directory.
    pub(crate) fn relative_to(base: &Path, declared: &str) -> PathSpec {
        if declared.ends_with('/') {
            PathSpec::Directory(base.join(declared.trim_end_matches('/')))
        } else {
            PathSpec::Archive(base.join(declared))
        }
    }
}

pub(crate) enum RootKind {
    Directory,
    Archive {
        archive: Arc<dyn Archive>,
        index: Option<RwLock<ArchiveIndex>>,
    },
}

/// An opened path entry.
pub(crate) struct PathRoot {
    /// Normalized location, also the dedup key
    location: PathBuf,
    kind: RootKind,
}

impl PathRoot {
    pub(crate) fn directory(location: PathBuf) -> Self {
        PathRoot {
            location,
            kind: RootKind::Directory,
        }
    }

    pub(crate) fn archive(location: PathBuf, archive: Arc<dyn Archive>, index: Option<ArchiveIndex>) -> Self {
        PathRoot {
            location,
            kind: RootKind::Archive {
                archive,
                index: index.map(RwLock::new),
            },
        }
    }

    pub(crate) fn location(&self) -> &Path {
        &self.location
    }

    /// Directory against which relative names declared by this root resolve.
    pub(crate) fn base(&self) -> &Path {
        self.location.parent().unwrap_or_else(|| Path::new(""))
    }

    pub(crate) fn index(&self) -> Option<&RwLock<ArchiveIndex>> {
        match &self.kind {
            RootKind::Archive { index, .. } => index.as_ref(),
            RootKind::Directory => None,
        }
    }

    /// Locate `name` directly in this root, without consulting any index.
    pub(crate) fn locate(&self, name: &str) -> Option<Location> {
        match &self.kind {
            RootKind::Directory => {
                let path = resolve_contained(&self.location, name)?;
                let present = if name.ends_with('/') {
                    path.is_dir()
                } else {
                    path.is_file()
                };
                present.then(|| Location::File {
                    root: self.location.clone(),
                    entry: name.to_string(),
                })
            }
            RootKind::Archive { archive, .. } => {
                archive.contains(name).then(|| Location::Archive {
                    archive: self.location.clone(),
                    entry: name.to_string(),
                })
            }
        }
    }

    pub(crate) fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match &self.kind {
            RootKind::Directory => {
                let Some(path) = resolve_contained(&self.location, name) else {
                    return Ok(None);
                };
                if name.ends_with('/') || !path.is_file() {
                    return Ok(None);
                }
                Ok(Some(Physical::new(&path)?.into_data()))
            }
            RootKind::Archive { archive, .. } => archive.read(name),
        }
    }

    /// Declared class-path extension, resolved against this root's directory.
    ///
    /// Indexed archives do not extend the path: their siblings are reached through the index.
    pub(crate) fn class_path(&self) -> Vec<PathSpec> {
        match &self.kind {
            RootKind::Archive { archive, index: None } => archive
                .class_path()
                .iter()
                .map(|declared| PathSpec::relative_to(self.base(), declared))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Whether the archive holds any entry in the directory that contains `name`.
    ///
    /// An index that names this archive for a directory it does not contain is corrupt.
    pub(crate) fn holds_directory_of(&self, name: &str) -> bool {
        let RootKind::Archive { archive, .. } = &self.kind else {
            return true;
        };

        let package = name.rsplit_once('/').map_or(name, |(directory, _)| directory);
        archive.entry_names().iter().any(|entry| {
            let directory = entry.rsplit_once('/').map_or(entry.as_str(), |(directory, _)| directory);
            directory == package
        })
    }

    pub(crate) fn close(&self) -> Result<()> {
        match &self.kind {
            RootKind::Directory => Ok(()),
            RootKind::Archive { archive, .. } => archive.close(),
        }
    }
}
