//! Cross-archive indexes.
//!
//! An indexed archive carries a text entry, [`INDEX_NAME`], that maps package directories (and
//! top-level resource names) to the archives that contain them. The resolver uses the index to
//! find resources in sibling archives without opening every archive on the path.
//!
//! # Format
//!
//! ```text
//! JarIndex-Version: 1.0
//!
//! app.jar
//! com/example
//! com/example/ui
//!
//! lib/util.jar
//! com/example/util
//! ```
//!
//! Everything before the first line ending in `.jar` is header. Each line ending in `.jar`
//! starts a section naming an archive relative to the indexing archive's directory; the
//! following non-blank lines are the package directories it contains.

use std::{collections::HashMap, fmt};

use crate::{Error, Result};

/// Name of the index entry inside an archive.
pub const INDEX_NAME: &str = "META-INF/INDEX.LIST";

const ARCHIVE_SUFFIX: &str = ".jar";

/// A package-to-archives map read from an archive.
///
/// Lists keep insertion order and never contain duplicates, so merging the same index twice is
/// a no-op and candidate lists only ever grow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveIndex {
    /// package directory -> archives that contain it
    packages: HashMap<String, Vec<String>>,
    /// archive -> package directories it contains
    archives: HashMap<String, Vec<String>>,
    /// archives in the order they were first mentioned
    order: Vec<String>,
}

impl ArchiveIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the text form of an index.
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] if `data` is not valid UTF-8.
    pub fn parse(data: &[u8]) -> Result<ArchiveIndex> {
        let text = std::str::from_utf8(data)
            .map_err(|error| Error::Error(format!("Malformed archive index - {}", error)))?;

        let mut index = ArchiveIndex::new();
        let mut current: Option<&str> = None;
        for line in text.lines().map(str::trim_end) {
            if line.ends_with(ARCHIVE_SUFFIX) {
                current = Some(line);
                index.note_archive(line);
                continue;
            }
            if line.is_empty() {
                continue;
            }
            if let Some(archive) = current {
                index.add_mapping(line, archive);
            }
        }

        Ok(index)
    }

    /// Archives that may contain `name`.
    ///
    /// The exact name is tried first, then the directory that contains it.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Vec<String>> {
        if let Some(archives) = self.packages.get(name) {
            return Some(archives.clone());
        }
        let (directory, _) = name.rsplit_once('/')?;
        self.packages.get(directory).cloned()
    }

    /// Record that the resource `name` lives in `archive`.
    pub fn add(&mut self, name: &str, archive: &str) {
        let package = name.rsplit_once('/').map_or(name, |(directory, _)| directory);
        self.add_mapping(package, archive);
    }

    /// Record that `package` lives in `archive`.
    pub fn add_mapping(&mut self, package: &str, archive: &str) {
        self.note_archive(archive);
        push_unique(self.packages.entry(package.to_string()).or_default(), archive);
        push_unique(self.archives.entry(archive.to_string()).or_default(), package);
    }

    /// Copy every mapping of this index into `target`, prefixing archive names with `prefix`.
    ///
    /// The prefix is the directory of this index's archive relative to the target's archive,
    /// so relative names keep pointing at the same files after the merge.
    pub fn merge_into(&self, target: &mut ArchiveIndex, prefix: Option<&str>) {
        for archive in &self.order {
            let translated = match prefix {
                Some(prefix) => format!("{}{}", prefix, archive),
                None => archive.clone(),
            };
            if let Some(packages) = self.archives.get(archive) {
                for package in packages {
                    target.add_mapping(package, &translated);
                }
            }
        }
    }

    /// Every archive mentioned by the index, in order of first mention.
    #[must_use]
    pub fn archives(&self) -> &[String] {
        &self.order
    }

    /// Number of indexed packages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Returns `true` for an index without mappings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    fn note_archive(&mut self, archive: &str) {
        if !self.order.iter().any(|known| known == archive) {
            self.order.push(archive.to_string());
        }
    }
}

impl fmt::Display for ArchiveIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "JarIndex-Version: 1.0")?;
        for archive in &self.order {
            writeln!(f)?;
            writeln!(f, "{}", archive)?;
            if let Some(packages) = self.archives.get(archive) {
                for package in packages {
                    writeln!(f, "{}", package)?;
                }
            }
        }
        Ok(())
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|existing| existing == value) {
        list.push(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "JarIndex-Version: 1.0\n\
                          Created-By: 1.8\n\
                          \n\
                          app.jar\n\
                          com/example\n\
                          com/example/ui\n\
                          \n\
                          lib/util.jar\n\
                          com/example/util\n\
                          com/example\n\
                          version.txt\n";

    #[test]
    fn test_parse() {
        let index = ArchiveIndex::parse(SAMPLE.as_bytes()).unwrap();

        assert_eq!(index.archives(), &["app.jar", "lib/util.jar"]);
        assert_eq!(
            index.get("com/example/Main.class"),
            Some(vec!["app.jar".to_string(), "lib/util.jar".to_string()])
        );
        assert_eq!(
            index.get("com/example/util/Strings.class"),
            Some(vec!["lib/util.jar".to_string()])
        );
        assert_eq!(index.get("version.txt"), Some(vec!["lib/util.jar".to_string()]));
        assert_eq!(index.get("org/other/X.class"), None);
        assert_eq!(index.get("toplevel.txt"), None);
    }

    #[test]
    fn test_parse_rejects_binary() {
        assert!(ArchiveIndex::parse(&[0xFF, 0xFE, 0x00]).is_err());
    }

    #[test]
    fn test_display_parses_back() {
        let index = ArchiveIndex::parse(SAMPLE.as_bytes()).unwrap();
        let reparsed = ArchiveIndex::parse(index.to_string().as_bytes()).unwrap();
        assert_eq!(index, reparsed);
    }

    #[test]
    fn test_merge_prefixes_archives() {
        let mut parent = ArchiveIndex::new();
        parent.add_mapping("a", "a.jar");
        parent.add_mapping("b", "sub/b.jar");

        let mut child = ArchiveIndex::new();
        child.add_mapping("b", "b.jar");
        child.add_mapping("c", "c.jar");

        child.merge_into(&mut parent, Some("sub/"));
        assert_eq!(parent.get("b/X"), Some(vec!["sub/b.jar".to_string()]));
        assert_eq!(parent.get("c/X"), Some(vec!["sub/c.jar".to_string()]));

        // merging again changes nothing
        let snapshot = parent.clone();
        child.merge_into(&mut parent, Some("sub/"));
        assert_eq!(parent, snapshot);
    }

    #[test]
    fn test_add_uses_directory() {
        let mut index = ArchiveIndex::new();
        index.add("p/q/R.class", "x.jar");
        index.add("top.txt", "x.jar");
        assert_eq!(index.get("p/q/Other.class"), Some(vec!["x.jar".to_string()]));
        assert_eq!(index.get("top.txt"), Some(vec!["x.jar".to_string()]));
        assert_eq!(index.len(), 2);
    }
}
