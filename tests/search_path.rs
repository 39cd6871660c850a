//! Integration tests for lazy search paths and cross-archive indexes.

use std::sync::Arc;

use modloader::{
    classpath::{ArchiveIndex, MemoryArchive, MemoryArchiveStore, PathSpec, SearchPathResolver},
    config::SearchPathConfig,
    Error, Result,
};

fn archives(paths: &[&str]) -> Vec<PathSpec> {
    paths.iter().map(|path| PathSpec::Archive(path.into())).collect()
}

/// A lookup satisfied by the first entry never opens the second.
#[test]
fn test_lazy_opening_probe() -> Result<()> {
    let store = Arc::new(MemoryArchiveStore::new());
    store.insert("/cp/first.jar", MemoryArchive::new().with_entry("r/R.txt", b"1".to_vec()));
    store.insert("/cp/second.jar", MemoryArchive::new().with_entry("r/R.txt", b"2".to_vec()));

    let resolver = SearchPathResolver::with_opener(
        archives(&["/cp/first.jar", "/cp/second.jar"]),
        store.clone(),
        SearchPathConfig::default(),
    );

    let handle = resolver.get_resource("r/R.txt")?.expect("resource");
    assert_eq!(handle.bytes()?, b"1");
    assert_eq!(store.open_count("/cp/second.jar"), 0);

    let every: Vec<_> = resolver.find_resources("r/R.txt").iter().collect::<Result<_>>()?;
    assert_eq!(every.len(), 2);
    assert_eq!(store.open_count("/cp/second.jar"), 1);
    Ok(())
}

/// Indexes that reference each other terminate and open each archive once.
#[test]
fn test_index_cycle_terminates() -> Result<()> {
    let store = Arc::new(MemoryArchiveStore::new());

    let mut index = ArchiveIndex::new();
    index.add_mapping("p", "a.jar");
    index.add_mapping("p", "b.jar");

    store.insert(
        "/lib/a.jar",
        MemoryArchive::new()
            .with_entry("p/A.class", vec![1])
            .with_index(&index),
    );
    store.insert(
        "/lib/b.jar",
        MemoryArchive::new()
            .with_entry("p/B.class", vec![2])
            .with_index(&index),
    );

    let resolver = SearchPathResolver::with_opener(
        archives(&["/lib/a.jar"]),
        store.clone(),
        SearchPathConfig::default(),
    );

    assert!(resolver.find_resource("p/Missing.class")?.is_none());
    assert!(resolver.find_resource("p/B.class")?.is_some());
    assert_eq!(store.open_count("/lib/a.jar"), 1);
    assert_eq!(store.open_count("/lib/b.jar"), 1);
    Ok(())
}

/// An index pointing at an archive without the requested directory is an error, not a miss.
#[test]
fn test_corrupt_index_is_reported() -> Result<()> {
    let store = Arc::new(MemoryArchiveStore::new());
    let mut index = ArchiveIndex::new();
    index.add_mapping("p", "a.jar");
    index.add_mapping("q", "wrong.jar");

    store.insert(
        "/lib/a.jar",
        MemoryArchive::new().with_entry("p/A.class", vec![]).with_index(&index),
    );
    store.insert("/lib/wrong.jar", MemoryArchive::new().with_entry("z/Z.class", vec![]));

    let resolver = SearchPathResolver::with_opener(archives(&["/lib/a.jar"]), store, SearchPathConfig::default());

    match resolver.find_resource("q/Q.class") {
        Err(Error::IndexIntegrity { archive, name }) => {
            assert!(archive.contains("wrong.jar"));
            assert_eq!(name, "q/Q.class");
        }
        other => panic!("expected an integrity error, got {:?}", other),
    }
    Ok(())
}

/// Directory roots and archives mix on one path.
#[test]
fn test_directory_and_archive_roots() -> Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::create_dir_all(dir.path().join("conf"))?;
    std::fs::write(dir.path().join("conf/app.properties"), b"mode=dir")?;

    let store = Arc::new(MemoryArchiveStore::new());
    store.insert(
        "/lib/app.jar",
        MemoryArchive::new().with_entry("conf/app.properties", b"mode=jar".to_vec()),
    );

    let resolver = SearchPathResolver::with_opener(
        vec![
            PathSpec::Directory(dir.path().to_path_buf()),
            PathSpec::Archive("/lib/app.jar".into()),
        ],
        store,
        SearchPathConfig::default(),
    );

    let locations: Vec<_> = resolver
        .find_resources("conf/app.properties")
        .iter()
        .collect::<Result<_>>()?;
    assert_eq!(locations.len(), 2);
    assert_eq!(
        resolver.get_resource("conf/app.properties")?.expect("resource").bytes()?,
        b"mode=dir"
    );
    Ok(())
}
