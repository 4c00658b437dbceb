//! Reference counting behaviour shared by both backends.

use std::collections::BTreeSet;

use depot_cas::PhysicalStore;
use depot_pathdb::{FileMeta, LmdbPathDb, MemoryPathDb, PathDb, PathDbError};
use tempfile::TempDir;

fn stored(store: &PhysicalStore, content: &[u8]) -> FileMeta {
    let blob = store.store(content).unwrap();
    FileMeta {
        file_id: blob.file_id,
        size: blob.size,
        creation: 1_706_448_000_000,
        storage: blob.storage,
    }
}

fn set(paths: &[&str]) -> BTreeSet<String> {
    paths.iter().map(|p| p.to_string()).collect()
}

fn copy_then_delete_original(db: &dyn PathDb, store: &PhysicalStore) {
    let meta = stored(store, b"abc");
    db.insert("fs1", "/a/b/file.txt", &meta).unwrap();
    assert!(db.copy("fs1", "/a/b/file.txt", "fs1", "/a/c/file.txt").unwrap());

    assert_eq!(db.file_id("fs1", "/a/c/file.txt").unwrap(), Some(meta.file_id.clone()));
    assert_eq!(
        db.reverse_map(&meta.file_id).unwrap(),
        set(&["fs1:/a/b/file.txt", "fs1:/a/c/file.txt"])
    );

    assert!(db.delete("fs1", "/a/b/file.txt").unwrap());
    assert_eq!(db.reverse_map(&meta.file_id).unwrap(), set(&["fs1:/a/c/file.txt"]));
    assert!(db.list_orphaned_files(u64::MAX, 10).unwrap().is_empty());

    let locator = db.storage_file("fs1", "/a/c/file.txt").unwrap().unwrap();
    let mut content = String::new();
    std::io::Read::read_to_string(&mut store.open(&locator).unwrap(), &mut content).unwrap();
    assert_eq!(content, "abc");
}

fn last_reference_queues_reclaim(db: &dyn PathDb, store: &PhysicalStore) {
    let meta = stored(store, b"orphan me");
    db.insert("fs2", "/x/y.bin", &meta).unwrap();
    assert!(db.delete("fs2", "/x/y.bin").unwrap());

    // Idempotent delete
    assert!(!db.delete("fs2", "/x/y.bin").unwrap());

    let orphans = db.list_orphaned_files(u64::MAX, 100).unwrap();
    assert!(orphans.iter().any(|r| r.file_id == meta.file_id));
    assert!(store.exists(&meta.storage));

    // Re-referencing before a sweep takes the blob off the reclaim queue
    db.insert("fs2", "/x/z.bin", &meta).unwrap();
    assert_eq!(db.reverse_map(&meta.file_id).unwrap(), set(&["fs2:/x/z.bin"]));
    let orphans = db.list_orphaned_files(u64::MAX, 100).unwrap();
    assert!(orphans.iter().all(|r| r.file_id != meta.file_id));

    // Releasing it again queues it again
    assert!(db.delete("fs2", "/x/z.bin").unwrap());
    let orphans = db.list_orphaned_files(u64::MAX, 100).unwrap();
    assert!(orphans.iter().any(|r| r.file_id == meta.file_id));
}

fn directory_rules(db: &dyn PathDb, store: &PhysicalStore) {
    let meta = stored(store, b"dir rules");
    db.make_dirs("fs3", "/d/e").unwrap();
    db.make_dirs("fs3", "/d/e").unwrap();
    assert!(db.is_directory("fs3", "/d").unwrap());
    assert!(!db.delete("fs3", "/d/e").unwrap());

    assert!(matches!(
        db.insert("fs3", "/d/e", &meta),
        Err(PathDbError::IsDirectory(_))
    ));

    db.insert("fs3", "/d/file", &meta).unwrap();
    assert!(matches!(
        db.insert("fs3", "/d/file/nested", &meta),
        Err(PathDbError::ParentIsFile(_))
    ));

    assert!(!db.copy("fs3", "/d/missing", "fs3", "/d/other").unwrap());
}

#[test]
fn test_memory_backend_lifecycle() {
    let temp = TempDir::new().unwrap();
    let store = PhysicalStore::new(temp.path().join("store")).unwrap();
    let db = MemoryPathDb::new();

    copy_then_delete_original(&db, &store);
    last_reference_queues_reclaim(&db, &store);
    directory_rules(&db, &store);
}

#[test]
fn test_lmdb_backend_lifecycle() {
    let temp = TempDir::new().unwrap();
    let store = PhysicalStore::new(temp.path().join("store")).unwrap();
    let db = LmdbPathDb::open(temp.path().join("pathdb")).unwrap();

    copy_then_delete_original(&db, &store);
    last_reference_queues_reclaim(&db, &store);
    directory_rules(&db, &store);
}

#[test]
fn test_cross_filesystem_copy() {
    let temp = TempDir::new().unwrap();
    let store = PhysicalStore::new(temp.path().join("store")).unwrap();
    let db = MemoryPathDb::new();

    let meta = stored(&store, b"shared across repos");
    db.insert("central", "/org/lib.jar", &meta).unwrap();
    assert!(db.copy("central", "/org/lib.jar", "group", "/org/lib.jar").unwrap());

    assert!(db.is_file("group", "/org/lib.jar").unwrap());
    assert_eq!(
        db.reverse_map(&meta.file_id).unwrap(),
        set(&["central:/org/lib.jar", "group:/org/lib.jar"])
    );
    assert_eq!(store.stats().unwrap().blob_count, 1);
}
