//! # depot-pathdb
//!
//! Logical directory tree for Depot's path-mapped storage.
//!
//! Each file system (a cache namespace, usually a repository name) holds a tree of
//! `PathKey → PathMapRow` entries. File rows point at a deduplicated blob in
//! `depot-cas` by `FileId`; directory rows carry no file id. A reverse map records
//! which `file_system:path` strings reference each blob, and blobs whose reverse
//! map drains to empty are queued in the reclaim table for deferred deletion.
//!
//! ## Storage Backends
//!
//! - `MemoryPathDb`: mutex-guarded maps with bincode snapshots
//! - `LmdbPathDb`: LMDB-backed, one write transaction per logical mutation

pub mod lmdb;
pub mod memory;
mod ops;

pub use lmdb::LmdbPathDb;
pub use memory::MemoryPathDb;

use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use depot_cas::FileId;

/// Errors that can occur during path database operations
#[derive(Error, Debug)]
pub enum PathDbError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("LMDB error: {0}")]
    Heed(#[from] heed::Error),

    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Path is a directory: {0}")]
    IsDirectory(String),

    #[error("Ancestor is a file: {0}")]
    ParentIsFile(String),
}

pub type Result<T> = std::result::Result<T, PathDbError>;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Normalize a logical path: leading slash, no empty segments, no trailing slash
/// (except the root itself).
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty() && *s != ".").collect();
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut normalized = String::with_capacity(path.len() + 1);
    for seg in segments {
        normalized.push('/');
        normalized.push_str(seg);
    }
    normalized
}

/// The `file_system:path` form stored in the reverse map.
pub fn marshal(file_system: &str, path: &str) -> String {
    format!("{}:{}", file_system, normalize_path(path))
}

/// A node in the logical tree of one file system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathKey {
    pub file_system: String,
    pub parent_path: String,
    pub filename: String,
}

impl PathKey {
    /// Build the key for `path` inside `file_system`. The root maps to an empty
    /// filename under an empty parent.
    pub fn new(file_system: &str, path: &str) -> Self {
        let normalized = normalize_path(path);
        if normalized == "/" {
            return Self {
                file_system: file_system.to_string(),
                parent_path: String::new(),
                filename: String::new(),
            };
        }
        let idx = normalized.rfind('/').unwrap_or(0);
        let parent = if idx == 0 { "/" } else { &normalized[..idx] };
        Self {
            file_system: file_system.to_string(),
            parent_path: parent.to_string(),
            filename: normalized[idx + 1..].to_string(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.filename.is_empty()
    }

    /// Full normalized path of this node.
    pub fn path(&self) -> String {
        match self.parent_path.as_str() {
            "" => "/".to_string(),
            "/" => format!("/{}", self.filename),
            parent => format!("{}/{}", parent, self.filename),
        }
    }

    /// Keys of every ancestor directory, outermost first, excluding the root.
    pub fn ancestors(&self) -> Vec<PathKey> {
        let mut keys = Vec::new();
        let mut current = String::new();
        for seg in self.parent_path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(seg);
            keys.push(PathKey::new(&self.file_system, &current));
        }
        keys
    }

    pub fn marshal(&self) -> String {
        format!("{}:{}", self.file_system, self.path())
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.marshal())
    }
}

/// A row of the path map. `file_id == None` denotes a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMapRow {
    pub file_id: Option<FileId>,
    /// Creation time (milliseconds since Unix epoch)
    pub creation: u64,
    pub size: u64,
    /// Storage locator of the blob inside the physical store
    pub storage: Option<String>,
}

impl PathMapRow {
    pub fn directory(creation: u64) -> Self {
        Self {
            file_id: None,
            creation,
            size: 0,
            storage: None,
        }
    }

    pub fn file(meta: &FileMeta) -> Self {
        Self {
            file_id: Some(meta.file_id.clone()),
            creation: meta.creation,
            size: meta.size,
            storage: Some(meta.storage.clone()),
        }
    }

    pub fn is_directory(&self) -> bool {
        self.file_id.is_none()
    }
}

/// Metadata of a blob being inserted at a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub file_id: FileId,
    pub size: u64,
    pub creation: u64,
    pub storage: String,
}

/// A blob with no remaining references, queued for physical deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reclaim {
    pub file_id: FileId,
    /// When the last reference was dropped (milliseconds since Unix epoch)
    pub deletion: u64,
    pub storage: String,
}

/// One child in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
}

/// Logical tree + reference counting contract.
///
/// Every mutating call is atomic with respect to concurrent readers of the same
/// database. Sequences of calls are not.
pub trait PathDb: Send + Sync {
    /// Children of a directory, sorted by name. Empty if `path` is not a directory.
    fn list(&self, file_system: &str, path: &str) -> Result<Vec<ListEntry>>;

    fn file_length(&self, file_system: &str, path: &str) -> Result<Option<u64>>;

    fn file_last_modified(&self, file_system: &str, path: &str) -> Result<Option<u64>>;

    fn exists(&self, file_system: &str, path: &str) -> Result<bool>;

    fn is_directory(&self, file_system: &str, path: &str) -> Result<bool>;

    fn is_file(&self, file_system: &str, path: &str) -> Result<bool>;

    /// Point `path` at a blob, replacing any previous file at that path.
    fn insert(&self, file_system: &str, path: &str, meta: &FileMeta) -> Result<()>;

    /// Remove a file row. Returns `false` for directories and missing paths.
    fn delete(&self, file_system: &str, path: &str) -> Result<bool>;

    /// Storage locator of the blob behind a file path.
    fn storage_file(&self, file_system: &str, path: &str) -> Result<Option<String>>;

    fn file_id(&self, file_system: &str, path: &str) -> Result<Option<FileId>>;

    /// Make `to` reference the same blob as `from`. Returns `false` if `from` is
    /// not a file.
    fn copy(&self, from_fs: &str, from_path: &str, to_fs: &str, to_path: &str) -> Result<bool>;

    /// Create `path` and any missing ancestors as directories.
    fn make_dirs(&self, file_system: &str, path: &str) -> Result<()>;

    /// Reclaim rows queued at or before `cutoff` (milliseconds since epoch).
    fn list_orphaned_files(&self, cutoff: u64, limit: usize) -> Result<Vec<Reclaim>>;

    /// Queue a blob no path references for collection, e.g. one published by a
    /// write whose path row could not be created. Returns `false` and leaves
    /// the queue alone when some path references it.
    fn queue_reclaim(&self, file_id: &FileId, storage: &str) -> Result<bool>;

    /// Drop a reclaim row, and the blob's reverse-map row if it is still empty.
    fn remove_from_reclaim(&self, reclaim: &Reclaim) -> Result<()>;

    /// Paths currently referencing a blob.
    fn reverse_map(&self, file_id: &FileId) -> Result<BTreeSet<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("a/b//c/"), "/a/b/c");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/./a"), "/a");
    }

    #[test]
    fn test_path_key_split() {
        let key = PathKey::new("fs1", "/a/b/file.txt");
        assert_eq!(key.parent_path, "/a/b");
        assert_eq!(key.filename, "file.txt");
        assert_eq!(key.path(), "/a/b/file.txt");

        let top = PathKey::new("fs1", "a");
        assert_eq!(top.parent_path, "/");
        assert_eq!(top.filename, "a");
        assert_eq!(top.path(), "/a");

        let root = PathKey::new("fs1", "/");
        assert!(root.is_root());
        assert_eq!(root.path(), "/");
    }

    #[test]
    fn test_ancestors_outermost_first() {
        let key = PathKey::new("fs1", "/a/b/c/file.txt");
        let paths: Vec<_> = key.ancestors().iter().map(|k| k.path()).collect();
        assert_eq!(paths, vec!["/a", "/a/b", "/a/b/c"]);
        assert!(PathKey::new("fs1", "/file.txt").ancestors().is_empty());
    }

    #[test]
    fn test_marshal() {
        assert_eq!(marshal("fs1", "a/c/file.txt"), "fs1:/a/c/file.txt");
        assert_eq!(PathKey::new("fs1", "/a/c/file.txt").marshal(), "fs1:/a/c/file.txt");
    }
}
