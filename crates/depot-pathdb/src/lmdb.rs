//! LMDB-backed path database for persistent, crash-safe path→blob mapping.
//!
//! Three named databases live in one environment:
//! - `paths`: encoded `PathKey` → `PathMapRow`
//! - `reverse`: file id → set of `file_system:path` strings
//! - `reclaim`: file id → `Reclaim`
//!
//! Each logical mutation runs in a single write transaction, so readers never see
//! a half-applied insert, delete or copy.

use std::collections::BTreeSet;
use std::path::Path;

use heed::types::{SerdeBincode, Str};
use heed::{Database, Env, EnvOpenOptions, RwTxn};
use tracing::debug;

use crate::ops::{self, Tables};
use crate::{
    now_millis, FileId, FileMeta, ListEntry, PathDb, PathKey, PathMapRow, Reclaim, Result,
};

/// Separator between key components; never valid inside a path or name.
const KEY_SEP: char = '\u{0}';

fn encode_key(key: &PathKey) -> String {
    format!(
        "{}{}{}{}{}",
        key.file_system, KEY_SEP, key.parent_path, KEY_SEP, key.filename
    )
}

fn children_prefix(file_system: &str, dir_path: &str) -> String {
    format!("{}{}{}{}", file_system, KEY_SEP, dir_path, KEY_SEP)
}

#[derive(Clone, Copy)]
struct Dbs {
    paths: Database<Str, SerdeBincode<PathMapRow>>,
    reverse: Database<Str, SerdeBincode<BTreeSet<String>>>,
    reclaim: Database<Str, SerdeBincode<Reclaim>>,
}

struct TxnTables<'a, 'e> {
    txn: &'a mut RwTxn<'e>,
    dbs: Dbs,
}

impl Tables for TxnTables<'_, '_> {
    fn row(&self, key: &PathKey) -> Result<Option<PathMapRow>> {
        Ok(self.dbs.paths.get(&*self.txn, &encode_key(key))?)
    }

    fn put_row(&mut self, key: &PathKey, row: &PathMapRow) -> Result<()> {
        self.dbs.paths.put(&mut *self.txn, &encode_key(key), row)?;
        Ok(())
    }

    fn remove_row(&mut self, key: &PathKey) -> Result<()> {
        self.dbs.paths.delete(&mut *self.txn, &encode_key(key))?;
        Ok(())
    }

    fn reverse(&self, file_id: &FileId) -> Result<Option<BTreeSet<String>>> {
        Ok(self.dbs.reverse.get(&*self.txn, file_id.as_str())?)
    }

    fn put_reverse(&mut self, file_id: &FileId, paths: &BTreeSet<String>) -> Result<()> {
        self.dbs.reverse.put(&mut *self.txn, file_id.as_str(), paths)?;
        Ok(())
    }

    fn remove_reverse(&mut self, file_id: &FileId) -> Result<()> {
        self.dbs.reverse.delete(&mut *self.txn, file_id.as_str())?;
        Ok(())
    }

    fn put_reclaim(&mut self, reclaim: &Reclaim) -> Result<()> {
        self.dbs.reclaim.put(&mut *self.txn, reclaim.file_id.as_str(), reclaim)?;
        Ok(())
    }

    fn remove_reclaim(&mut self, file_id: &FileId) -> Result<()> {
        self.dbs.reclaim.delete(&mut *self.txn, file_id.as_str())?;
        Ok(())
    }
}

/// LMDB-backed path database
pub struct LmdbPathDb {
    env: Env,
    dbs: Dbs,
}

impl LmdbPathDb {
    /// Default LMDB map size: 1GB (expandable)
    const DEFAULT_MAP_SIZE: usize = 1024 * 1024 * 1024;

    /// Maximum readers
    const MAX_READERS: u32 = 128;

    /// Open or create a path database at the given directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(Self::DEFAULT_MAP_SIZE)
                .max_readers(Self::MAX_READERS)
                .max_dbs(3)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let paths = env.create_database(&mut wtxn, Some("paths"))?;
        let reverse = env.create_database(&mut wtxn, Some("reverse"))?;
        let reclaim = env.create_database(&mut wtxn, Some("reclaim"))?;
        wtxn.commit()?;

        debug!("Opened LMDB path database at {:?}", path);

        Ok(Self {
            env,
            dbs: Dbs {
                paths,
                reverse,
                reclaim,
            },
        })
    }

    /// Run one logical mutation inside a write transaction.
    fn mutate<T>(&self, f: impl FnOnce(&mut TxnTables<'_, '_>) -> Result<T>) -> Result<T> {
        let mut wtxn = self.env.write_txn()?;
        let result = {
            let mut tables = TxnTables {
                txn: &mut wtxn,
                dbs: self.dbs,
            };
            f(&mut tables)?
        };
        wtxn.commit()?;
        Ok(result)
    }

    fn row(&self, file_system: &str, path: &str) -> Result<Option<PathMapRow>> {
        let rtxn = self.env.read_txn()?;
        let key = encode_key(&PathKey::new(file_system, path));
        Ok(self.dbs.paths.get(&rtxn, &key)?)
    }

    /// Sync/flush LMDB to disk
    pub fn sync(&self) -> Result<()> {
        self.env.force_sync()?;
        Ok(())
    }
}

impl PathDb for LmdbPathDb {
    fn list(&self, file_system: &str, path: &str) -> Result<Vec<ListEntry>> {
        let dir = PathKey::new(file_system, path);
        let rtxn = self.env.read_txn()?;
        if !dir.is_root() {
            match self.dbs.paths.get(&rtxn, &encode_key(&dir))? {
                Some(row) if row.is_directory() => {}
                _ => return Ok(Vec::new()),
            }
        }

        let prefix = children_prefix(file_system, &dir.path());
        let mut entries = Vec::new();
        for item in self.dbs.paths.prefix_iter(&rtxn, &prefix)? {
            let (key, row) = item?;
            let name = &key[prefix.len()..];
            if name.is_empty() {
                continue;
            }
            entries.push(ListEntry {
                name: name.to_string(),
                is_directory: row.is_directory(),
                size: row.size,
            });
        }
        Ok(entries)
    }

    fn file_length(&self, file_system: &str, path: &str) -> Result<Option<u64>> {
        Ok(self
            .row(file_system, path)?
            .filter(|r| !r.is_directory())
            .map(|r| r.size))
    }

    fn file_last_modified(&self, file_system: &str, path: &str) -> Result<Option<u64>> {
        Ok(self.row(file_system, path)?.map(|r| r.creation))
    }

    fn exists(&self, file_system: &str, path: &str) -> Result<bool> {
        Ok(PathKey::new(file_system, path).is_root() || self.row(file_system, path)?.is_some())
    }

    fn is_directory(&self, file_system: &str, path: &str) -> Result<bool> {
        Ok(PathKey::new(file_system, path).is_root()
            || self.row(file_system, path)?.is_some_and(|r| r.is_directory()))
    }

    fn is_file(&self, file_system: &str, path: &str) -> Result<bool> {
        Ok(self.row(file_system, path)?.is_some_and(|r| !r.is_directory()))
    }

    fn insert(&self, file_system: &str, path: &str, meta: &FileMeta) -> Result<()> {
        let key = PathKey::new(file_system, path);
        self.mutate(|t| ops::insert(t, &key, meta, now_millis()))
    }

    fn delete(&self, file_system: &str, path: &str) -> Result<bool> {
        let key = PathKey::new(file_system, path);
        self.mutate(|t| ops::delete(t, &key, now_millis()))
    }

    fn storage_file(&self, file_system: &str, path: &str) -> Result<Option<String>> {
        Ok(self.row(file_system, path)?.and_then(|r| r.storage))
    }

    fn file_id(&self, file_system: &str, path: &str) -> Result<Option<FileId>> {
        Ok(self.row(file_system, path)?.and_then(|r| r.file_id))
    }

    fn copy(&self, from_fs: &str, from_path: &str, to_fs: &str, to_path: &str) -> Result<bool> {
        let from = PathKey::new(from_fs, from_path);
        let to = PathKey::new(to_fs, to_path);
        self.mutate(|t| ops::copy(t, &from, &to, now_millis()))
    }

    fn make_dirs(&self, file_system: &str, path: &str) -> Result<()> {
        let key = PathKey::new(file_system, path);
        self.mutate(|t| ops::make_dirs(t, &key, now_millis()))
    }

    fn list_orphaned_files(&self, cutoff: u64, limit: usize) -> Result<Vec<Reclaim>> {
        let rtxn = self.env.read_txn()?;
        let mut orphans = Vec::new();
        for item in self.dbs.reclaim.iter(&rtxn)? {
            let (_, reclaim) = item?;
            if reclaim.deletion <= cutoff {
                orphans.push(reclaim);
            }
        }
        orphans.sort_by_key(|r| r.deletion);
        orphans.truncate(limit);
        Ok(orphans)
    }

    fn queue_reclaim(&self, file_id: &FileId, storage: &str) -> Result<bool> {
        self.mutate(|t| ops::queue_reclaim(t, file_id, storage, now_millis()))
    }

    fn remove_from_reclaim(&self, reclaim: &Reclaim) -> Result<()> {
        self.mutate(|t| ops::remove_from_reclaim(t, reclaim))
    }

    fn reverse_map(&self, file_id: &FileId) -> Result<BTreeSet<String>> {
        let rtxn = self.env.read_txn()?;
        Ok(self
            .dbs
            .reverse
            .get(&rtxn, file_id.as_str())?
            .unwrap_or_default())
    }
}
