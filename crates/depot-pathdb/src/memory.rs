//! In-memory path database with bincode snapshots.
//!
//! All tables sit behind one mutex, so every logical mutation is atomic.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::ops::{self, Tables};
use crate::{
    now_millis, FileId, FileMeta, ListEntry, PathDb, PathKey, PathMapRow, Reclaim, Result,
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    /// Ordered so that the children of a directory are contiguous
    paths: BTreeMap<PathKey, PathMapRow>,
    reverse: HashMap<FileId, BTreeSet<String>>,
    reclaim: HashMap<FileId, Reclaim>,
}

impl Tables for State {
    fn row(&self, key: &PathKey) -> Result<Option<PathMapRow>> {
        Ok(self.paths.get(key).cloned())
    }

    fn put_row(&mut self, key: &PathKey, row: &PathMapRow) -> Result<()> {
        self.paths.insert(key.clone(), row.clone());
        Ok(())
    }

    fn remove_row(&mut self, key: &PathKey) -> Result<()> {
        self.paths.remove(key);
        Ok(())
    }

    fn reverse(&self, file_id: &FileId) -> Result<Option<BTreeSet<String>>> {
        Ok(self.reverse.get(file_id).cloned())
    }

    fn put_reverse(&mut self, file_id: &FileId, paths: &BTreeSet<String>) -> Result<()> {
        self.reverse.insert(file_id.clone(), paths.clone());
        Ok(())
    }

    fn remove_reverse(&mut self, file_id: &FileId) -> Result<()> {
        self.reverse.remove(file_id);
        Ok(())
    }

    fn put_reclaim(&mut self, reclaim: &Reclaim) -> Result<()> {
        self.reclaim.insert(reclaim.file_id.clone(), reclaim.clone());
        Ok(())
    }

    fn remove_reclaim(&mut self, file_id: &FileId) -> Result<()> {
        self.reclaim.remove(file_id);
        Ok(())
    }
}

/// Path database held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryPathDb {
    state: Mutex<State>,
}

impl MemoryPathDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn row(&self, file_system: &str, path: &str) -> Option<PathMapRow> {
        self.state().paths.get(&PathKey::new(file_system, path)).cloned()
    }

    /// Save a snapshot of all tables using bincode
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        bincode::serialize_into(writer, &*self.state())?;
        Ok(())
    }

    /// Load a snapshot written by [`MemoryPathDb::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let state: State = bincode::deserialize_from(reader)?;
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Number of rows (files and directories)
    pub fn len(&self) -> usize {
        self.state().paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().paths.is_empty()
    }
}

impl PathDb for MemoryPathDb {
    fn list(&self, file_system: &str, path: &str) -> Result<Vec<ListEntry>> {
        let dir = PathKey::new(file_system, path);
        let state = self.state();
        if !dir.is_root() && !state.paths.get(&dir).is_some_and(PathMapRow::is_directory) {
            return Ok(Vec::new());
        }

        let parent = dir.path();
        let start = PathKey {
            file_system: file_system.to_string(),
            parent_path: parent.clone(),
            filename: String::new(),
        };
        let entries = state
            .paths
            .range(start..)
            .take_while(|(k, _)| k.file_system == file_system && k.parent_path == parent)
            .filter(|(k, _)| !k.is_root())
            .map(|(k, row)| ListEntry {
                name: k.filename.clone(),
                is_directory: row.is_directory(),
                size: row.size,
            })
            .collect();
        Ok(entries)
    }

    fn file_length(&self, file_system: &str, path: &str) -> Result<Option<u64>> {
        Ok(self
            .row(file_system, path)
            .filter(|r| !r.is_directory())
            .map(|r| r.size))
    }

    fn file_last_modified(&self, file_system: &str, path: &str) -> Result<Option<u64>> {
        Ok(self.row(file_system, path).map(|r| r.creation))
    }

    fn exists(&self, file_system: &str, path: &str) -> Result<bool> {
        Ok(PathKey::new(file_system, path).is_root() || self.row(file_system, path).is_some())
    }

    fn is_directory(&self, file_system: &str, path: &str) -> Result<bool> {
        Ok(PathKey::new(file_system, path).is_root()
            || self.row(file_system, path).is_some_and(|r| r.is_directory()))
    }

    fn is_file(&self, file_system: &str, path: &str) -> Result<bool> {
        Ok(self.row(file_system, path).is_some_and(|r| !r.is_directory()))
    }

    fn insert(&self, file_system: &str, path: &str, meta: &FileMeta) -> Result<()> {
        let key = PathKey::new(file_system, path);
        ops::insert(&mut *self.state(), &key, meta, now_millis())
    }

    fn delete(&self, file_system: &str, path: &str) -> Result<bool> {
        let key = PathKey::new(file_system, path);
        ops::delete(&mut *self.state(), &key, now_millis())
    }

    fn storage_file(&self, file_system: &str, path: &str) -> Result<Option<String>> {
        Ok(self.row(file_system, path).and_then(|r| r.storage))
    }

    fn file_id(&self, file_system: &str, path: &str) -> Result<Option<FileId>> {
        Ok(self.row(file_system, path).and_then(|r| r.file_id))
    }

    fn copy(&self, from_fs: &str, from_path: &str, to_fs: &str, to_path: &str) -> Result<bool> {
        let from = PathKey::new(from_fs, from_path);
        let to = PathKey::new(to_fs, to_path);
        ops::copy(&mut *self.state(), &from, &to, now_millis())
    }

    fn make_dirs(&self, file_system: &str, path: &str) -> Result<()> {
        let key = PathKey::new(file_system, path);
        ops::make_dirs(&mut *self.state(), &key, now_millis())
    }

    fn list_orphaned_files(&self, cutoff: u64, limit: usize) -> Result<Vec<Reclaim>> {
        let mut orphans: Vec<Reclaim> = self
            .state()
            .reclaim
            .values()
            .filter(|r| r.deletion <= cutoff)
            .cloned()
            .collect();
        orphans.sort_by_key(|r| r.deletion);
        orphans.truncate(limit);
        Ok(orphans)
    }

    fn queue_reclaim(&self, file_id: &FileId, storage: &str) -> Result<bool> {
        ops::queue_reclaim(&mut *self.state(), file_id, storage, now_millis())
    }

    fn remove_from_reclaim(&self, reclaim: &Reclaim) -> Result<()> {
        ops::remove_from_reclaim(&mut *self.state(), reclaim)
    }

    fn reverse_map(&self, file_id: &FileId) -> Result<BTreeSet<String>> {
        Ok(self.state().reverse.get(file_id).cloned().unwrap_or_default())
    }
}
