//! Mutation algorithms shared by every backend.
//!
//! Backends expose their tables through [`Tables`] inside whatever unit of
//! atomicity they have (a held mutex, an LMDB write transaction), and the logic
//! for insert, delete, copy and reclaim bookkeeping lives here once.

use std::collections::BTreeSet;

use tracing::debug;

use crate::{FileId, FileMeta, PathDbError, PathKey, PathMapRow, Reclaim, Result};

pub(crate) trait Tables {
    fn row(&self, key: &PathKey) -> Result<Option<PathMapRow>>;
    fn put_row(&mut self, key: &PathKey, row: &PathMapRow) -> Result<()>;
    fn remove_row(&mut self, key: &PathKey) -> Result<()>;

    fn reverse(&self, file_id: &FileId) -> Result<Option<BTreeSet<String>>>;
    fn put_reverse(&mut self, file_id: &FileId, paths: &BTreeSet<String>) -> Result<()>;
    fn remove_reverse(&mut self, file_id: &FileId) -> Result<()>;

    fn put_reclaim(&mut self, reclaim: &Reclaim) -> Result<()>;
    fn remove_reclaim(&mut self, file_id: &FileId) -> Result<()>;
}

/// Create `key` and its missing ancestors as directories, outermost first.
pub(crate) fn make_dirs<T: Tables>(tables: &mut T, key: &PathKey, now: u64) -> Result<()> {
    let mut chain = key.ancestors();
    if !key.is_root() {
        chain.push(key.clone());
    }
    create_chain(tables, chain, now)
}

fn make_parents<T: Tables>(tables: &mut T, key: &PathKey, now: u64) -> Result<()> {
    create_chain(tables, key.ancestors(), now)
}

fn create_chain<T: Tables>(tables: &mut T, chain: Vec<PathKey>, now: u64) -> Result<()> {
    for dir in chain {
        match tables.row(&dir)? {
            Some(row) if row.is_directory() => {}
            Some(_) => return Err(PathDbError::ParentIsFile(dir.marshal())),
            None => tables.put_row(&dir, &PathMapRow::directory(now))?,
        }
    }
    Ok(())
}

pub(crate) fn insert<T: Tables>(tables: &mut T, key: &PathKey, meta: &FileMeta, now: u64) -> Result<()> {
    if key.is_root() {
        return Err(PathDbError::IsDirectory(key.marshal()));
    }

    make_parents(tables, key, now)?;

    if let Some(existing) = tables.row(key)? {
        match existing.file_id {
            None => return Err(PathDbError::IsDirectory(key.marshal())),
            // Same blob: refresh the row without touching the reference count
            Some(ref id) if *id == meta.file_id => {
                return tables.put_row(key, &PathMapRow::file(meta));
            }
            Some(_) => {
                delete(tables, key, now)?;
            }
        }
    }

    tables.put_row(key, &PathMapRow::file(meta))?;
    reference(tables, &meta.file_id, key.marshal())
}

pub(crate) fn delete<T: Tables>(tables: &mut T, key: &PathKey, now: u64) -> Result<bool> {
    let Some(row) = tables.row(key)? else {
        return Ok(false);
    };
    let Some(file_id) = row.file_id else {
        return Ok(false);
    };

    tables.remove_row(key)?;
    release(tables, &file_id, &key.marshal(), row.storage.unwrap_or_default(), now)?;
    Ok(true)
}

pub(crate) fn copy<T: Tables>(tables: &mut T, from: &PathKey, to: &PathKey, now: u64) -> Result<bool> {
    let Some(source) = tables.row(from)? else {
        return Ok(false);
    };
    let Some(file_id) = source.file_id.clone() else {
        return Ok(false);
    };
    if from == to {
        return Ok(true);
    }
    if to.is_root() {
        return Err(PathDbError::IsDirectory(to.marshal()));
    }

    if let Some(existing) = tables.row(to)? {
        match existing.file_id {
            None => return Err(PathDbError::IsDirectory(to.marshal())),
            Some(ref id) if *id == file_id => return Ok(true),
            Some(_) => {
                delete(tables, to, now)?;
            }
        }
    }

    make_parents(tables, to, now)?;
    tables.put_row(to, &source)?;
    reference(tables, &file_id, to.marshal())?;
    Ok(true)
}

pub(crate) fn queue_reclaim<T: Tables>(
    tables: &mut T,
    file_id: &FileId,
    storage: &str,
    now: u64,
) -> Result<bool> {
    if tables.reverse(file_id)?.is_some_and(|paths| !paths.is_empty()) {
        return Ok(false);
    }
    tables.put_reclaim(&Reclaim {
        file_id: file_id.clone(),
        deletion: now,
        storage: storage.to_string(),
    })?;
    Ok(true)
}

pub(crate) fn remove_from_reclaim<T: Tables>(tables: &mut T, reclaim: &Reclaim) -> Result<()> {
    tables.remove_reclaim(&reclaim.file_id)?;
    if let Some(paths) = tables.reverse(&reclaim.file_id)? {
        if paths.is_empty() {
            tables.remove_reverse(&reclaim.file_id)?;
        }
    }
    Ok(())
}

fn reference<T: Tables>(tables: &mut T, file_id: &FileId, marshalled: String) -> Result<()> {
    let mut paths = tables.reverse(file_id)?.unwrap_or_default();
    paths.insert(marshalled);
    tables.put_reverse(file_id, &paths)?;
    // A referenced blob is no longer an orphan; a later release queues it again
    tables.remove_reclaim(file_id)
}

fn release<T: Tables>(
    tables: &mut T,
    file_id: &FileId,
    marshalled: &str,
    storage: String,
    now: u64,
) -> Result<()> {
    let mut paths = tables.reverse(file_id)?.unwrap_or_default();
    paths.remove(marshalled);
    tables.put_reverse(file_id, &paths)?;

    // The reverse-map row and the blob stay until GC re-checks after the grace period
    if paths.is_empty() {
        debug!(file_id = %file_id, "last reference dropped, queued for reclaim");
        tables.put_reclaim(&Reclaim {
            file_id: file_id.clone(),
            deletion: now,
            storage,
        })?;
    }
    Ok(())
}
