//! Path-mapped storage: a logical tree per file system whose files point at
//! content-addressed blobs, with reference counting and deferred collection.

mod manager;
mod provider;

pub use manager::{GcReport, PathMappedFileManager};
pub use provider::PathMappedCacheProvider;

use std::path::Path;
use std::sync::Arc;

use depot_cas::PhysicalStore;
use depot_config::PathMappedStorageConfig;
use depot_pathdb::LmdbPathDb;

use crate::error::Result;

/// Open a manager with an LMDB path database under `<root>/pathdb` and blobs
/// under `<root>/store`.
pub fn open_lmdb(root: &Path, config: PathMappedStorageConfig) -> Result<Arc<PathMappedFileManager>> {
    let db = LmdbPathDb::open(root.join("pathdb"))?;
    let store = PhysicalStore::new(root.join("store"))?;
    Ok(Arc::new(PathMappedFileManager::new(config, Arc::new(db), store)))
}
