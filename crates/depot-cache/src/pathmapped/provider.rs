use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, SystemTime};

use depot_cas::BlobWriter;
use depot_config::log_cache_debug;
use depot_pathdb::now_millis;
use tracing::instrument;

use super::PathMappedFileManager;
use crate::decorator::TransferDecorator;
use crate::error::{CacheError, Result};
use crate::lock::LockTable;
use crate::model::ConcreteResource;
use crate::provider::{CacheProvider, CacheRead, CacheWrite};
use crate::special::SpecialPathManager;

const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_MIN_CACHE_TIMEOUT: Duration = Duration::from_secs(60);

/// Cache provider over deduplicated path-mapped storage. The location name is
/// the file system; copies and aliases share one blob.
///
/// Files of a location with a positive cache timeout go stale once their row
/// is older than `max(cache_timeout, min_cache_timeout)`. A stale row is
/// deleted on access and its blob left to GC.
pub struct PathMappedCacheProvider {
    manager: Arc<PathMappedFileManager>,
    min_cache_timeout: Duration,
    locks: Arc<LockTable>,
    special: Arc<SpecialPathManager>,
    decorator: Option<Arc<dyn TransferDecorator>>,
}

impl PathMappedCacheProvider {
    pub fn new(manager: Arc<PathMappedFileManager>, lock_timeout: Option<Duration>) -> Self {
        Self {
            manager,
            min_cache_timeout: DEFAULT_MIN_CACHE_TIMEOUT,
            locks: Arc::new(LockTable::new(lock_timeout)),
            special: Arc::new(SpecialPathManager::default()),
            decorator: None,
        }
    }

    pub fn with_min_cache_timeout(mut self, min_cache_timeout: Duration) -> Self {
        self.min_cache_timeout = min_cache_timeout;
        self
    }

    pub fn with_decorator(mut self, decorator: Arc<dyn TransferDecorator>) -> Self {
        self.decorator = Some(decorator);
        self
    }

    pub fn with_special_paths(mut self, special: Arc<SpecialPathManager>) -> Self {
        self.special = special;
        self
    }

    pub fn manager(&self) -> &Arc<PathMappedFileManager> {
        &self.manager
    }

    fn key(resource: &ConcreteResource) -> (&str, &str) {
        (resource.location().name(), resource.path())
    }

    /// Returns `true` when the row was evicted.
    fn evict_if_stale(&self, resource: &ConcreteResource) -> Result<bool> {
        let timeout = resource.cache_timeout_seconds();
        if timeout == 0 {
            return Ok(false);
        }
        let (fs, path) = Self::key(resource);
        let db = self.manager.db();
        if !db.is_file(fs, path)? {
            return Ok(false);
        }
        let Some(created) = db.file_last_modified(fs, path)? else {
            return Ok(false);
        };

        let limit = Duration::from_secs(timeout).max(self.min_cache_timeout);
        let age = Duration::from_millis(now_millis().saturating_sub(created));
        if age <= limit {
            return Ok(false);
        }
        log_cache_debug!(
            "Evicting stale path-mapped file",
            resource = tracing::field::display(resource),
            age_secs = age.as_secs()
        );
        db.delete(fs, path)?;
        Ok(true)
    }

    fn decoratable(&self, resource: &ConcreteResource) -> Option<&Arc<dyn TransferDecorator>> {
        self.decorator
            .as_ref()
            .filter(|_| self.special.is_decoratable(resource.path()))
    }
}

impl CacheProvider for PathMappedCacheProvider {
    fn is_directory(&self, resource: &ConcreteResource) -> Result<bool> {
        let (fs, path) = Self::key(resource);
        Ok(self.manager.db().is_directory(fs, path)?)
    }

    fn is_file(&self, resource: &ConcreteResource) -> Result<bool> {
        if self.evict_if_stale(resource)? {
            return Ok(false);
        }
        let (fs, path) = Self::key(resource);
        Ok(self.manager.db().is_file(fs, path)?)
    }

    #[instrument(skip(self), level = "debug")]
    fn open_input_stream(&self, resource: &ConcreteResource) -> Result<CacheRead> {
        self.locks.wait_for_write_unlock(resource)?;
        if self.evict_if_stale(resource)? {
            return Err(CacheError::NotFound(resource.to_string()));
        }
        let (fs, path) = Self::key(resource);
        let file = self
            .manager
            .open(fs, path)?
            .ok_or_else(|| CacheError::NotFound(resource.to_string()))?;
        let stream: CacheRead = Box::new(file);
        match self.decoratable(resource) {
            Some(d) => Ok(d.decorate_read(stream, resource)?),
            None => Ok(stream),
        }
    }

    #[instrument(skip(self), level = "debug")]
    fn open_output_stream(&self, resource: &ConcreteResource) -> Result<Box<dyn CacheWrite>> {
        if resource.is_root() {
            return Err(CacheError::IsDirectory(resource.to_string()));
        }
        self.locks.lock_write(resource)?;
        let owner = thread::current().id();
        let blob = match self.manager.writer() {
            Ok(blob) => blob,
            Err(e) => {
                self.locks.unlock_write_for(resource, owner);
                return Err(e);
            }
        };

        let writer: Box<dyn CacheWrite> = Box::new(PathMappedWriter {
            blob: Some(blob),
            manager: self.manager.clone(),
            resource: resource.clone(),
            locks: self.locks.clone(),
            owner,
        });
        match self.decoratable(resource) {
            Some(d) => Ok(d.decorate_write(writer, resource)?),
            None => Ok(writer),
        }
    }

    fn exists(&self, resource: &ConcreteResource) -> Result<bool> {
        if self.evict_if_stale(resource)? {
            return Ok(false);
        }
        let (fs, path) = Self::key(resource);
        Ok(self.manager.db().exists(fs, path)?)
    }

    fn copy(&self, from: &ConcreteResource, to: &ConcreteResource) -> Result<()> {
        if from == to {
            return Ok(());
        }
        let _guard = self.locks.write_guard(to)?;
        let (from_fs, from_path) = Self::key(from);
        let (to_fs, to_path) = Self::key(to);
        if !self.manager.db().copy(from_fs, from_path, to_fs, to_path)? {
            return Err(CacheError::NotFound(from.to_string()));
        }
        log_cache_debug!(
            "Copied path-mapped file",
            from = tracing::field::display(from),
            to = tracing::field::display(to)
        );
        Ok(())
    }

    fn delete(&self, resource: &ConcreteResource) -> Result<bool> {
        let _guard = self.locks.write_guard(resource)?;
        let (fs, path) = Self::key(resource);
        Ok(self.manager.db().delete(fs, path)?)
    }

    fn list(&self, resource: &ConcreteResource) -> Result<Vec<String>> {
        let (fs, path) = Self::key(resource);
        Ok(self
            .manager
            .db()
            .list(fs, path)?
            .into_iter()
            .map(|e| e.name)
            .collect())
    }

    fn mkdirs(&self, resource: &ConcreteResource) -> Result<()> {
        let (fs, path) = Self::key(resource);
        Ok(self.manager.db().make_dirs(fs, path)?)
    }

    fn create_file(&self, resource: &ConcreteResource) -> Result<()> {
        if self.exists(resource)? {
            return Ok(());
        }
        self.open_output_stream(resource)?.commit()
    }

    fn create_alias(&self, from: &ConcreteResource, to: &ConcreteResource) -> Result<()> {
        self.copy(from, to)
    }

    fn detached_file(&self, resource: &ConcreteResource) -> Result<Option<PathBuf>> {
        if self.evict_if_stale(resource)? {
            return Ok(None);
        }
        let (fs, path) = Self::key(resource);
        self.manager.physical_path(fs, path)
    }

    fn length(&self, resource: &ConcreteResource) -> Result<Option<u64>> {
        if self.evict_if_stale(resource)? {
            return Ok(None);
        }
        let (fs, path) = Self::key(resource);
        Ok(self.manager.db().file_length(fs, path)?)
    }

    fn last_modified(&self, resource: &ConcreteResource) -> Result<Option<SystemTime>> {
        if self.evict_if_stale(resource)? {
            return Ok(None);
        }
        let (fs, path) = Self::key(resource);
        self.manager.last_modified(fs, path)
    }

    fn file_path(&self, resource: &ConcreteResource) -> Result<Option<PathBuf>> {
        self.detached_file(resource)
    }

    fn lock_read(&self, resource: &ConcreteResource) -> Result<()> {
        self.locks.lock_read(resource)
    }

    fn lock_write(&self, resource: &ConcreteResource) -> Result<()> {
        self.locks.lock_write(resource)
    }

    fn unlock_read(&self, resource: &ConcreteResource) -> bool {
        self.locks.unlock_read(resource)
    }

    fn unlock_write(&self, resource: &ConcreteResource) -> bool {
        self.locks.unlock_write(resource)
    }

    fn is_read_locked(&self, resource: &ConcreteResource) -> bool {
        self.locks.is_read_locked(resource)
    }

    fn is_write_locked(&self, resource: &ConcreteResource) -> bool {
        self.locks.is_write_locked(resource)
    }

    fn wait_for_read_unlock(&self, resource: &ConcreteResource) -> Result<()> {
        self.locks.wait_for_read_unlock(resource)
    }

    fn wait_for_write_unlock(&self, resource: &ConcreteResource) -> Result<()> {
        self.locks.wait_for_write_unlock(resource)
    }

    fn start_reporting(&self) -> Result<()> {
        self.locks.start_reporting(DEFAULT_REPORT_INTERVAL)
    }

    fn stop_reporting(&self) {
        self.locks.stop_reporting();
    }

    fn cleanup_current_thread(&self) {
        self.locks.cleanup_current_thread();
    }
}

/// Streams into the blob store; the path row is written on commit.
struct PathMappedWriter {
    blob: Option<BlobWriter>,
    manager: Arc<PathMappedFileManager>,
    resource: ConcreteResource,
    locks: Arc<LockTable>,
    owner: ThreadId,
}

impl PathMappedWriter {
    fn blob(&mut self) -> io::Result<&mut BlobWriter> {
        self.blob
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "writer already closed"))
    }
}

impl Write for PathMappedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.blob()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.blob()?.flush()
    }
}

impl CacheWrite for PathMappedWriter {
    fn commit(mut self: Box<Self>) -> Result<()> {
        let blob = self.blob.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "writer already closed")
        })?;
        let (fs, path) = PathMappedCacheProvider::key(&self.resource);
        self.manager.commit(fs, path, blob)
    }
}

impl Drop for PathMappedWriter {
    fn drop(&mut self) {
        // Uncommitted staging content is discarded with the blob writer
        drop(self.blob.take());
        self.locks.unlock_write_for(&self.resource, self.owner);
    }
}
