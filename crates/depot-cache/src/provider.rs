//! The contract every cache backend implements.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::SystemTime;

use crate::error::Result;
use crate::model::ConcreteResource;

/// Read side of a cached file.
pub type CacheRead = Box<dyn Read + Send>;

/// Write side of a cached file.
///
/// Content becomes visible at the final path only on [`commit`](CacheWrite::commit).
/// Dropping an uncommitted writer discards everything written and releases the
/// resource's write lock.
pub trait CacheWrite: Write + Send {
    fn commit(self: Box<Self>) -> Result<()>;
}

/// A store of cached resource content.
///
/// Writers and readers of the same resource are mutually exclusive within one
/// provider instance; resources never block each other.
pub trait CacheProvider: Send + Sync {
    fn is_directory(&self, resource: &ConcreteResource) -> Result<bool>;

    fn is_file(&self, resource: &ConcreteResource) -> Result<bool>;

    /// Wait for any writer of `resource` to finish, then open it.
    fn open_input_stream(&self, resource: &ConcreteResource) -> Result<CacheRead>;

    /// Take the write lock of `resource` and open a writer onto a shadow file.
    fn open_output_stream(&self, resource: &ConcreteResource) -> Result<Box<dyn CacheWrite>>;

    fn exists(&self, resource: &ConcreteResource) -> Result<bool>;

    /// Make `to` carry the content of `from`.
    fn copy(&self, from: &ConcreteResource, to: &ConcreteResource) -> Result<()>;

    /// Returns `false` if nothing was deleted.
    fn delete(&self, resource: &ConcreteResource) -> Result<bool>;

    /// Child names of a directory, sorted. Empty if `resource` is not a directory.
    fn list(&self, resource: &ConcreteResource) -> Result<Vec<String>>;

    fn mkdirs(&self, resource: &ConcreteResource) -> Result<()>;

    /// Create an empty file if none exists.
    fn create_file(&self, resource: &ConcreteResource) -> Result<()>;

    /// Make `to` an alias of `from`, sharing storage where the backend can.
    fn create_alias(&self, from: &ConcreteResource, to: &ConcreteResource) -> Result<()>;

    /// Physical file holding fresh content of `resource`, if there is one.
    fn detached_file(&self, resource: &ConcreteResource) -> Result<Option<PathBuf>>;

    fn length(&self, resource: &ConcreteResource) -> Result<Option<u64>>;

    fn last_modified(&self, resource: &ConcreteResource) -> Result<Option<SystemTime>>;

    /// Where `resource` is or would be stored on disk, when the backend knows.
    fn file_path(&self, resource: &ConcreteResource) -> Result<Option<PathBuf>>;

    fn lock_read(&self, resource: &ConcreteResource) -> Result<()>;

    fn lock_write(&self, resource: &ConcreteResource) -> Result<()>;

    fn unlock_read(&self, resource: &ConcreteResource) -> bool;

    fn unlock_write(&self, resource: &ConcreteResource) -> bool;

    fn is_read_locked(&self, resource: &ConcreteResource) -> bool;

    fn is_write_locked(&self, resource: &ConcreteResource) -> bool;

    fn wait_for_read_unlock(&self, resource: &ConcreteResource) -> Result<()>;

    fn wait_for_write_unlock(&self, resource: &ConcreteResource) -> Result<()>;

    /// Begin periodic reporting of held locks.
    fn start_reporting(&self) -> Result<()> {
        Ok(())
    }

    fn stop_reporting(&self) {}

    /// Release locks still owned by the calling thread.
    fn cleanup_current_thread(&self) {}

    /// Forget any per-resource state cached in memory.
    fn clear_transfer_cache(&self) {}
}
