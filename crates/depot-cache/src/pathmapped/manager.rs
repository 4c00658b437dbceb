use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use depot_cas::{BlobWriter, PhysicalStore};
use depot_config::{log_gc_debug, log_gc_info, log_gc_warn, PathMappedStorageConfig};
use depot_pathdb::{now_millis, FileMeta, PathDb};

use crate::error::{CacheError, Result};
use crate::signal::{StopSignal, Worker};

const MIN_GC_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of one GC sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Reclaim rows past the grace period
    pub examined: usize,
    /// Blobs physically deleted
    pub deleted: usize,
    /// Rows whose blob was referenced again before the sweep
    pub rescued: usize,
    /// Rows whose deletion failed; retried next sweep
    pub failed: usize,
}

/// Logical tree + physical blobs + deferred garbage collection.
pub struct PathMappedFileManager {
    db: Arc<dyn PathDb>,
    store: PhysicalStore,
    config: PathMappedStorageConfig,
    gc_worker: Mutex<Option<Worker>>,
}

impl PathMappedFileManager {
    pub fn new(config: PathMappedStorageConfig, db: Arc<dyn PathDb>, store: PhysicalStore) -> Self {
        Self {
            db,
            store,
            config,
            gc_worker: Mutex::new(None),
        }
    }

    pub fn db(&self) -> &dyn PathDb {
        self.db.as_ref()
    }

    pub fn store(&self) -> &PhysicalStore {
        &self.store
    }

    pub fn config(&self) -> &PathMappedStorageConfig {
        &self.config
    }

    /// Open the blob behind a file path.
    pub fn open(&self, file_system: &str, path: &str) -> Result<Option<File>> {
        match self.db.storage_file(file_system, path)? {
            Some(locator) => Ok(Some(self.store.open(&locator)?)),
            None => Ok(None),
        }
    }

    /// Physical path of the blob behind a file path.
    pub fn physical_path(&self, file_system: &str, path: &str) -> Result<Option<PathBuf>> {
        match self.db.storage_file(file_system, path)? {
            Some(locator) => Ok(Some(self.store.blob_path(&locator)?)),
            None => Ok(None),
        }
    }

    pub fn writer(&self) -> Result<BlobWriter> {
        Ok(self.store.writer()?)
    }

    /// Publish a finished blob and point `path` at it. If the path row cannot
    /// be written the blob is queued for GC unless another path shares it.
    pub fn commit(&self, file_system: &str, path: &str, writer: BlobWriter) -> Result<()> {
        let blob = writer.finish()?;
        let meta = FileMeta {
            file_id: blob.file_id,
            size: blob.size,
            creation: now_millis(),
            storage: blob.storage,
        };
        if let Err(e) = self.db.insert(file_system, path, &meta) {
            match self.db.queue_reclaim(&meta.file_id, &meta.storage) {
                Ok(queued) => log_gc_debug!(
                    "Path insert failed after blob publish",
                    file_id = meta.file_id.as_str(),
                    queued = queued
                ),
                Err(queue_err) => log_gc_warn!(
                    "Could not queue unreferenced blob",
                    file_id = meta.file_id.as_str(),
                    error = tracing::field::display(&queue_err)
                ),
            }
            return Err(e.into());
        }
        Ok(())
    }

    pub fn last_modified(&self, file_system: &str, path: &str) -> Result<Option<SystemTime>> {
        Ok(self
            .db
            .file_last_modified(file_system, path)?
            .map(|ms| UNIX_EPOCH + Duration::from_millis(ms)))
    }

    /// Run one sweep now.
    pub fn gc(&self) -> Result<GcReport> {
        let grace = self.config.gc_grace_period().as_millis() as u64;
        self.sweep(now_millis().saturating_sub(grace))
    }

    fn sweep(&self, cutoff: u64) -> Result<GcReport> {
        let mut report = GcReport::default();
        let orphans = self.db.list_orphaned_files(cutoff, self.config.gc_batch_size)?;

        for reclaim in orphans {
            report.examined += 1;

            // A racing insert or copy may have re-referenced the blob
            match self.db.reverse_map(&reclaim.file_id) {
                Ok(refs) if !refs.is_empty() => {
                    log_gc_debug!("Blob referenced again, keeping", file_id = reclaim.file_id.as_str());
                    report.rescued += 1;
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    log_gc_warn!("Reverse map lookup failed", file_id = reclaim.file_id.as_str(), error = tracing::field::display(&e));
                    report.failed += 1;
                    continue;
                }
            }

            let deleted = self
                .store
                .delete(&reclaim.storage)
                .map_err(CacheError::from)
                .and_then(|_| Ok(self.db.remove_from_reclaim(&reclaim)?));
            match deleted {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    log_gc_warn!("Blob deletion failed", file_id = reclaim.file_id.as_str(), error = tracing::field::display(&e));
                    report.failed += 1;
                }
            }
        }

        if report.examined > 0 {
            log_gc_info!(
                "Sweep finished",
                examined = report.examined as u64,
                deleted = report.deleted as u64,
                rescued = report.rescued as u64,
                failed = report.failed as u64
            );
        }
        Ok(report)
    }

    /// Sweep every `gc_interval` on a background thread until [`stop_gc`](Self::stop_gc)
    /// or until the manager is dropped.
    pub fn start_gc(self: &Arc<Self>) -> Result<()> {
        let mut worker = self.gc_worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.is_some() {
            return Ok(());
        }

        let signal = Arc::new(StopSignal::default());
        let stop = signal.clone();
        let manager = Arc::downgrade(self);
        let interval = self.config.gc_interval().max(MIN_GC_INTERVAL);
        let thread = thread::Builder::new()
            .name("depot-gc".to_string())
            .spawn(move || {
                while !stop.wait_timeout(interval) {
                    let Some(manager) = manager.upgrade() else {
                        return;
                    };
                    if let Err(e) = manager.gc() {
                        log_gc_warn!("Sweep failed", error = tracing::field::display(&e));
                    }
                }
            })?;

        *worker = Some(Worker { signal, thread });
        Ok(())
    }

    pub fn stop_gc(&self) {
        let worker = self
            .gc_worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            worker.shutdown();
        }
    }
}

impl Drop for PathMappedFileManager {
    fn drop(&mut self) {
        if let Some(worker) = self
            .gc_worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            worker.signal.stop();
        }
    }
}
