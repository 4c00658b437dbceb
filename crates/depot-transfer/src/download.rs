//! Single-flight downloads: concurrent requests for one resource share one
//! remote fetch and observe the same result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use depot_cache::{ConcreteResource, FileEvent, FileEventManager, StorageKind, Transfer};
use depot_config::{log_transfer_debug, log_transfer_warn, TransportManagerConfig};

use crate::error::{Result, TransferError, TransferErrorKind};
use crate::nfc::NotFoundCache;
use crate::pool::{JobContext, JobHandle, ProgressWriter, WorkerPool};
use crate::transport::Transport;

/// `Ok(true)` when the content was downloaded into the cache, `Ok(false)`
/// when the remote confirmed the resource does not exist.
type DownloadJob = JobHandle<Result<bool>>;
type InFlight = Arc<Mutex<HashMap<ConcreteResource, DownloadJob>>>;

/// Removes the job's in-flight entry and releases the worker thread's locks,
/// whether the job returns or unwinds.
struct InFlightEntry {
    in_flight: InFlight,
    target: Transfer,
    id: u64,
}

impl Drop for InFlightEntry {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let resource = self.target.resource();
        if in_flight.get(resource).map(|h| h.id()) == Some(self.id) {
            in_flight.remove(resource);
        }
        drop(in_flight);
        self.target.provider().cleanup_current_thread();
    }
}

pub struct DownloadHandler {
    pool: Arc<WorkerPool>,
    config: TransportManagerConfig,
    not_found: Arc<dyn NotFoundCache>,
    events: Arc<dyn FileEventManager>,
    in_flight: InFlight,
}

impl DownloadHandler {
    /// A confirmed 404 is recorded in `not_found` and announced on `events`
    /// once per fetch, however many callers joined it.
    pub fn new(
        pool: Arc<WorkerPool>,
        config: TransportManagerConfig,
        not_found: Arc<dyn NotFoundCache>,
        events: Arc<dyn FileEventManager>,
    ) -> Self {
        Self {
            pool,
            config,
            not_found,
            events,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<ConcreteResource, DownloadJob>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_downloading(&self, resource: &ConcreteResource) -> bool {
        self.in_flight().contains_key(resource)
    }

    /// Fetch `target` through `transport` unless a fetch is already running,
    /// in which case join it.
    pub fn download(&self, target: &Transfer, transport: Arc<dyn Transport>) -> Result<bool> {
        let resource = target.resource();
        let handle = {
            let mut in_flight = self.in_flight();
            match in_flight.get(resource) {
                Some(handle) => {
                    log_transfer_debug!(
                        "Joining in-flight download",
                        resource = tracing::field::display(resource)
                    );
                    handle.clone()
                }
                None => {
                    // A fetch that finished since the caller's cache check has
                    // already committed its content.
                    if target.exists().map_err(|e| TransferError::cache(resource, e))? {
                        return Ok(true);
                    }
                    let handle = self.spawn(target.clone(), transport);
                    in_flight.insert(resource.clone(), handle.clone());
                    handle
                }
            }
        };
        handle.wait_scaled(&self.config, resource, None)?
    }

    fn spawn(&self, target: Transfer, transport: Arc<dyn Transport>) -> DownloadJob {
        let in_flight = self.in_flight.clone();
        let not_found = self.not_found.clone();
        let events = self.events.clone();
        let resource = target.resource().clone();
        self.pool.submit(&resource, move |ctx: &JobContext| {
            let _entry = InFlightEntry {
                in_flight,
                target: target.clone(),
                id: ctx.id(),
            };
            let result = fetch(ctx, &target, transport.as_ref());
            if let Ok(false) = result {
                not_found.add_missing(target.resource());
                events.fire(FileEvent::NotFound {
                    resource: target.resource().clone(),
                });
            }
            result
        })
    }
}

fn fetch(ctx: &JobContext, target: &Transfer, transport: &dyn Transport) -> Result<bool> {
    let resource = target.resource();
    log_transfer_debug!(
        "Downloading",
        resource = tracing::field::display(resource),
        transport = transport.name()
    );
    let mut out = target
        .open_output_stream(StorageKind::Download)
        .map_err(|e| TransferError::cache(resource, e))?;
    let outcome = {
        let mut sink = ProgressWriter::new(&mut *out, ctx);
        transport.download(ctx, resource, &mut sink)
    };

    if ctx.is_cancelled() {
        // Dropping the writer discards the partial content
        drop(out);
        log_transfer_warn!(
            "Download cancelled",
            resource = tracing::field::display(resource),
            transferred = ctx.transferred()
        );
        return Err(TransferError::timeout(resource, ctx.elapsed()));
    }

    match outcome {
        Ok(()) => {
            out.commit().map_err(|e| TransferError::cache(resource, e))?;
            log_transfer_debug!(
                "Download complete",
                resource = tracing::field::display(resource),
                bytes = ctx.transferred()
            );
            Ok(true)
        }
        Err(e) if e.kind() == TransferErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
