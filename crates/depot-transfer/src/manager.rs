//! Entry point for callers: consults the not-found cache and the cache provider
//! before falling back to a remote transport, and writes results back through
//! the same provider.

use std::io::{self, Read};
use std::sync::Arc;

use depot_cache::file::is_shadow_name;
use depot_cache::{
    CacheProvider, ConcreteResource, FileEvent, FileEventManager, NoOpFileEventManager,
    SpecialPathManager, StorageKind, Transfer, VirtualResource,
};
use depot_config::{log_transfer_debug, log_transfer_warn, Config, TransportManagerConfig};

use crate::download::DownloadHandler;
use crate::error::{Result, TransferError};
use crate::metrics::{timed, NoTransportMetrics, TransportMetricConfig};
use crate::nfc::{MemoryNotFoundCache, NotFoundCache};
use crate::pool::WorkerPool;
use crate::query::{ExistenceHandler, ListingHandler};
use crate::transport::{Transport, TransportManager};
use crate::upload::UploadHandler;

/// How a retrieval ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalState {
    /// Path is not retrievable, or the location does not allow downloads
    Skipped,
    /// The not-found cache already knows the resource is missing
    KnownMissing,
    CacheHit,
    NoTransport,
    Downloaded,
    /// The remote reported the resource missing; now recorded
    ConfirmedMissing,
    Failed,
}

#[derive(Debug)]
pub struct Retrieval {
    pub state: RetrievalState,
    pub transfer: Option<Transfer>,
    pub error: Option<TransferError>,
}

impl Retrieval {
    fn done(state: RetrievalState, transfer: Option<Transfer>) -> Self {
        Self {
            state,
            transfer,
            error: None,
        }
    }

    fn failed(error: TransferError) -> Self {
        Self {
            state: RetrievalState::Failed,
            transfer: None,
            error: Some(error),
        }
    }

    pub fn into_result(self) -> Result<Option<Transfer>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.transfer),
        }
    }
}

pub struct TransferManagerBuilder {
    cache: Arc<dyn CacheProvider>,
    transports: TransportManager,
    not_found: Option<Arc<dyn NotFoundCache>>,
    events: Arc<dyn FileEventManager>,
    special_paths: SpecialPathManager,
    config: TransportManagerConfig,
    metrics: Arc<dyn TransportMetricConfig>,
}

impl TransferManagerBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.register(transport);
        self
    }

    pub fn not_found_cache(mut self, cache: Arc<dyn NotFoundCache>) -> Self {
        self.not_found = Some(cache);
        self
    }

    pub fn events(mut self, events: Arc<dyn FileEventManager>) -> Self {
        self.events = events;
        self
    }

    pub fn special_paths(mut self, special_paths: SpecialPathManager) -> Self {
        self.special_paths = special_paths;
        self
    }

    pub fn config(mut self, config: TransportManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Take the transport settings and a not-found cache from loaded config.
    pub fn settings(self, settings: &Config) -> Self {
        self.config(settings.transport.clone())
            .not_found_cache(Arc::new(MemoryNotFoundCache::new(&settings.not_found)))
    }

    pub fn metrics(mut self, metrics: Arc<dyn TransportMetricConfig>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> Result<TransferManager> {
        let pool = Arc::new(WorkerPool::new(self.config.worker_threads())?);
        log_transfer_debug!("Transfer workers started", threads = pool.threads());
        let not_found = self
            .not_found
            .unwrap_or_else(|| Arc::new(MemoryNotFoundCache::default()));
        Ok(TransferManager {
            downloads: DownloadHandler::new(
                pool.clone(),
                self.config.clone(),
                not_found.clone(),
                self.events.clone(),
            ),
            uploads: UploadHandler::new(pool.clone(), self.config.clone()),
            existence: ExistenceHandler::new(pool.clone(), self.config.clone()),
            listing: ListingHandler::new(pool, self.config.clone()),
            cache: self.cache,
            transports: self.transports,
            not_found,
            events: self.events,
            special_paths: self.special_paths,
            config: self.config,
            metrics: self.metrics,
        })
    }
}

pub struct TransferManager {
    cache: Arc<dyn CacheProvider>,
    transports: TransportManager,
    not_found: Arc<dyn NotFoundCache>,
    events: Arc<dyn FileEventManager>,
    special_paths: SpecialPathManager,
    config: TransportManagerConfig,
    metrics: Arc<dyn TransportMetricConfig>,
    downloads: DownloadHandler,
    uploads: UploadHandler,
    existence: ExistenceHandler,
    listing: ListingHandler,
}

impl TransferManager {
    pub fn builder(cache: Arc<dyn CacheProvider>) -> TransferManagerBuilder {
        TransferManagerBuilder {
            cache,
            transports: TransportManager::new(),
            not_found: None,
            events: Arc::new(NoOpFileEventManager),
            special_paths: SpecialPathManager::default(),
            config: TransportManagerConfig::default(),
            metrics: Arc::new(NoTransportMetrics),
        }
    }

    pub fn cache(&self) -> &Arc<dyn CacheProvider> {
        &self.cache
    }

    pub fn not_found_cache(&self) -> &Arc<dyn NotFoundCache> {
        &self.not_found
    }

    pub fn transports(&self) -> &TransportManager {
        &self.transports
    }

    pub fn special_paths(&self) -> &SpecialPathManager {
        &self.special_paths
    }

    pub fn config(&self) -> &TransportManagerConfig {
        &self.config
    }

    /// Handle on the cached copy of `resource`, without any remote lookup.
    pub fn cache_reference(&self, resource: &ConcreteResource) -> Transfer {
        Transfer::new(resource.clone(), self.cache.clone(), self.events.clone())
    }

    /// Cached content of `resource`, downloading it first when needed.
    /// `Ok(None)` means the resource is missing or cannot be fetched here.
    pub fn retrieve(&self, resource: &ConcreteResource) -> Result<Option<Transfer>> {
        self.retrieve_detailed(resource).into_result()
    }

    pub fn retrieve_detailed(&self, resource: &ConcreteResource) -> Retrieval {
        let location = resource.location();
        if !self.special_paths.is_retrievable(resource.path()) || !location.allows_downloading() {
            return Retrieval::done(RetrievalState::Skipped, None);
        }
        if self.not_found.is_missing(resource) {
            log_transfer_debug!("Known missing", resource = tracing::field::display(resource));
            return Retrieval::done(RetrievalState::KnownMissing, None);
        }

        let target = self.cache_reference(resource);
        match target.exists() {
            Ok(true) => return Retrieval::done(RetrievalState::CacheHit, Some(target)),
            Ok(false) => {}
            Err(e) => return self.fail(resource, TransferError::cache(resource, e)),
        }

        let Some(transport) = self.transports.get_transport(location) else {
            return Retrieval::done(RetrievalState::NoTransport, None);
        };
        let outcome = timed(self.metrics.as_ref(), location, "download", || {
            self.downloads.download(&target, transport)
        });
        match outcome {
            Ok(true) => Retrieval::done(RetrievalState::Downloaded, Some(target)),
            // The owning download job already recorded the miss
            Ok(false) => Retrieval::done(RetrievalState::ConfirmedMissing, None),
            Err(e) => self.fail(resource, e),
        }
    }

    /// First resource of `resources` that can be retrieved. Failures are
    /// skipped; the first one is returned only if nothing was found.
    pub fn retrieve_first(&self, resources: &VirtualResource) -> Result<Option<Transfer>> {
        let mut first_error = None;
        for resource in resources {
            match self.retrieve(resource) {
                Ok(Some(transfer)) => return Ok(Some(transfer)),
                Ok(None) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(None), Err)
    }

    /// Every retrievable resource of `resources`, in order.
    pub fn retrieve_all(&self, resources: &VirtualResource) -> Result<Vec<Transfer>> {
        let mut found = Vec::new();
        let mut first_error = None;
        for resource in resources {
            match self.retrieve(resource) {
                Ok(Some(transfer)) => found.push(transfer),
                Ok(None) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) if found.is_empty() => Err(e),
            _ => Ok(found),
        }
    }

    pub fn exists(&self, resource: &ConcreteResource) -> Result<bool> {
        if self.not_found.is_missing(resource) {
            return Ok(false);
        }
        if self.cache_reference(resource).exists().map_err(|e| TransferError::cache(resource, e))? {
            return Ok(true);
        }
        let location = resource.location();
        if !location.allows_downloading() {
            return Ok(false);
        }
        let Some(transport) = self.transports.get_transport(location) else {
            return Ok(false);
        };
        let found = timed(self.metrics.as_ref(), location, "exists", || {
            self.existence.exists(resource, transport)
        })?;
        if !found {
            self.not_found.add_missing(resource);
        }
        Ok(found)
    }

    /// Children of `resource`: the cached listing merged with the remote one.
    pub fn list(&self, resource: &ConcreteResource) -> Result<Vec<String>> {
        let target = self.cache_reference(resource);
        let mut names = if target.is_directory().map_err(|e| TransferError::cache(resource, e))? {
            target.list().map_err(|e| TransferError::cache(resource, e))?
        } else {
            Vec::new()
        };

        let location = resource.location();
        if location.allows_downloading() {
            if let Some(transport) = self.transports.get_transport(location) {
                let remote = timed(self.metrics.as_ref(), location, "list", || {
                    self.listing.list(resource, transport)
                })?;
                names.extend(remote.into_iter().flatten());
            }
        }

        let mut names: Vec<String> = names
            .into_iter()
            .map(|name| name.trim_end_matches('/').to_string())
            .filter(|name| !name.is_empty() && !is_shadow_name(name))
            .filter(|name| self.special_paths.is_listable(resource.child(name).path()))
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Write `content` into the cache only. Clears any not-found record.
    pub fn store(&self, resource: &ConcreteResource, content: &mut dyn Read) -> Result<Transfer> {
        if !resource.location().allows_storing() {
            return Err(TransferError::location(resource, "storing is not allowed"));
        }
        let target = self.cache_reference(resource);
        let mut out = target
            .open_output_stream(StorageKind::Upload)
            .map_err(|e| TransferError::cache(resource, e))?;
        io::copy(content, &mut out).map_err(|e| TransferError::io(resource, e))?;
        out.commit().map_err(|e| TransferError::cache(resource, e))?;
        self.not_found.clear_missing(resource);
        Ok(target)
    }

    /// Upload `content` to the resource's remote location.
    pub fn publish(
        &self,
        resource: &ConcreteResource,
        content: Box<dyn Read + Send>,
        length: u64,
    ) -> Result<()> {
        let location = resource.location();
        if !location.allows_publishing() {
            return Err(TransferError::location(resource, "publishing is not allowed"));
        }
        let Some(transport) = self.transports.get_transport(location) else {
            return Err(TransferError::location(resource, "no transport handles this location"));
        };
        let outcome = timed(self.metrics.as_ref(), location, "publish", || {
            self.uploads.upload(resource, content, length, transport)
        });
        match outcome {
            Ok(()) => {
                self.not_found.clear_missing(resource);
                Ok(())
            }
            Err(e) => {
                self.fire_error(resource, &e);
                Err(e)
            }
        }
    }

    pub fn delete(&self, resource: &ConcreteResource) -> Result<bool> {
        if !resource.location().allows_deletion() {
            return Err(TransferError::location(resource, "deletion is not allowed"));
        }
        self.cache_reference(resource)
            .delete()
            .map_err(|e| TransferError::cache(resource, e))
    }

    fn fail(&self, resource: &ConcreteResource, error: TransferError) -> Retrieval {
        self.fire_error(resource, &error);
        Retrieval::failed(error)
    }

    fn fire_error(&self, resource: &ConcreteResource, error: &TransferError) {
        log_transfer_warn!(
            "Transfer failed",
            resource = tracing::field::display(resource),
            error = tracing::field::display(error)
        );
        self.events.fire(FileEvent::Error {
            resource: resource.clone(),
            message: error.to_string(),
        });
    }
}
