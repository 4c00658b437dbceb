//! Dispatch between a "disposable" and a "safe" provider per resource.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use depot_config::{log_routing_debug, PathMappedStorageConfig};

use crate::error::Result;
use crate::model::{ConcreteResource, Location};
use crate::provider::{CacheProvider, CacheRead, CacheWrite};

/// Decides whether a location's content goes to the disposable provider.
pub trait RouteSelector: Send + Sync {
    fn is_disposable(&self, location: &Location) -> bool;
}

/// Routes the file systems enabled for path-mapped storage.
pub struct PathMappedSubsystemSelector {
    config: PathMappedStorageConfig,
}

impl PathMappedSubsystemSelector {
    pub fn new(config: PathMappedStorageConfig) -> Self {
        Self { config }
    }
}

impl RouteSelector for PathMappedSubsystemSelector {
    fn is_disposable(&self, location: &Location) -> bool {
        self.config.is_subsystem_enabled(location.name())
    }
}

pub struct FnRouteSelector<F>(pub F);

impl<F> RouteSelector for FnRouteSelector<F>
where
    F: Fn(&Location) -> bool + Send + Sync,
{
    fn is_disposable(&self, location: &Location) -> bool {
        (self.0)(location)
    }
}

pub struct RoutingCacheProvider {
    disposable: Option<Arc<dyn CacheProvider>>,
    safe: Arc<dyn CacheProvider>,
    selector: Arc<dyn RouteSelector>,
}

impl RoutingCacheProvider {
    pub fn new(
        disposable: Option<Arc<dyn CacheProvider>>,
        safe: Arc<dyn CacheProvider>,
        selector: Arc<dyn RouteSelector>,
    ) -> Self {
        Self {
            disposable,
            safe,
            selector,
        }
    }

    /// The provider owning `resource`: disposable when configured and selected,
    /// safe otherwise.
    pub fn select(&self, resource: &ConcreteResource) -> &Arc<dyn CacheProvider> {
        match &self.disposable {
            Some(disposable) if self.selector.is_disposable(resource.location()) => disposable,
            _ => &self.safe,
        }
    }

    fn providers(&self) -> impl Iterator<Item = &Arc<dyn CacheProvider>> {
        std::iter::once(&self.safe).chain(self.disposable.iter())
    }

    fn stream_across(
        from_provider: &dyn CacheProvider,
        from: &ConcreteResource,
        to_provider: &dyn CacheProvider,
        to: &ConcreteResource,
    ) -> Result<()> {
        let mut input: CacheRead = from_provider.open_input_stream(from)?;
        let mut output = to_provider.open_output_stream(to)?;
        io::copy(&mut input, &mut output)?;
        output.commit()
    }
}

impl CacheProvider for RoutingCacheProvider {
    fn is_directory(&self, resource: &ConcreteResource) -> Result<bool> {
        self.select(resource).is_directory(resource)
    }

    fn is_file(&self, resource: &ConcreteResource) -> Result<bool> {
        self.select(resource).is_file(resource)
    }

    fn open_input_stream(&self, resource: &ConcreteResource) -> Result<CacheRead> {
        self.select(resource).open_input_stream(resource)
    }

    fn open_output_stream(&self, resource: &ConcreteResource) -> Result<Box<dyn CacheWrite>> {
        self.select(resource).open_output_stream(resource)
    }

    fn exists(&self, resource: &ConcreteResource) -> Result<bool> {
        self.select(resource).exists(resource)
    }

    fn copy(&self, from: &ConcreteResource, to: &ConcreteResource) -> Result<()> {
        let (src, dst) = (self.select(from), self.select(to));
        if Arc::ptr_eq(src, dst) {
            return src.copy(from, to);
        }
        log_routing_debug!(
            "Streaming copy across providers",
            from = tracing::field::display(from),
            to = tracing::field::display(to)
        );
        Self::stream_across(src.as_ref(), from, dst.as_ref(), to)
    }

    fn delete(&self, resource: &ConcreteResource) -> Result<bool> {
        self.select(resource).delete(resource)
    }

    fn list(&self, resource: &ConcreteResource) -> Result<Vec<String>> {
        self.select(resource).list(resource)
    }

    fn mkdirs(&self, resource: &ConcreteResource) -> Result<()> {
        self.select(resource).mkdirs(resource)
    }

    fn create_file(&self, resource: &ConcreteResource) -> Result<()> {
        self.select(resource).create_file(resource)
    }

    fn create_alias(&self, from: &ConcreteResource, to: &ConcreteResource) -> Result<()> {
        let (src, dst) = (self.select(from), self.select(to));
        if Arc::ptr_eq(src, dst) {
            return src.create_alias(from, to);
        }
        Self::stream_across(src.as_ref(), from, dst.as_ref(), to)
    }

    fn detached_file(&self, resource: &ConcreteResource) -> Result<Option<PathBuf>> {
        self.select(resource).detached_file(resource)
    }

    fn length(&self, resource: &ConcreteResource) -> Result<Option<u64>> {
        self.select(resource).length(resource)
    }

    fn last_modified(&self, resource: &ConcreteResource) -> Result<Option<SystemTime>> {
        self.select(resource).last_modified(resource)
    }

    fn file_path(&self, resource: &ConcreteResource) -> Result<Option<PathBuf>> {
        self.select(resource).file_path(resource)
    }

    fn lock_read(&self, resource: &ConcreteResource) -> Result<()> {
        self.select(resource).lock_read(resource)
    }

    fn lock_write(&self, resource: &ConcreteResource) -> Result<()> {
        self.select(resource).lock_write(resource)
    }

    fn unlock_read(&self, resource: &ConcreteResource) -> bool {
        self.select(resource).unlock_read(resource)
    }

    fn unlock_write(&self, resource: &ConcreteResource) -> bool {
        self.select(resource).unlock_write(resource)
    }

    fn is_read_locked(&self, resource: &ConcreteResource) -> bool {
        self.select(resource).is_read_locked(resource)
    }

    fn is_write_locked(&self, resource: &ConcreteResource) -> bool {
        self.select(resource).is_write_locked(resource)
    }

    fn wait_for_read_unlock(&self, resource: &ConcreteResource) -> Result<()> {
        self.select(resource).wait_for_read_unlock(resource)
    }

    fn wait_for_write_unlock(&self, resource: &ConcreteResource) -> Result<()> {
        self.select(resource).wait_for_write_unlock(resource)
    }

    fn start_reporting(&self) -> Result<()> {
        for provider in self.providers() {
            provider.start_reporting()?;
        }
        Ok(())
    }

    fn stop_reporting(&self) {
        self.providers().for_each(|p| p.stop_reporting());
    }

    fn cleanup_current_thread(&self) {
        self.providers().for_each(|p| p.cleanup_current_thread());
    }

    fn clear_transfer_cache(&self) {
        self.providers().for_each(|p| p.clear_transfer_cache());
    }
}
