//! Time-boxed remote existence checks and directory listings.

use std::sync::Arc;

use depot_cache::ConcreteResource;
use depot_config::TransportManagerConfig;

use crate::error::Result;
use crate::pool::{JobContext, WorkerPool};
use crate::transport::Transport;

pub struct ExistenceHandler {
    pool: Arc<WorkerPool>,
    config: TransportManagerConfig,
}

impl ExistenceHandler {
    pub fn new(pool: Arc<WorkerPool>, config: TransportManagerConfig) -> Self {
        Self { pool, config }
    }

    pub fn exists(&self, resource: &ConcreteResource, transport: Arc<dyn Transport>) -> Result<bool> {
        let target = resource.clone();
        self.pool
            .submit(resource, move |ctx: &JobContext| transport.exists(ctx, &target))
            .wait_scaled(&self.config, resource, Some(0))?
    }
}

pub struct ListingHandler {
    pool: Arc<WorkerPool>,
    config: TransportManagerConfig,
}

impl ListingHandler {
    pub fn new(pool: Arc<WorkerPool>, config: TransportManagerConfig) -> Self {
        Self { pool, config }
    }

    /// Remote child names, or `None` when the remote directory does not exist.
    pub fn list(
        &self,
        resource: &ConcreteResource,
        transport: Arc<dyn Transport>,
    ) -> Result<Option<Vec<String>>> {
        let target = resource.clone();
        self.pool
            .submit(resource, move |ctx: &JobContext| transport.list(ctx, &target))
            .wait_scaled(&self.config, resource, Some(0))?
    }
}
