use std::io::Read;
use std::sync::Arc;

use depot_cache::ConcreteResource;
use depot_config::{log_transfer_debug, TransportManagerConfig};

use crate::error::Result;
use crate::pool::{JobContext, ProgressReader, WorkerPool};
use crate::transport::Transport;

/// Publishes content to remote locations. Every publish is its own job; the
/// caller's wait is scaled by the known content length.
pub struct UploadHandler {
    pool: Arc<WorkerPool>,
    config: TransportManagerConfig,
}

impl UploadHandler {
    pub fn new(pool: Arc<WorkerPool>, config: TransportManagerConfig) -> Self {
        Self { pool, config }
    }

    pub fn upload(
        &self,
        resource: &ConcreteResource,
        mut content: Box<dyn Read + Send>,
        length: u64,
        transport: Arc<dyn Transport>,
    ) -> Result<()> {
        let target = resource.clone();
        let handle = self.pool.submit(resource, move |ctx: &JobContext| {
            ctx.set_expected(length);
            let mut source = ProgressReader::new(&mut *content, ctx);
            transport.publish(ctx, &target, &mut source, length)
        });
        handle.wait_scaled(&self.config, resource, Some(length))??;
        log_transfer_debug!(
            "Published",
            resource = tracing::field::display(resource),
            bytes = length
        );
        Ok(())
    }
}
