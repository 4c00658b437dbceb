//! Stream wrapping hook, e.g. for checksum generation while content flows.

use std::io;

use crate::model::ConcreteResource;
use crate::provider::{CacheRead, CacheWrite};

pub trait TransferDecorator: Send + Sync {
    fn decorate_read(&self, stream: CacheRead, _resource: &ConcreteResource) -> io::Result<CacheRead> {
        Ok(stream)
    }

    fn decorate_write(
        &self,
        stream: Box<dyn CacheWrite>,
        _resource: &ConcreteResource,
    ) -> io::Result<Box<dyn CacheWrite>> {
        Ok(stream)
    }
}

pub struct NoOpTransferDecorator;

impl TransferDecorator for NoOpTransferDecorator {}
