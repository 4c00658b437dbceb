//! Remote transports and the registry that picks one per location.

use std::io::{Read, Write};
use std::sync::Arc;

use depot_cache::{ConcreteResource, Location};

use crate::error::Result;
use crate::pool::JobContext;

/// A remote protocol able to serve some locations.
///
/// Implementations run on transfer workers. They should report the expected
/// size through [`JobContext::set_expected`] when they learn it, and stop
/// promptly once the sink or source starts failing with `TimedOut`.
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    fn handles(&self, location: &Location) -> bool;

    /// Stream the remote content into `sink`. A missing resource is
    /// `Err(TransferError::NotFound)`.
    fn download(&self, ctx: &JobContext, resource: &ConcreteResource, sink: &mut dyn Write) -> Result<()>;

    fn publish(
        &self,
        ctx: &JobContext,
        resource: &ConcreteResource,
        content: &mut dyn Read,
        length: u64,
    ) -> Result<()>;

    /// Child names of a remote directory, or `None` when it does not exist.
    fn list(&self, ctx: &JobContext, resource: &ConcreteResource) -> Result<Option<Vec<String>>>;

    fn exists(&self, ctx: &JobContext, resource: &ConcreteResource) -> Result<bool>;
}

/// Ordered set of transports; the first one that handles a location wins.
#[derive(Default, Clone)]
pub struct TransportManager {
    transports: Vec<Arc<dyn Transport>>,
}

impl TransportManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, transport: Arc<dyn Transport>) {
        self.transports.push(transport);
    }

    pub fn get_transport(&self, location: &Location) -> Option<Arc<dyn Transport>> {
        self.transports.iter().find(|t| t.handles(location)).cloned()
    }

    pub fn transports(&self) -> &[Arc<dyn Transport>] {
        &self.transports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransferError;

    struct Scheme(&'static str);

    impl Transport for Scheme {
        fn name(&self) -> &str {
            self.0
        }

        fn handles(&self, location: &Location) -> bool {
            location.uri().starts_with(self.0)
        }

        fn download(&self, _: &JobContext, r: &ConcreteResource, _: &mut dyn Write) -> Result<()> {
            Err(TransferError::not_found(r))
        }

        fn publish(&self, _: &JobContext, _: &ConcreteResource, _: &mut dyn Read, _: u64) -> Result<()> {
            Ok(())
        }

        fn list(&self, _: &JobContext, _: &ConcreteResource) -> Result<Option<Vec<String>>> {
            Ok(None)
        }

        fn exists(&self, _: &JobContext, _: &ConcreteResource) -> Result<bool> {
            Ok(false)
        }
    }

    #[test]
    fn test_first_matching_transport_wins() {
        let mut manager = TransportManager::new();
        manager.register(Arc::new(Scheme("https")));
        manager.register(Arc::new(Scheme("http")));

        let https = manager.get_transport(&Location::new("a", "https://a")).unwrap();
        assert_eq!(https.name(), "https");
        let http = manager.get_transport(&Location::new("b", "http://b")).unwrap();
        assert_eq!(http.name(), "http");
        assert!(manager.get_transport(&Location::new("c", "file:///c")).is_none());
    }
}
