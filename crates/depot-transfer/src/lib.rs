//! Depot transfer coordination.
//!
//! [`TransferManager`] answers resource requests from the cache when it can and
//! otherwise runs remote jobs on a bounded worker pool:
//!
//! - downloads are single-flight per resource, and every joiner sees the one result
//! - a remote "not found" is remembered in the [`NotFoundCache`]
//! - waits are time-boxed, with extra periods for large transfers

pub mod download;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod nfc;
pub mod pool;
pub mod query;
pub mod transport;
pub mod upload;

pub use download::DownloadHandler;
pub use error::{Result, TransferError, TransferErrorKind};
pub use manager::{Retrieval, RetrievalState, TransferManager, TransferManagerBuilder};
pub use metrics::{NoTransportMetrics, StaticTransportMetrics, TransportMetricConfig};
pub use nfc::{MemoryNotFoundCache, NotFoundCache};
pub use pool::{JobContext, JobHandle, ProgressReader, ProgressWriter, WorkerPool};
pub use query::{ExistenceHandler, ListingHandler};
pub use transport::{Transport, TransportManager};
pub use upload::UploadHandler;
