//! # depot-cache
//!
//! Cache providers for Depot.
//!
//! - [`FileCacheProvider`]: plain files under a cache root, atomic shadow writes,
//!   staleness eviction
//! - [`PathMappedCacheProvider`]: logical tree over deduplicated blobs with
//!   reference counting and grace-period GC
//! - [`RoutingCacheProvider`]: per-location dispatch between the two
//!
//! All providers share the [`CacheProvider`] contract and its per-resource
//! [`LockTable`] discipline. [`Transfer`] wraps a resource and its provider for
//! callers, firing [`FileEvent`]s as content is read, stored and deleted.

pub mod decorator;
pub mod error;
pub mod event;
pub mod file;
pub mod lock;
pub mod model;
pub mod path_gen;
pub mod pathmapped;
pub mod provider;
pub mod routing;
mod signal;
pub mod special;
pub mod transfer;

pub use decorator::{NoOpTransferDecorator, TransferDecorator};
pub use error::{CacheError, Result};
pub use event::{
    CollectingFileEventManager, FileEvent, FileEventManager, LoggingFileEventManager,
    NoOpFileEventManager, StorageKind,
};
pub use file::FileCacheProvider;
pub use lock::{LockReport, LockTable};
pub use model::{ConcreteResource, Location, LocationBuilder, VirtualResource, CACHE_TIMEOUT_SECONDS};
pub use path_gen::{HashedLocationPathGenerator, LocationNamePathGenerator, PathGenerator};
pub use pathmapped::{GcReport, PathMappedCacheProvider, PathMappedFileManager};
pub use provider::{CacheProvider, CacheRead, CacheWrite};
pub use routing::{FnRouteSelector, PathMappedSubsystemSelector, RouteSelector, RoutingCacheProvider};
pub use special::{PathMatcher, SpecialPathInfo, SpecialPathManager};
pub use transfer::Transfer;
