use std::io;
use std::sync::Arc;
use std::time::Duration;

use depot_cache::{CacheError, ConcreteResource};
use thiserror::Error;

/// Transfer failures. Cloneable so every joiner of a single-flight download
/// observes the same error.
#[derive(Error, Debug, Clone)]
pub enum TransferError {
    #[error("Location {location} refused the operation: {message}")]
    Location { location: String, message: String },

    #[error("Timed out after {waited:?} transferring {resource}")]
    Timeout { resource: String, waited: Duration },

    #[error("Invalid content for {resource}: {message}")]
    Content { resource: String, message: String },

    #[error("Bad gateway (HTTP {status}) for {resource}")]
    BadGateway { resource: String, status: u16 },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Transfer of {resource} failed: {message}")]
    Generic { resource: String, message: String },

    #[error("Cache failure for {resource}: {source}")]
    Cache {
        resource: String,
        #[source]
        source: Arc<CacheError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferErrorKind {
    Location,
    Timeout,
    Content,
    BadGateway,
    NotFound,
    Generic,
    Cache,
}

impl TransferError {
    pub fn kind(&self) -> TransferErrorKind {
        match self {
            TransferError::Location { .. } => TransferErrorKind::Location,
            TransferError::Timeout { .. } => TransferErrorKind::Timeout,
            TransferError::Content { .. } => TransferErrorKind::Content,
            TransferError::BadGateway { .. } => TransferErrorKind::BadGateway,
            TransferError::NotFound { .. } => TransferErrorKind::NotFound,
            TransferError::Generic { .. } => TransferErrorKind::Generic,
            TransferError::Cache { .. } => TransferErrorKind::Cache,
        }
    }

    pub fn location(resource: &ConcreteResource, message: impl Into<String>) -> Self {
        TransferError::Location {
            location: resource.location().name().to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(resource: &ConcreteResource) -> Self {
        TransferError::NotFound {
            resource: resource.to_string(),
        }
    }

    pub fn timeout(resource: &ConcreteResource, waited: Duration) -> Self {
        TransferError::Timeout {
            resource: resource.to_string(),
            waited,
        }
    }

    pub fn generic(resource: &ConcreteResource, message: impl Into<String>) -> Self {
        TransferError::Generic {
            resource: resource.to_string(),
            message: message.into(),
        }
    }

    pub fn cache(resource: &ConcreteResource, source: CacheError) -> Self {
        TransferError::Cache {
            resource: resource.to_string(),
            source: Arc::new(source),
        }
    }

    /// Wrap an I/O failure from a transport stream.
    pub fn io(resource: &ConcreteResource, error: io::Error) -> Self {
        Self::generic(resource, error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
