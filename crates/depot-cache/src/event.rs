//! File events fired by transfers. Delivery is fire-and-forget: managers must not
//! block and cannot fail the operation that fired the event.

use std::sync::{Mutex, PoisonError};

use depot_config::{log_cache_debug, log_cache_warn};

use crate::model::ConcreteResource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Fetched from a remote location
    Download,
    /// Pushed by a client
    Upload,
    /// Produced locally, e.g. merged metadata
    Generate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Access { resource: ConcreteResource },
    Storage { resource: ConcreteResource, kind: StorageKind },
    Deletion { resource: ConcreteResource },
    Error { resource: ConcreteResource, message: String },
    NotFound { resource: ConcreteResource },
}

impl FileEvent {
    pub fn resource(&self) -> &ConcreteResource {
        match self {
            FileEvent::Access { resource }
            | FileEvent::Storage { resource, .. }
            | FileEvent::Deletion { resource }
            | FileEvent::Error { resource, .. }
            | FileEvent::NotFound { resource } => resource,
        }
    }
}

pub trait FileEventManager: Send + Sync {
    fn fire(&self, event: FileEvent);
}

pub struct NoOpFileEventManager;

impl FileEventManager for NoOpFileEventManager {
    fn fire(&self, _event: FileEvent) {}
}

/// Writes every event to the log.
pub struct LoggingFileEventManager;

impl FileEventManager for LoggingFileEventManager {
    fn fire(&self, event: FileEvent) {
        let resource = tracing::field::display(event.resource().clone());
        match &event {
            FileEvent::Access { .. } => log_cache_debug!("File accessed", resource = resource),
            FileEvent::Storage { kind, .. } => {
                log_cache_debug!("File stored", resource = resource, kind = tracing::field::debug(kind))
            }
            FileEvent::Deletion { .. } => log_cache_debug!("File deleted", resource = resource),
            FileEvent::Error { message, .. } => {
                log_cache_warn!("Transfer failed", resource = resource, error = message.as_str())
            }
            FileEvent::NotFound { .. } => log_cache_debug!("File not found", resource = resource),
        }
    }
}

/// Keeps fired events in memory, for callers that inspect them afterwards.
#[derive(Default)]
pub struct CollectingFileEventManager {
    events: Mutex<Vec<FileEvent>>,
}

impl CollectingFileEventManager {
    pub fn events(&self) -> Vec<FileEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl FileEventManager for CollectingFileEventManager {
    fn fire(&self, event: FileEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
