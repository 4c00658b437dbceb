//! Handle on the cached bytes of one resource.

use std::fmt;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::Result;
use crate::event::{FileEvent, FileEventManager, StorageKind};
use crate::model::{ConcreteResource, Location};
use crate::provider::{CacheProvider, CacheRead, CacheWrite};

/// Cached content of one resource, bound to the provider that holds it.
/// Reads fire `Access`, committed writes fire `Storage`, deletions fire `Deletion`.
#[derive(Clone)]
pub struct Transfer {
    resource: ConcreteResource,
    provider: Arc<dyn CacheProvider>,
    events: Arc<dyn FileEventManager>,
}

impl Transfer {
    pub fn new(
        resource: ConcreteResource,
        provider: Arc<dyn CacheProvider>,
        events: Arc<dyn FileEventManager>,
    ) -> Self {
        Self {
            resource,
            provider,
            events,
        }
    }

    pub fn resource(&self) -> &ConcreteResource {
        &self.resource
    }

    pub fn location(&self) -> &Location {
        self.resource.location()
    }

    pub fn path(&self) -> &str {
        self.resource.path()
    }

    pub fn provider(&self) -> &Arc<dyn CacheProvider> {
        &self.provider
    }

    pub fn exists(&self) -> Result<bool> {
        self.provider.exists(&self.resource)
    }

    pub fn is_directory(&self) -> Result<bool> {
        self.provider.is_directory(&self.resource)
    }

    pub fn is_file(&self) -> Result<bool> {
        self.provider.is_file(&self.resource)
    }

    pub fn list(&self) -> Result<Vec<String>> {
        self.provider.list(&self.resource)
    }

    pub fn open_input_stream(&self) -> Result<CacheRead> {
        let stream = self.provider.open_input_stream(&self.resource)?;
        self.events.fire(FileEvent::Access {
            resource: self.resource.clone(),
        });
        Ok(stream)
    }

    /// Read the whole content.
    pub fn read_to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.open_input_stream()?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    pub fn open_output_stream(&self, kind: StorageKind) -> Result<Box<dyn CacheWrite>> {
        let inner = self.provider.open_output_stream(&self.resource)?;
        Ok(Box::new(EventingWriter {
            inner,
            resource: self.resource.clone(),
            events: self.events.clone(),
            kind,
        }))
    }

    /// Replace the content with `content` in one committed write.
    pub fn write_all(&self, content: &[u8], kind: StorageKind) -> Result<()> {
        let mut out = self.open_output_stream(kind)?;
        out.write_all(content)?;
        out.commit()
    }

    pub fn delete(&self) -> Result<bool> {
        let deleted = self.provider.delete(&self.resource)?;
        if deleted {
            self.events.fire(FileEvent::Deletion {
                resource: self.resource.clone(),
            });
        }
        Ok(deleted)
    }

    pub fn length(&self) -> Result<Option<u64>> {
        self.provider.length(&self.resource)
    }

    pub fn last_modified(&self) -> Result<Option<SystemTime>> {
        self.provider.last_modified(&self.resource)
    }

    pub fn detached_file(&self) -> Result<Option<PathBuf>> {
        self.provider.detached_file(&self.resource)
    }

    pub fn mkdirs(&self) -> Result<()> {
        self.provider.mkdirs(&self.resource)
    }

    pub fn create_file(&self) -> Result<()> {
        self.provider.create_file(&self.resource)
    }

    pub fn parent(&self) -> Option<Transfer> {
        self.resource.parent().map(|r| self.sibling(r))
    }

    pub fn child(&self, name: &str) -> Transfer {
        self.sibling(self.resource.child(name))
    }

    fn sibling(&self, resource: ConcreteResource) -> Transfer {
        Transfer::new(resource, self.provider.clone(), self.events.clone())
    }

    /// Make this resource carry the content of `source`.
    pub fn copy_from(&self, source: &Transfer) -> Result<()> {
        if Arc::ptr_eq(&self.provider, &source.provider) {
            self.provider.copy(&source.resource, &self.resource)?;
            self.events.fire(FileEvent::Storage {
                resource: self.resource.clone(),
                kind: StorageKind::Generate,
            });
            return Ok(());
        }
        let mut input = source.provider.open_input_stream(&source.resource)?;
        let mut output = self.open_output_stream(StorageKind::Generate)?;
        io::copy(&mut input, &mut output)?;
        output.commit()
    }

    pub fn lock_read(&self) -> Result<()> {
        self.provider.lock_read(&self.resource)
    }

    pub fn lock_write(&self) -> Result<()> {
        self.provider.lock_write(&self.resource)
    }

    pub fn unlock_read(&self) -> bool {
        self.provider.unlock_read(&self.resource)
    }

    pub fn unlock_write(&self) -> bool {
        self.provider.unlock_write(&self.resource)
    }

    pub fn is_read_locked(&self) -> bool {
        self.provider.is_read_locked(&self.resource)
    }

    pub fn is_write_locked(&self) -> bool {
        self.provider.is_write_locked(&self.resource)
    }
}

impl fmt::Display for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.resource, f)
    }
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Transfer").field(&self.resource).finish()
    }
}

struct EventingWriter {
    inner: Box<dyn CacheWrite>,
    resource: ConcreteResource,
    events: Arc<dyn FileEventManager>,
    kind: StorageKind,
}

impl Write for EventingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl CacheWrite for EventingWriter {
    fn commit(self: Box<Self>) -> Result<()> {
        let EventingWriter {
            inner,
            resource,
            events,
            kind,
        } = *self;
        inner.commit()?;
        events.fire(FileEvent::Storage { resource, kind });
        Ok(())
    }
}
