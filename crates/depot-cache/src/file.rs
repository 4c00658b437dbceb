//! Plain filesystem cache provider.
//!
//! A resource lives at `<cache_root>/<PathGenerator output>`. Writes land in a
//! `.to-download` shadow next to the final file and are renamed into place on
//! commit, under the resource's write lock. Stale files are renamed to a
//! `.to-delete` shadow before removal so readers never see half-deleted content.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, SystemTime};

use depot_cas::{strategy_for, LinkStrategy};
use depot_config::{log_cache_debug, CacheStorageConfig};
use tracing::instrument;

use crate::decorator::TransferDecorator;
use crate::error::{CacheError, Result};
use crate::lock::LockTable;
use crate::model::ConcreteResource;
use crate::path_gen::{HashedLocationPathGenerator, PathGenerator};
use crate::provider::{CacheProvider, CacheRead, CacheWrite};
use crate::special::SpecialPathManager;

pub const DOWNLOAD_SUFFIX: &str = ".to-download";
pub const DELETE_SUFFIX: &str = ".to-delete";

const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Whether a file name is one of the provider's in-flight shadows.
pub fn is_shadow_name(name: &str) -> bool {
    name.ends_with(DOWNLOAD_SUFFIX) || name.ends_with(DELETE_SUFFIX)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

pub struct FileCacheProvider {
    root: PathBuf,
    generator: Box<dyn PathGenerator>,
    link: &'static dyn LinkStrategy,
    min_cache_timeout: Duration,
    locks: Arc<LockTable>,
    special: Arc<SpecialPathManager>,
    decorator: Option<Arc<dyn TransferDecorator>>,
    report_interval: Duration,
}

impl FileCacheProvider {
    /// Provider rooted at `config.cache_root`, laid out by [`HashedLocationPathGenerator`].
    pub fn new(config: &CacheStorageConfig) -> Result<Self> {
        fs::create_dir_all(&config.cache_root)?;
        Ok(Self {
            root: config.cache_root.clone(),
            generator: Box::new(HashedLocationPathGenerator),
            link: strategy_for(config.alias_links_enabled),
            min_cache_timeout: config.min_cache_timeout(),
            locks: Arc::new(LockTable::new(config.lock_timeout())),
            special: Arc::new(SpecialPathManager::default()),
            decorator: None,
            report_interval: DEFAULT_REPORT_INTERVAL,
        })
    }

    pub fn with_generator(mut self, generator: impl PathGenerator + 'static) -> Self {
        self.generator = Box::new(generator);
        self
    }

    pub fn with_decorator(mut self, decorator: Arc<dyn TransferDecorator>) -> Self {
        self.decorator = Some(decorator);
        self
    }

    pub fn with_special_paths(mut self, special: Arc<SpecialPathManager>) -> Self {
        self.special = special;
        self
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn locks(&self) -> &Arc<LockTable> {
        &self.locks
    }

    fn resolve(&self, resource: &ConcreteResource) -> PathBuf {
        self.root.join(self.generator.file_path(resource))
    }

    fn is_hidden(resource: &ConcreteResource) -> bool {
        is_shadow_name(resource.name())
    }

    /// Evict `path` if the resource's cache timeout has elapsed. Returns `true`
    /// when the file was (or already had been) evicted.
    fn evict_if_stale(&self, resource: &ConcreteResource, path: &Path) -> Result<bool> {
        let timeout = resource.cache_timeout_seconds();
        if timeout == 0 {
            return Ok(false);
        }

        let meta = match fs::metadata(path) {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Ok(false),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let limit = Duration::from_secs(timeout).max(self.min_cache_timeout);
        let age = SystemTime::now()
            .duration_since(meta.modified()?)
            .unwrap_or(Duration::ZERO);
        if age <= limit {
            return Ok(false);
        }

        log_cache_debug!(
            "Evicting stale cached file",
            resource = tracing::field::display(resource),
            age_secs = age.as_secs()
        );
        let doomed = with_suffix(path, DELETE_SUFFIX);
        match fs::rename(path, &doomed) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        }
        match fs::remove_file(&doomed) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    /// Physical path of fresh content, if any.
    fn fresh_path(&self, resource: &ConcreteResource) -> Result<Option<PathBuf>> {
        if Self::is_hidden(resource) {
            return Ok(None);
        }
        let path = self.resolve(resource);
        if self.evict_if_stale(resource, &path)? {
            return Ok(None);
        }
        Ok(path.exists().then_some(path))
    }

    fn decorate_read(&self, resource: &ConcreteResource, stream: CacheRead) -> Result<CacheRead> {
        match &self.decorator {
            Some(d) if self.special.is_decoratable(resource.path()) => {
                Ok(d.decorate_read(stream, resource)?)
            }
            _ => Ok(stream),
        }
    }

    fn decorate_write(
        &self,
        resource: &ConcreteResource,
        stream: Box<dyn CacheWrite>,
    ) -> Result<Box<dyn CacheWrite>> {
        match &self.decorator {
            Some(d) if self.special.is_decoratable(resource.path()) => {
                Ok(d.decorate_write(stream, resource)?)
            }
            _ => Ok(stream),
        }
    }

    fn remove_file(path: &Path) -> Result<()> {
        let doomed = with_suffix(path, DELETE_SUFFIX);
        fs::rename(path, &doomed)?;
        fs::remove_file(&doomed)?;
        Ok(())
    }
}

impl CacheProvider for FileCacheProvider {
    fn is_directory(&self, resource: &ConcreteResource) -> Result<bool> {
        Ok(!Self::is_hidden(resource) && self.resolve(resource).is_dir())
    }

    fn is_file(&self, resource: &ConcreteResource) -> Result<bool> {
        Ok(self.fresh_path(resource)?.is_some_and(|p| p.is_file()))
    }

    #[instrument(skip(self), level = "debug")]
    fn open_input_stream(&self, resource: &ConcreteResource) -> Result<CacheRead> {
        self.locks.wait_for_write_unlock(resource)?;
        let path = self
            .fresh_path(resource)?
            .ok_or_else(|| CacheError::NotFound(resource.to_string()))?;
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CacheError::NotFound(resource.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        self.decorate_read(resource, Box::new(file))
    }

    #[instrument(skip(self), level = "debug")]
    fn open_output_stream(&self, resource: &ConcreteResource) -> Result<Box<dyn CacheWrite>> {
        if Self::is_hidden(resource) {
            return Err(CacheError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("reserved file name: {}", resource),
            )));
        }

        self.locks.lock_write(resource)?;
        let owner = thread::current().id();
        let target = self.resolve(resource);
        let shadow = with_suffix(&target, DOWNLOAD_SUFFIX);

        let opened = target
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| File::create(&shadow));
        let file = match opened {
            Ok(file) => file,
            Err(e) => {
                self.locks.unlock_write_for(resource, owner);
                return Err(e.into());
            }
        };

        let writer = FileCacheWriter {
            out: Some(BufWriter::new(file)),
            shadow,
            target,
            resource: resource.clone(),
            locks: self.locks.clone(),
            owner,
            committed: false,
        };
        self.decorate_write(resource, Box::new(writer))
    }

    fn exists(&self, resource: &ConcreteResource) -> Result<bool> {
        Ok(self.fresh_path(resource)?.is_some())
    }

    fn copy(&self, from: &ConcreteResource, to: &ConcreteResource) -> Result<()> {
        if from == to {
            return Ok(());
        }
        let mut input = self.open_input_stream(from)?;
        let mut output = self.open_output_stream(to)?;
        io::copy(&mut input, &mut output)?;
        output.commit()
    }

    fn delete(&self, resource: &ConcreteResource) -> Result<bool> {
        if Self::is_hidden(resource) {
            return Ok(false);
        }
        let _guard = self.locks.write_guard(resource)?;
        let path = self.resolve(resource);

        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        if meta.is_dir() {
            if fs::read_dir(&path)?.next().is_some() {
                return Ok(false);
            }
            fs::remove_dir(&path)?;
        } else {
            Self::remove_file(&path)?;
        }
        Ok(true)
    }

    fn list(&self, resource: &ConcreteResource) -> Result<Vec<String>> {
        let path = self.resolve(resource);
        if !path.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&path)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if !is_shadow_name(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn mkdirs(&self, resource: &ConcreteResource) -> Result<()> {
        fs::create_dir_all(self.resolve(resource))?;
        Ok(())
    }

    fn create_file(&self, resource: &ConcreteResource) -> Result<()> {
        let _guard = self.locks.write_guard(resource)?;
        let path = self.resolve(resource);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(())
    }

    fn create_alias(&self, from: &ConcreteResource, to: &ConcreteResource) -> Result<()> {
        if from == to {
            return Ok(());
        }
        let source = self
            .fresh_path(from)?
            .filter(|p| p.is_file())
            .ok_or_else(|| CacheError::NotFound(from.to_string()))?;

        let _guard = self.locks.write_guard(to)?;
        let target = self.resolve(to);
        match fs::remove_file(&target) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        self.link.link_file(&source, &target)?;
        log_cache_debug!(
            "Created alias",
            from = tracing::field::display(from),
            to = tracing::field::display(to),
            strategy = self.link.name()
        );
        Ok(())
    }

    fn detached_file(&self, resource: &ConcreteResource) -> Result<Option<PathBuf>> {
        Ok(self.fresh_path(resource)?.filter(|p| p.is_file()))
    }

    fn length(&self, resource: &ConcreteResource) -> Result<Option<u64>> {
        match self.detached_file(resource)? {
            Some(path) => Ok(Some(fs::metadata(path)?.len())),
            None => Ok(None),
        }
    }

    fn last_modified(&self, resource: &ConcreteResource) -> Result<Option<SystemTime>> {
        match self.fresh_path(resource)? {
            Some(path) => Ok(Some(fs::metadata(path)?.modified()?)),
            None => Ok(None),
        }
    }

    fn file_path(&self, resource: &ConcreteResource) -> Result<Option<PathBuf>> {
        Ok(Some(self.resolve(resource)))
    }

    fn lock_read(&self, resource: &ConcreteResource) -> Result<()> {
        self.locks.lock_read(resource)
    }

    fn lock_write(&self, resource: &ConcreteResource) -> Result<()> {
        self.locks.lock_write(resource)
    }

    fn unlock_read(&self, resource: &ConcreteResource) -> bool {
        self.locks.unlock_read(resource)
    }

    fn unlock_write(&self, resource: &ConcreteResource) -> bool {
        self.locks.unlock_write(resource)
    }

    fn is_read_locked(&self, resource: &ConcreteResource) -> bool {
        self.locks.is_read_locked(resource)
    }

    fn is_write_locked(&self, resource: &ConcreteResource) -> bool {
        self.locks.is_write_locked(resource)
    }

    fn wait_for_read_unlock(&self, resource: &ConcreteResource) -> Result<()> {
        self.locks.wait_for_read_unlock(resource)
    }

    fn wait_for_write_unlock(&self, resource: &ConcreteResource) -> Result<()> {
        self.locks.wait_for_write_unlock(resource)
    }

    fn start_reporting(&self) -> Result<()> {
        self.locks.start_reporting(self.report_interval)
    }

    fn stop_reporting(&self) {
        self.locks.stop_reporting();
    }

    fn cleanup_current_thread(&self) {
        self.locks.cleanup_current_thread();
    }
}

/// Writer onto a `.to-download` shadow, renamed into place on commit.
struct FileCacheWriter {
    out: Option<BufWriter<File>>,
    shadow: PathBuf,
    target: PathBuf,
    resource: ConcreteResource,
    locks: Arc<LockTable>,
    owner: ThreadId,
    committed: bool,
}

impl FileCacheWriter {
    fn out(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.out
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "writer already closed"))
    }
}

impl Write for FileCacheWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.out()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out()?.flush()
    }
}

impl CacheWrite for FileCacheWriter {
    fn commit(mut self: Box<Self>) -> Result<()> {
        let out = self.out.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "writer already closed")
        })?;
        let file = out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.shadow, &self.target)?;
        self.committed = true;
        log_cache_debug!("Committed cached file", resource = tracing::field::display(&self.resource));
        Ok(())
    }
}

impl Drop for FileCacheWriter {
    fn drop(&mut self) {
        drop(self.out.take());
        if !self.committed {
            let _ = fs::remove_file(&self.shadow);
        }
        self.locks.unlock_write_for(&self.resource, self.owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Location, CACHE_TIMEOUT_SECONDS};
    use crate::path_gen::LocationNamePathGenerator;
    use std::io::Read;
    use tempfile::TempDir;

    fn provider(temp: &TempDir) -> FileCacheProvider {
        let config = CacheStorageConfig {
            cache_root: temp.path().join("cache"),
            ..Default::default()
        };
        FileCacheProvider::new(&config).unwrap()
    }

    fn res(path: &str) -> ConcreteResource {
        ConcreteResource::new(Location::new("central", "https://repo1"), path)
    }

    fn write(p: &FileCacheProvider, r: &ConcreteResource, content: &[u8]) {
        let mut out = p.open_output_stream(r).unwrap();
        out.write_all(content).unwrap();
        out.commit().unwrap();
    }

    fn read(p: &FileCacheProvider, r: &ConcreteResource) -> Vec<u8> {
        let mut buf = Vec::new();
        p.open_input_stream(r).unwrap().read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_write_is_invisible_until_commit() {
        let temp = TempDir::new().unwrap();
        let p = provider(&temp);
        let r = res("/org/foo/foo-1.0.jar");

        let mut out = p.open_output_stream(&r).unwrap();
        out.write_all(b"partial").unwrap();
        assert!(!p.exists(&r).unwrap());
        assert!(p.is_write_locked(&r));

        let shadow = with_suffix(&p.file_path(&r).unwrap().unwrap(), DOWNLOAD_SUFFIX);
        assert!(shadow.exists());
        assert!(p.list(&r.parent().unwrap()).unwrap().is_empty());

        out.commit().unwrap();
        assert!(!shadow.exists());
        assert!(!p.is_write_locked(&r));
        assert_eq!(read(&p, &r), b"partial");
        assert_eq!(p.length(&r).unwrap(), Some(7));
    }

    #[test]
    fn test_dropped_writer_discards() {
        let temp = TempDir::new().unwrap();
        let p = provider(&temp);
        let r = res("/a.jar");
        write(&p, &r, b"original");

        let mut out = p.open_output_stream(&r).unwrap();
        out.write_all(b"replacement").unwrap();
        drop(out);

        assert!(!p.is_write_locked(&r));
        assert_eq!(read(&p, &r), b"original");
        assert_eq!(p.list(&res("/")).unwrap(), vec!["a.jar"]);
    }

    #[test]
    fn test_stale_file_is_evicted() {
        let temp = TempDir::new().unwrap();
        let p = provider(&temp);
        let loc = Location::builder("central", "https://repo1")
            .attribute(CACHE_TIMEOUT_SECONDS, "120")
            .build();
        let r = ConcreteResource::new(loc, "/org/maven-metadata.xml");
        write(&p, &r, b"<metadata/>");
        assert!(p.exists(&r).unwrap());

        let path = p.file_path(&r).unwrap().unwrap();
        let old = SystemTime::now() - Duration::from_secs(600);
        filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(old)).unwrap();

        assert!(!p.exists(&r).unwrap());
        assert!(!path.exists());
        assert!(!with_suffix(&path, DELETE_SUFFIX).exists());
        assert!(matches!(p.open_input_stream(&r), Err(CacheError::NotFound(_))));
    }

    #[test]
    fn test_min_cache_timeout_applies() {
        let temp = TempDir::new().unwrap();
        let p = provider(&temp);
        let loc = Location::builder("central", "https://repo1")
            .attribute(CACHE_TIMEOUT_SECONDS, "1")
            .build();
        let r = ConcreteResource::new(loc, "/a");
        write(&p, &r, b"x");

        // Ten seconds old: past the attribute, inside the 60 second floor
        let path = p.file_path(&r).unwrap().unwrap();
        let old = SystemTime::now() - Duration::from_secs(10);
        filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(old)).unwrap();
        assert!(p.exists(&r).unwrap());
    }

    #[test]
    fn test_no_timeout_never_stale() {
        let temp = TempDir::new().unwrap();
        let p = provider(&temp);
        let r = res("/a");
        write(&p, &r, b"x");
        let path = p.file_path(&r).unwrap().unwrap();
        let old = SystemTime::now() - Duration::from_secs(86_400 * 365);
        filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(old)).unwrap();
        assert!(p.is_file(&r).unwrap());
    }

    #[test]
    fn test_copy_alias_delete() {
        let temp = TempDir::new().unwrap();
        let p = provider(&temp);
        let a = res("/a/one.jar");
        let b = res("/b/two.jar");
        let c = res("/c/three.jar");
        write(&p, &a, b"content");

        p.copy(&a, &b).unwrap();
        p.create_alias(&a, &c).unwrap();
        assert_eq!(read(&p, &b), b"content");
        assert_eq!(read(&p, &c), b"content");

        assert!(p.delete(&a).unwrap());
        assert!(!p.delete(&a).unwrap());
        assert_eq!(read(&p, &c), b"content");

        // Non-empty directory is kept
        assert!(!p.delete(&res("/b")).unwrap());
        assert!(p.delete(&b).unwrap());
        assert!(p.delete(&res("/b")).unwrap());

        assert!(matches!(
            p.create_alias(&res("/missing"), &res("/x")),
            Err(CacheError::NotFound(_))
        ));
    }

    #[test]
    fn test_mkdirs_create_file_list() {
        let temp = TempDir::new().unwrap();
        let p = provider(&temp);
        p.mkdirs(&res("/d/e")).unwrap();
        p.create_file(&res("/d/f.txt")).unwrap();
        p.create_file(&res("/d/f.txt")).unwrap();

        assert!(p.is_directory(&res("/d/e")).unwrap());
        assert_eq!(p.length(&res("/d/f.txt")).unwrap(), Some(0));
        assert_eq!(p.list(&res("/d")).unwrap(), vec!["e", "f.txt"]);
        assert!(p.list(&res("/d/f.txt")).unwrap().is_empty());
        assert!(p.last_modified(&res("/d/f.txt")).unwrap().is_some());
        assert!(p.last_modified(&res("/nope")).unwrap().is_none());
    }

    #[test]
    fn test_reader_waits_for_writer() {
        let temp = TempDir::new().unwrap();
        let p = Arc::new(provider(&temp));
        let r = res("/slow.jar");

        let mut out = p.open_output_stream(&r).unwrap();
        out.write_all(b"full content").unwrap();

        let reader = {
            let p = p.clone();
            let r = r.clone();
            thread::spawn(move || read(&p, &r))
        };
        thread::sleep(Duration::from_millis(50));
        out.commit().unwrap();

        assert_eq!(reader.join().unwrap(), b"full content");
    }

    struct CountingGenerator(Arc<std::sync::atomic::AtomicUsize>);

    impl PathGenerator for CountingGenerator {
        fn file_path(&self, resource: &ConcreteResource) -> PathBuf {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            LocationNamePathGenerator.file_path(resource)
        }
    }

    #[test]
    fn test_paths_are_derived_per_call() {
        let temp = TempDir::new().unwrap();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let p = provider(&temp).with_generator(CountingGenerator(calls.clone()));

        for i in 0..3 {
            let r = res(&format!("/many/{}.jar", i));
            assert!(!p.exists(&r).unwrap());
            assert!(!p.exists(&r).unwrap());
        }
        // Nothing is memoised per resource
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 6);
        assert_eq!(
            p.file_path(&res("/a.jar")).unwrap().unwrap(),
            temp.path().join("cache").join("central").join("a.jar")
        );
    }
}
