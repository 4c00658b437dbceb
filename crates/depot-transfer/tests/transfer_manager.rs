//! TransferManager against a scripted in-memory remote.

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, SystemTime};

use depot_cache::{
    CacheProvider, CollectingFileEventManager, ConcreteResource, FileCacheProvider, FileEvent,
    Location, PathMappedCacheProvider, PathMappedFileManager, VirtualResource,
    CACHE_TIMEOUT_SECONDS,
};
use depot_cas::PhysicalStore;
use depot_config::{CacheStorageConfig, Config, PathMappedStorageConfig, TransportManagerConfig};
use depot_pathdb::{now_millis, FileMeta, MemoryPathDb};
use depot_transfer::{
    JobContext, NotFoundCache, RetrievalState, TransferError, TransferErrorKind, TransferManager,
    Transport,
};
use filetime::FileTime;
use tempfile::TempDir;

#[derive(Default)]
struct FakeRemote {
    files: Mutex<HashMap<String, Vec<u8>>>,
    listings: Mutex<HashMap<String, Vec<String>>>,
    published: Mutex<HashMap<String, Vec<u8>>>,
    downloads: AtomicUsize,
    delay: Duration,
}

impl FakeRemote {
    fn with_file(self, path: &str, content: &[u8]) -> Self {
        self.files.lock().unwrap().insert(path.to_string(), content.to_vec());
        self
    }

    fn with_listing(self, path: &str, names: &[&str]) -> Self {
        let names = names.iter().map(|n| n.to_string()).collect();
        self.listings.lock().unwrap().insert(path.to_string(), names);
        self
    }

    fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

impl Transport for FakeRemote {
    fn name(&self) -> &str {
        "fake"
    }

    fn handles(&self, location: &Location) -> bool {
        location.uri().starts_with("https://")
    }

    fn download(&self, ctx: &JobContext, r: &ConcreteResource, sink: &mut dyn Write) -> depot_transfer::Result<()> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        let content = self.files.lock().unwrap().get(r.path()).cloned();
        let Some(content) = content else {
            return Err(TransferError::not_found(r));
        };
        ctx.set_expected(content.len() as u64);
        sink.write_all(&content).map_err(|e| TransferError::io(r, e))
    }

    fn publish(
        &self,
        _: &JobContext,
        r: &ConcreteResource,
        content: &mut dyn Read,
        _: u64,
    ) -> depot_transfer::Result<()> {
        let mut buf = Vec::new();
        content.read_to_end(&mut buf).map_err(|e| TransferError::io(r, e))?;
        self.published.lock().unwrap().insert(r.path().to_string(), buf);
        Ok(())
    }

    fn list(&self, _: &JobContext, r: &ConcreteResource) -> depot_transfer::Result<Option<Vec<String>>> {
        Ok(self.listings.lock().unwrap().get(r.path()).cloned())
    }

    fn exists(&self, _: &JobContext, r: &ConcreteResource) -> depot_transfer::Result<bool> {
        Ok(self.files.lock().unwrap().contains_key(r.path()))
    }
}

fn file_cache(temp: &TempDir) -> Arc<FileCacheProvider> {
    Arc::new(
        FileCacheProvider::new(&CacheStorageConfig {
            cache_root: temp.path().join("cache"),
            min_cache_timeout_seconds: 0,
            ..Default::default()
        })
        .unwrap(),
    )
}

fn central() -> Location {
    Location::builder("central", "https://repo.example/central")
        .timeout_seconds(10)
        .build()
}

fn at(location: &Location, path: &str) -> ConcreteResource {
    ConcreteResource::new(location.clone(), path)
}

#[test]
fn test_concurrent_retrieves_download_once() {
    let temp = TempDir::new().unwrap();
    let store = PhysicalStore::new(temp.path().join("store")).unwrap();
    let pm = Arc::new(PathMappedFileManager::new(
        PathMappedStorageConfig::default(),
        Arc::new(MemoryPathDb::new()),
        store,
    ));
    let remote = Arc::new(FakeRemote {
        delay: Duration::from_millis(200),
        ..Default::default()
    }
    .with_file("/org/lib/1.0/lib-1.0.jar", b"the one true jar"));
    let manager = Arc::new(
        TransferManager::builder(Arc::new(PathMappedCacheProvider::new(pm, None)))
            .transport(remote.clone())
            .build()
            .unwrap(),
    );

    let callers = 8;
    let barrier = Arc::new(Barrier::new(callers));
    let resource = at(&central(), "/org/lib/1.0/lib-1.0.jar");
    let threads: Vec<_> = (0..callers)
        .map(|_| {
            let manager = manager.clone();
            let barrier = barrier.clone();
            let resource = resource.clone();
            thread::spawn(move || {
                barrier.wait();
                let transfer = manager.retrieve(&resource).unwrap().unwrap();
                transfer.read_to_vec().unwrap()
            })
        })
        .collect();

    for t in threads {
        assert_eq!(t.join().unwrap(), b"the one true jar");
    }
    assert_eq!(remote.downloads(), 1);
    assert_eq!(
        manager.retrieve_detailed(&resource).state,
        RetrievalState::CacheHit
    );
}

#[test]
fn test_remote_404_is_remembered() {
    let temp = TempDir::new().unwrap();
    let remote = Arc::new(FakeRemote::default());
    let events = Arc::new(CollectingFileEventManager::default());
    let manager = TransferManager::builder(file_cache(&temp))
        .transport(remote.clone())
        .events(events.clone())
        .build()
        .unwrap();
    let resource = at(&central(), "/missing.pom");

    let first = manager.retrieve_detailed(&resource);
    assert_eq!(first.state, RetrievalState::ConfirmedMissing);
    assert!(first.transfer.is_none());
    assert!(manager.not_found_cache().is_missing(&resource));
    assert!(matches!(events.events().as_slice(), [FileEvent::NotFound { .. }]));

    assert_eq!(
        manager.retrieve_detailed(&resource).state,
        RetrievalState::KnownMissing
    );
    assert!(manager.retrieve(&resource).unwrap().is_none());
    assert_eq!(remote.downloads(), 1);

    // Storing locally clears the record
    manager
        .store(&resource, &mut Cursor::new(b"<project/>".to_vec()))
        .unwrap();
    assert!(!manager.not_found_cache().is_missing(&resource));
    assert_eq!(
        manager.retrieve_detailed(&resource).state,
        RetrievalState::CacheHit
    );
}

#[test]
fn test_timeout_is_not_cached_as_missing() {
    let temp = TempDir::new().unwrap();
    let remote = Arc::new(FakeRemote {
        delay: Duration::from_millis(300),
        ..Default::default()
    }
    .with_file("/slow.jar", b"slow"));
    let events = Arc::new(CollectingFileEventManager::default());
    let manager = TransferManager::builder(file_cache(&temp))
        .transport(remote.clone())
        .events(events.clone())
        .config(TransportManagerConfig {
            timeout_overextension_factor: 0.05,
            ..Default::default()
        })
        .build()
        .unwrap();
    let location = Location::builder("central", "https://slow").timeout_seconds(1).build();
    let resource = at(&location, "/slow.jar");

    let retrieval = manager.retrieve_detailed(&resource);
    assert_eq!(retrieval.state, RetrievalState::Failed);
    assert_eq!(retrieval.error.unwrap().kind(), TransferErrorKind::Timeout);
    assert!(!manager.not_found_cache().is_missing(&resource));
    assert!(matches!(events.events().as_slice(), [FileEvent::Error { .. }]));

    // Let the cancelled job finish, then check nothing partial was cached
    thread::sleep(Duration::from_millis(400));
    assert!(!manager.cache_reference(&resource).exists().unwrap());
}

#[test]
fn test_stale_content_is_fetched_again() {
    let temp = TempDir::new().unwrap();
    let cache = file_cache(&temp);
    let remote = Arc::new(FakeRemote::default().with_file("/maven-metadata.xml", b"<metadata/>"));
    let manager = TransferManager::builder(cache.clone())
        .transport(remote.clone())
        .build()
        .unwrap();
    let location = Location::builder("central", "https://c")
        .attribute(CACHE_TIMEOUT_SECONDS, "60")
        .build();
    let resource = at(&location, "/maven-metadata.xml");

    assert_eq!(manager.retrieve_detailed(&resource).state, RetrievalState::Downloaded);
    assert_eq!(manager.retrieve_detailed(&resource).state, RetrievalState::CacheHit);
    assert_eq!(remote.downloads(), 1);

    let path = cache.file_path(&resource).unwrap().unwrap();
    let hour_ago = SystemTime::now() - Duration::from_secs(3600);
    filetime::set_file_mtime(&path, FileTime::from_system_time(hour_ago)).unwrap();

    assert_eq!(manager.retrieve_detailed(&resource).state, RetrievalState::Downloaded);
    assert_eq!(remote.downloads(), 2);
}

#[test]
fn test_stale_path_mapped_content_is_fetched_again() {
    let temp = TempDir::new().unwrap();
    let store = PhysicalStore::new(temp.path().join("store")).unwrap();
    let pm = Arc::new(PathMappedFileManager::new(
        PathMappedStorageConfig::default(),
        Arc::new(MemoryPathDb::new()),
        store,
    ));
    let cache = PathMappedCacheProvider::new(pm.clone(), None).with_min_cache_timeout(Duration::ZERO);
    let remote = Arc::new(FakeRemote::default().with_file("/maven-metadata.xml", b"<metadata/>"));
    let manager = TransferManager::builder(Arc::new(cache))
        .transport(remote.clone())
        .build()
        .unwrap();
    let location = Location::builder("central", "https://c")
        .attribute(CACHE_TIMEOUT_SECONDS, "120")
        .build();
    let resource = at(&location, "/maven-metadata.xml");

    assert_eq!(manager.retrieve_detailed(&resource).state, RetrievalState::Downloaded);
    assert_eq!(manager.retrieve_detailed(&resource).state, RetrievalState::CacheHit);

    // Age the row by a day
    let db = pm.db();
    let meta = FileMeta {
        file_id: db.file_id("central", "/maven-metadata.xml").unwrap().unwrap(),
        size: db.file_length("central", "/maven-metadata.xml").unwrap().unwrap(),
        creation: now_millis() - 24 * 3600 * 1000,
        storage: db.storage_file("central", "/maven-metadata.xml").unwrap().unwrap(),
    };
    db.insert("central", "/maven-metadata.xml", &meta).unwrap();

    assert_eq!(manager.retrieve_detailed(&resource).state, RetrievalState::Downloaded);
    assert_eq!(remote.downloads(), 2);
    assert_eq!(manager.retrieve_detailed(&resource).state, RetrievalState::CacheHit);
}

#[test]
fn test_zero_timeout_location_uses_default_wait() {
    let temp = TempDir::new().unwrap();
    let remote = Arc::new(FakeRemote {
        delay: Duration::from_millis(50),
        ..Default::default()
    }
    .with_file("/a.jar", b"jar"));
    let manager = TransferManager::builder(file_cache(&temp))
        .transport(remote)
        .build()
        .unwrap();
    let location = Location::builder("central", "https://c").timeout_seconds(0).build();

    let retrieval = manager.retrieve_detailed(&at(&location, "/a.jar"));
    assert_eq!(retrieval.state, RetrievalState::Downloaded);
}

#[test]
fn test_skipped_and_no_transport() {
    let temp = TempDir::new().unwrap();
    let manager = TransferManager::builder(file_cache(&temp))
        .transport(Arc::new(FakeRemote::default()))
        .build()
        .unwrap();

    let no_downloads = Location::builder("hosted", "https://h")
        .allows_downloading(false)
        .build();
    assert_eq!(
        manager.retrieve_detailed(&at(&no_downloads, "/a.jar")).state,
        RetrievalState::Skipped
    );
    assert_eq!(
        manager.retrieve_detailed(&at(&central(), "/dir/.listing.txt")).state,
        RetrievalState::Skipped
    );

    let local = Location::new("local", "file:///srv/repo");
    assert_eq!(
        manager.retrieve_detailed(&at(&local, "/a.jar")).state,
        RetrievalState::NoTransport
    );
}

#[test]
fn test_retrieve_first_and_all() {
    let temp = TempDir::new().unwrap();
    let remote = Arc::new(FakeRemote::default().with_file("/a.jar", b"a"));
    let manager = TransferManager::builder(file_cache(&temp))
        .transport(remote)
        .build()
        .unwrap();

    let empty = Location::new("empty", "file:///none");
    let mirror = Location::new("mirror", "https://mirror");
    let virt = VirtualResource::new(&[empty, central(), mirror], "/a.jar");

    let first = manager.retrieve_first(&virt).unwrap().unwrap();
    assert_eq!(first.location().name(), "central");

    let all = manager.retrieve_all(&virt).unwrap();
    let names: Vec<_> = all.iter().map(|t| t.location().name().to_string()).collect();
    assert_eq!(names, vec!["central", "mirror"]);

    let nowhere = VirtualResource::new(&[central()], "/b.jar");
    assert!(manager.retrieve_first(&nowhere).unwrap().is_none());
    assert!(manager.retrieve_all(&nowhere).unwrap().is_empty());
}

#[test]
fn test_list_merges_cache_and_remote() {
    let temp = TempDir::new().unwrap();
    let remote = Arc::new(
        FakeRemote::default().with_listing("/org", &["b.jar", "sub/", ".listing.txt", "a.jar"]),
    );
    let manager = TransferManager::builder(file_cache(&temp))
        .transport(remote)
        .build()
        .unwrap();

    manager
        .store(&at(&central(), "/org/a.jar"), &mut Cursor::new(b"a".to_vec()))
        .unwrap();
    manager
        .store(&at(&central(), "/org/local.pom"), &mut Cursor::new(b"p".to_vec()))
        .unwrap();

    assert_eq!(
        manager.list(&at(&central(), "/org")).unwrap(),
        vec!["a.jar", "b.jar", "local.pom", "sub"]
    );
    assert!(manager.list(&at(&central(), "/nothing")).unwrap().is_empty());
}

#[test]
fn test_exists_records_remote_miss() {
    let temp = TempDir::new().unwrap();
    let remote = Arc::new(FakeRemote::default().with_file("/here.jar", b"x"));
    let manager = TransferManager::builder(file_cache(&temp))
        .transport(remote.clone())
        .build()
        .unwrap();

    assert!(manager.exists(&at(&central(), "/here.jar")).unwrap());
    assert!(!manager.exists(&at(&central(), "/gone.jar")).unwrap());
    assert!(manager.not_found_cache().is_missing(&at(&central(), "/gone.jar")));
    // Existence checks never download
    assert_eq!(remote.downloads(), 0);
}

#[test]
fn test_publish_and_policy_checks() {
    let temp = TempDir::new().unwrap();
    let remote = Arc::new(FakeRemote::default());
    let manager = TransferManager::builder(file_cache(&temp))
        .transport(remote.clone())
        .build()
        .unwrap();

    let release = Location::builder("releases", "https://r")
        .allows_publishing(true)
        .build();
    let resource = at(&release, "/org/app/1.0/app-1.0.jar");
    manager.not_found_cache().add_missing(&resource);
    manager
        .publish(&resource, Box::new(Cursor::new(b"app".to_vec())), 3)
        .unwrap();
    assert_eq!(
        remote.published.lock().unwrap().get("/org/app/1.0/app-1.0.jar").unwrap(),
        b"app"
    );
    assert!(!manager.not_found_cache().is_missing(&resource));

    let err = manager
        .publish(&at(&central(), "/x.jar"), Box::new(Cursor::new(Vec::new())), 0)
        .unwrap_err();
    assert_eq!(err.kind(), TransferErrorKind::Location);

    let read_only = Location::builder("ro", "https://ro")
        .allows_storing(false)
        .allows_deletion(false)
        .build();
    let err = manager
        .store(&at(&read_only, "/x.jar"), &mut Cursor::new(b"x".to_vec()))
        .unwrap_err();
    assert_eq!(err.kind(), TransferErrorKind::Location);
    assert_eq!(
        manager.delete(&at(&read_only, "/x.jar")).unwrap_err().kind(),
        TransferErrorKind::Location
    );

    let stored = at(&central(), "/deleteme.jar");
    manager.store(&stored, &mut Cursor::new(b"d".to_vec())).unwrap();
    assert!(manager.delete(&stored).unwrap());
    assert!(!manager.cache_reference(&stored).exists().unwrap());
}

#[test]
fn test_builder_takes_loaded_settings() {
    let temp = TempDir::new().unwrap();
    let settings = Config::from_toml_str(
        r#"
        [transport]
        worker_threads = 2

        [not_found]
        timeout_seconds = 0
        "#,
    )
    .unwrap();
    let manager = TransferManager::builder(file_cache(&temp))
        .settings(&settings)
        .build()
        .unwrap();
    assert_eq!(manager.config().worker_threads(), 2);

    // Zero-second expiry: a recorded miss is forgotten immediately
    let resource = at(&central(), "/a.jar");
    manager.not_found_cache().add_missing(&resource);
    assert!(!manager.not_found_cache().is_missing(&resource));
}
