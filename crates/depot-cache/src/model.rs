//! Locations and the resources addressed inside them.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dashmap::DashMap;
use depot_config::TransportManagerConfig;
use depot_pathdb::normalize_path;

/// Attribute holding the cache lifetime of a location's files, in seconds.
/// Absent or `0` means cached files never go stale.
pub const CACHE_TIMEOUT_SECONDS: &str = "cache-timeout-seconds";

pub const DEFAULT_TIMEOUT_SECONDS: u64 = TransportManagerConfig::DEFAULT_TIMEOUT_SECONDS;

/// Identity and policy of a backing repository.
///
/// Cloning is cheap and clones share the attribute map. Everything except the
/// attributes is fixed at construction. Equality and hashing use `(name, uri)`.
#[derive(Clone)]
pub struct Location {
    inner: Arc<LocationInner>,
}

struct LocationInner {
    name: String,
    uri: String,
    allows_snapshots: bool,
    allows_releases: bool,
    allows_storing: bool,
    allows_publishing: bool,
    allows_downloading: bool,
    allows_deletion: bool,
    timeout_seconds: u64,
    attributes: DashMap<String, String>,
}

impl Location {
    pub fn builder(name: impl Into<String>, uri: impl Into<String>) -> LocationBuilder {
        LocationBuilder {
            name: name.into(),
            uri: uri.into(),
            allows_snapshots: true,
            allows_releases: true,
            allows_storing: true,
            allows_publishing: false,
            allows_downloading: true,
            allows_deletion: true,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            attributes: Vec::new(),
        }
    }

    /// A location with default policy.
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self::builder(name, uri).build()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    pub fn allows_snapshots(&self) -> bool {
        self.inner.allows_snapshots
    }

    pub fn allows_releases(&self) -> bool {
        self.inner.allows_releases
    }

    pub fn allows_storing(&self) -> bool {
        self.inner.allows_storing
    }

    pub fn allows_publishing(&self) -> bool {
        self.inner.allows_publishing
    }

    pub fn allows_downloading(&self) -> bool {
        self.inner.allows_downloading
    }

    pub fn allows_deletion(&self) -> bool {
        self.inner.allows_deletion
    }

    /// Transport I/O timeout.
    pub fn timeout_seconds(&self) -> u64 {
        self.inner.timeout_seconds
    }

    pub fn attribute(&self, key: &str) -> Option<String> {
        self.inner.attributes.get(key).map(|v| v.value().clone())
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.attributes.insert(key.into(), value.into());
    }

    pub fn remove_attribute(&self, key: &str) -> Option<String> {
        self.inner.attributes.remove(key).map(|(_, v)| v)
    }

    /// Parsed [`CACHE_TIMEOUT_SECONDS`] attribute; unparseable values count as `0`.
    pub fn cache_timeout_seconds(&self) -> u64 {
        self.attribute(CACHE_TIMEOUT_SECONDS)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }
}

impl PartialEq for Location {
    fn eq(&self, other: &Self) -> bool {
        self.inner.name == other.inner.name && self.inner.uri == other.inner.uri
    }
}

impl Eq for Location {}

impl Hash for Location {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.name.hash(state);
        self.inner.uri.hash(state);
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Location")
            .field("name", &self.inner.name)
            .field("uri", &self.inner.uri)
            .finish()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.name)
    }
}

pub struct LocationBuilder {
    name: String,
    uri: String,
    allows_snapshots: bool,
    allows_releases: bool,
    allows_storing: bool,
    allows_publishing: bool,
    allows_downloading: bool,
    allows_deletion: bool,
    timeout_seconds: u64,
    attributes: Vec<(String, String)>,
}

impl LocationBuilder {
    pub fn allows_snapshots(mut self, allowed: bool) -> Self {
        self.allows_snapshots = allowed;
        self
    }

    pub fn allows_releases(mut self, allowed: bool) -> Self {
        self.allows_releases = allowed;
        self
    }

    pub fn allows_storing(mut self, allowed: bool) -> Self {
        self.allows_storing = allowed;
        self
    }

    pub fn allows_publishing(mut self, allowed: bool) -> Self {
        self.allows_publishing = allowed;
        self
    }

    pub fn allows_downloading(mut self, allowed: bool) -> Self {
        self.allows_downloading = allowed;
        self
    }

    pub fn allows_deletion(mut self, allowed: bool) -> Self {
        self.allows_deletion = allowed;
        self
    }

    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub fn build(self) -> Location {
        let attributes = DashMap::new();
        for (k, v) in self.attributes {
            attributes.insert(k, v);
        }
        Location {
            inner: Arc::new(LocationInner {
                name: self.name,
                uri: self.uri,
                allows_snapshots: self.allows_snapshots,
                allows_releases: self.allows_releases,
                allows_storing: self.allows_storing,
                allows_publishing: self.allows_publishing,
                allows_downloading: self.allows_downloading,
                allows_deletion: self.allows_deletion,
                timeout_seconds: self.timeout_seconds,
                attributes,
            }),
        }
    }
}

/// A path inside one location. Paths are normalized to a leading `/`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConcreteResource {
    location: Location,
    path: String,
}

impl ConcreteResource {
    pub fn new(location: Location, path: &str) -> Self {
        Self {
            location,
            path: normalize_path(path),
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        self.path == "/"
    }

    /// Last path segment; empty for the root.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }

    pub fn parent(&self) -> Option<ConcreteResource> {
        if self.is_root() {
            return None;
        }
        let idx = self.path.rfind('/').unwrap_or(0);
        let parent = if idx == 0 { "/" } else { &self.path[..idx] };
        Some(Self::new(self.location.clone(), parent))
    }

    pub fn child(&self, name: &str) -> ConcreteResource {
        Self::new(self.location.clone(), &format!("{}/{}", self.path, name))
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.location.timeout_seconds()
    }

    pub fn cache_timeout_seconds(&self) -> u64 {
        self.location.cache_timeout_seconds()
    }
}

impl fmt::Display for ConcreteResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.location.name(), self.path)
    }
}

impl fmt::Debug for ConcreteResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// The same path across an ordered list of locations. Resolution tries each
/// member in order and the first match wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualResource {
    resources: Vec<ConcreteResource>,
}

impl VirtualResource {
    pub fn new(locations: &[Location], path: &str) -> Self {
        Self {
            resources: locations
                .iter()
                .map(|l| ConcreteResource::new(l.clone(), path))
                .collect(),
        }
    }

    pub fn from_resources(resources: Vec<ConcreteResource>) -> Self {
        Self { resources }
    }

    pub fn resources(&self) -> &[ConcreteResource] {
        &self.resources
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConcreteResource> {
        self.resources.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn path(&self) -> Option<&str> {
        self.resources.first().map(|r| r.path())
    }
}

impl<'a> IntoIterator for &'a VirtualResource {
    type Item = &'a ConcreteResource;
    type IntoIter = std::slice::Iter<'a, ConcreteResource>;

    fn into_iter(self) -> Self::IntoIter {
        self.resources.iter()
    }
}
