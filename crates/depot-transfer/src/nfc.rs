//! Not-found cache: remembers resources a remote confirmed missing so they are
//! not requested again.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use depot_cache::{ConcreteResource, Location};
use depot_config::NotFoundCacheConfig;

pub trait NotFoundCache: Send + Sync {
    fn add_missing(&self, resource: &ConcreteResource);

    fn is_missing(&self, resource: &ConcreteResource) -> bool;

    fn clear_missing_location(&self, location: &Location);

    fn clear_missing(&self, resource: &ConcreteResource);

    fn clear_all_missing(&self);

    fn get_missing(&self, location: &Location) -> BTreeSet<String>;

    fn get_all_missing(&self) -> HashMap<Location, BTreeSet<String>>;
}

type Entries = HashMap<Location, HashMap<String, Instant>>;

/// In-memory not-found cache with optional expiry.
#[derive(Default)]
pub struct MemoryNotFoundCache {
    entries: Mutex<Entries>,
    timeout: Option<Duration>,
}

impl MemoryNotFoundCache {
    pub fn new(config: &NotFoundCacheConfig) -> Self {
        Self::with_timeout(config.timeout())
    }

    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live(&self, added: &Instant) -> bool {
        self.timeout.map_or(true, |t| added.elapsed() < t)
    }

    /// Drop expired entries, and locations left without entries.
    fn prune(&self, entries: &mut Entries) {
        if self.timeout.is_none() {
            return;
        }
        entries.retain(|_, paths| {
            paths.retain(|_, added| self.live(added));
            !paths.is_empty()
        });
    }

    fn live_paths(&self, paths: &HashMap<String, Instant>) -> BTreeSet<String> {
        paths
            .iter()
            .filter(|(_, added)| self.live(added))
            .map(|(p, _)| p.clone())
            .collect()
    }
}

impl NotFoundCache for MemoryNotFoundCache {
    fn add_missing(&self, resource: &ConcreteResource) {
        let mut entries = self.entries();
        self.prune(&mut entries);
        entries
            .entry(resource.location().clone())
            .or_default()
            .insert(resource.path().to_string(), Instant::now());
    }

    fn is_missing(&self, resource: &ConcreteResource) -> bool {
        let mut entries = self.entries();
        let Some(paths) = entries.get_mut(resource.location()) else {
            return false;
        };
        let expired = match paths.get(resource.path()) {
            Some(added) => !self.live(added),
            None => return false,
        };
        if expired {
            paths.remove(resource.path());
            return false;
        }
        true
    }

    fn clear_missing_location(&self, location: &Location) {
        self.entries().remove(location);
    }

    fn clear_missing(&self, resource: &ConcreteResource) {
        let mut entries = self.entries();
        if let Some(paths) = entries.get_mut(resource.location()) {
            paths.remove(resource.path());
            if paths.is_empty() {
                entries.remove(resource.location());
            }
        }
    }

    fn clear_all_missing(&self) {
        self.entries().clear();
    }

    fn get_missing(&self, location: &Location) -> BTreeSet<String> {
        let mut entries = self.entries();
        self.prune(&mut entries);
        entries
            .get(location)
            .map(|paths| self.live_paths(paths))
            .unwrap_or_default()
    }

    fn get_all_missing(&self) -> HashMap<Location, BTreeSet<String>> {
        self.entries()
            .iter()
            .map(|(loc, paths)| (loc.clone(), self.live_paths(paths)))
            .filter(|(_, paths)| !paths.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn res(loc: &Location, path: &str) -> ConcreteResource {
        ConcreteResource::new(loc.clone(), path)
    }

    #[test]
    fn test_add_and_clear() {
        let nfc = MemoryNotFoundCache::default();
        let central = Location::new("central", "https://c");
        let other = Location::new("other", "https://o");

        nfc.add_missing(&res(&central, "/a.jar"));
        nfc.add_missing(&res(&central, "/b.jar"));
        nfc.add_missing(&res(&other, "/a.jar"));

        assert!(nfc.is_missing(&res(&central, "/a.jar")));
        assert!(!nfc.is_missing(&res(&central, "/c.jar")));
        assert_eq!(nfc.get_missing(&central).len(), 2);
        assert_eq!(nfc.get_all_missing().len(), 2);

        nfc.clear_missing(&res(&central, "/a.jar"));
        assert!(!nfc.is_missing(&res(&central, "/a.jar")));

        nfc.clear_missing_location(&central);
        assert!(nfc.get_missing(&central).is_empty());
        assert!(nfc.is_missing(&res(&other, "/a.jar")));

        nfc.clear_all_missing();
        assert!(nfc.get_all_missing().is_empty());
    }

    #[test]
    fn test_entries_expire() {
        let nfc = MemoryNotFoundCache::with_timeout(Some(Duration::from_millis(20)));
        let central = Location::new("central", "https://c");
        nfc.add_missing(&res(&central, "/a.jar"));
        assert!(nfc.is_missing(&res(&central, "/a.jar")));

        thread::sleep(Duration::from_millis(40));
        assert!(!nfc.is_missing(&res(&central, "/a.jar")));
        assert!(nfc.get_all_missing().is_empty());
    }

    #[test]
    fn test_expired_entries_are_pruned_without_lookup() {
        let nfc = MemoryNotFoundCache::with_timeout(Some(Duration::from_millis(20)));
        let central = Location::new("central", "https://c");
        let other = Location::new("other", "https://o");
        nfc.add_missing(&res(&central, "/old-1.jar"));
        nfc.add_missing(&res(&central, "/old-2.jar"));
        nfc.add_missing(&res(&other, "/old.jar"));

        thread::sleep(Duration::from_millis(40));
        nfc.add_missing(&res(&central, "/new.jar"));
        {
            let entries = nfc.entries();
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[&central].len(), 1);
        }

        thread::sleep(Duration::from_millis(40));
        assert!(nfc.get_missing(&other).is_empty());
        assert!(nfc.entries().is_empty());
    }
}
