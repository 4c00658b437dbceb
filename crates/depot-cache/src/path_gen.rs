//! Mapping of resources to paths under a file cache root.

use std::path::PathBuf;

use crate::model::ConcreteResource;

/// Produces the cache-root-relative path of a resource.
pub trait PathGenerator: Send + Sync {
    fn file_path(&self, resource: &ConcreteResource) -> PathBuf;
}

fn join_segments(mut base: PathBuf, path: &str) -> PathBuf {
    for seg in path.split('/').filter(|s| !s.is_empty() && *s != "." && *s != "..") {
        base.push(seg);
    }
    base
}

/// Directory named after the BLAKE3 hash of the location URI (first 16 hex chars),
/// so locations with awkward names or identical names on different URIs never collide.
pub struct HashedLocationPathGenerator;

impl HashedLocationPathGenerator {
    const PREFIX_LEN: usize = 16;

    pub fn location_dir(uri: &str) -> String {
        let hash = blake3::hash(uri.as_bytes());
        hex::encode(&hash.as_bytes()[..Self::PREFIX_LEN / 2])
    }
}

impl PathGenerator for HashedLocationPathGenerator {
    fn file_path(&self, resource: &ConcreteResource) -> PathBuf {
        let dir = Self::location_dir(resource.location().uri());
        join_segments(PathBuf::from(dir), resource.path())
    }
}

/// Directory named after the location, with unsafe characters replaced by `_`.
pub struct LocationNamePathGenerator;

impl LocationNamePathGenerator {
    pub fn location_dir(name: &str) -> String {
        let sanitized: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        match sanitized.as_str() {
            "" | "." | ".." => "_".to_string(),
            _ => sanitized,
        }
    }
}

impl PathGenerator for LocationNamePathGenerator {
    fn file_path(&self, resource: &ConcreteResource) -> PathBuf {
        let dir = Self::location_dir(resource.location().name());
        join_segments(PathBuf::from(dir), resource.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Location;

    #[test]
    fn test_hashed_generator() {
        let res = ConcreteResource::new(Location::new("central", "https://repo1"), "/org/a.jar");
        let path = HashedLocationPathGenerator.file_path(&res);
        let dir = HashedLocationPathGenerator::location_dir("https://repo1");
        assert_eq!(dir.len(), 16);
        assert_eq!(path, PathBuf::from(dir).join("org").join("a.jar"));

        let other = ConcreteResource::new(Location::new("central", "https://repo2"), "/org/a.jar");
        assert_ne!(HashedLocationPathGenerator.file_path(&other), path);
    }

    #[test]
    fn test_name_generator_sanitizes() {
        assert_eq!(LocationNamePathGenerator::location_dir("maven:remote:central"), "maven_remote_central");
        assert_eq!(LocationNamePathGenerator::location_dir(".."), "_");

        let res = ConcreteResource::new(Location::new("a/b", "x"), "/c");
        assert_eq!(LocationNamePathGenerator.file_path(&res), PathBuf::from("a_b").join("c"));
    }
}
