//! Per-path handling rules: which files are checksums, metadata, or internal
//! bookkeeping that clients must never see.

/// What may be done with a path. Unmatched paths allow everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialPathInfo {
    pub listable: bool,
    pub retrievable: bool,
    pub storable: bool,
    pub decoratable: bool,
    pub metadata: bool,
}

impl Default for SpecialPathInfo {
    fn default() -> Self {
        Self {
            listable: true,
            retrievable: true,
            storable: true,
            decoratable: true,
            metadata: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathMatcher {
    /// Last path segment ends with the suffix
    Suffix(String),
    /// Last path segment equals the name
    FileName(String),
}

impl PathMatcher {
    pub fn matches(&self, path: &str) -> bool {
        let name = path.rsplit('/').next().unwrap_or(path);
        match self {
            PathMatcher::Suffix(suffix) => name.ends_with(suffix.as_str()),
            PathMatcher::FileName(file_name) => name == file_name,
        }
    }
}

pub struct SpecialPathManager {
    rules: Vec<(PathMatcher, SpecialPathInfo)>,
}

impl Default for SpecialPathManager {
    fn default() -> Self {
        let mut manager = Self::empty();

        let checksum = SpecialPathInfo {
            decoratable: false,
            ..Default::default()
        };
        for suffix in [".md5", ".sha1", ".sha256", ".sha512", ".asc"] {
            manager.register(PathMatcher::Suffix(suffix.to_string()), checksum);
        }

        manager.register(
            PathMatcher::FileName("maven-metadata.xml".to_string()),
            SpecialPathInfo {
                metadata: true,
                ..Default::default()
            },
        );

        let hidden = SpecialPathInfo {
            listable: false,
            retrievable: false,
            decoratable: false,
            ..Default::default()
        };
        manager.register(PathMatcher::FileName(".listing.txt".to_string()), hidden);
        manager.register(PathMatcher::Suffix(".lock".to_string()), hidden);

        manager
    }
}

impl SpecialPathManager {
    /// A manager with no rules.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Add a rule. Earlier rules win.
    pub fn register(&mut self, matcher: PathMatcher, info: SpecialPathInfo) {
        self.rules.push((matcher, info));
    }

    pub fn info(&self, path: &str) -> SpecialPathInfo {
        self.rules
            .iter()
            .find(|(m, _)| m.matches(path))
            .map(|(_, info)| *info)
            .unwrap_or_default()
    }

    pub fn is_listable(&self, path: &str) -> bool {
        self.info(path).listable
    }

    pub fn is_retrievable(&self, path: &str) -> bool {
        self.info(path).retrievable
    }

    pub fn is_decoratable(&self, path: &str) -> bool {
        self.info(path).decoratable
    }

    pub fn is_metadata(&self, path: &str) -> bool {
        self.info(path).metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules() {
        let spm = SpecialPathManager::default();
        assert!(!spm.is_decoratable("/org/foo/foo-1.0.jar.sha1"));
        assert!(spm.is_retrievable("/org/foo/foo-1.0.jar.sha1"));
        assert!(spm.is_decoratable("/org/foo/foo-1.0.jar"));
        assert!(spm.is_metadata("/org/foo/maven-metadata.xml"));
        assert!(!spm.is_metadata("/org/foo/maven-metadata.xml.md5"));
        assert!(!spm.is_listable("/org/foo/.listing.txt"));
        assert!(!spm.is_retrievable("/org/foo/.listing.txt"));
        assert!(!spm.is_listable("/org/foo/artifact.lock"));
    }

    #[test]
    fn test_first_rule_wins() {
        let mut spm = SpecialPathManager::empty();
        spm.register(
            PathMatcher::FileName("special.jar".into()),
            SpecialPathInfo {
                storable: false,
                ..Default::default()
            },
        );
        spm.register(PathMatcher::Suffix(".jar".into()), SpecialPathInfo::default());
        assert!(!spm.info("/a/special.jar").storable);
        assert!(spm.info("/a/other.jar").storable);
    }
}
