//! Link strategies used to alias one cached file under another path.
//!
//! - **HardLinkStrategy**: hard_link → reflink → copy
//! - **CopyStrategy**: plain copy, for stores where aliases must not share inodes
//!
//! # Usage
//!
//! ```ignore
//! use depot_cas::strategy_for;
//!
//! let strategy = strategy_for(config.alias_links_enabled);
//! strategy.link_file(source, target)?;
//! ```

use std::fs;
use std::io;
use std::path::Path;

use tracing::trace;

/// File linking strategy for aliasing cached content
pub trait LinkStrategy: Send + Sync {
    /// Make `target` carry the same content as `source`.
    ///
    /// `target` must not exist; callers remove it first.
    fn link_file(&self, source: &Path, target: &Path) -> io::Result<()>;

    /// Name of this strategy (for logging/debugging)
    fn name(&self) -> &'static str;
}

/// Tiered linking: hard_link, then reflink (btrfs, xfs, APFS), then copy.
///
/// Hard links fail across devices and, on macOS, inside code-signed bundles;
/// both cases fall through to the next tier.
pub struct HardLinkStrategy;

impl LinkStrategy for HardLinkStrategy {
    fn link_file(&self, source: &Path, target: &Path) -> io::Result<()> {
        match fs::hard_link(source, target) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Err(e),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(e),
            Err(e) => trace!(error = %e, "hard_link failed, trying reflink"),
        }

        if reflink_copy::reflink(source, target).is_ok() {
            return Ok(());
        }

        fs::copy(source, target)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "hardlink-tiered"
    }
}

/// Always copy bytes.
pub struct CopyStrategy;

impl LinkStrategy for CopyStrategy {
    fn link_file(&self, source: &Path, target: &Path) -> io::Result<()> {
        fs::copy(source, target)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "copy"
    }
}

/// Pick the strategy matching the alias-link setting.
pub fn strategy_for(alias_links_enabled: bool) -> &'static dyn LinkStrategy {
    static HARD_LINK: HardLinkStrategy = HardLinkStrategy;
    static COPY: CopyStrategy = CopyStrategy;

    if alias_links_enabled {
        &HARD_LINK
    } else {
        &COPY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_strategy_names() {
        assert_eq!(strategy_for(true).name(), "hardlink-tiered");
        assert_eq!(strategy_for(false).name(), "copy");
    }

    #[test]
    fn test_hard_link_shares_inode() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source.txt");
        let target = dir.path().join("target.txt");
        fs::write(&source, b"hello").unwrap();

        strategy_for(true).link_file(&source, &target).unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"hello");
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            assert!(fs::metadata(&source).unwrap().nlink() >= 2);
        }
    }

    #[test]
    fn test_copy_keeps_separate_inode() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source.txt");
        let target = dir.path().join("target.txt");
        fs::write(&source, b"hello").unwrap();

        strategy_for(false).link_file(&source, &target).unwrap();
        fs::write(&source, b"changed").unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"hello");
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let dir = tempdir().unwrap();
        let result =
            strategy_for(true).link_file(&dir.path().join("nope"), &dir.path().join("target"));
        assert!(result.is_err());
    }
}
