//! # depot-cas
//!
//! Content-addressed physical store backing Depot's path-mapped cache.
//!
//! Blobs are identified by the BLAKE3 hash of their content (the `FileId`) and
//! laid out with a 2-level fan-out under the store root:
//!
//! ```text
//! <root>/
//! ├── blake3/
//! │   └── ab/
//! │       └── cd/
//! │           └── abcd1234...ef      # full hex hash
//! └── staging/                        # in-flight writes, never read
//! ```
//!
//! The store knows nothing about logical paths or reference counts; that is the
//! job of `depot-pathdb`. Writes stream into a staging file while hashing and are
//! published with a rename, so a blob path either holds complete content or does
//! not exist.

pub mod link_strategy;

pub use link_strategy::{strategy_for, CopyStrategy, HardLinkStrategy, LinkStrategy};

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, instrument};

/// BLAKE3 hash type (32 bytes)
pub type Blake3Hash = [u8; 32];

const BLOB_DIR: &str = "blake3";
const STAGING_DIR: &str = "staging";

/// Errors that can occur during store operations
#[derive(Error, Debug)]
pub enum CasError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Blob not found: {locator}")]
    NotFound { locator: String },

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Invalid storage locator: {0}")]
    InvalidLocator(String),
}

pub type Result<T> = std::result::Result<T, CasError>;

/// Identifier of a deduplicated blob: the lowercase hex BLAKE3 hash of its content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    pub fn from_hash(hash: &Blake3Hash) -> Self {
        Self(hex::encode(hash))
    }

    /// Parse a hex string, rejecting anything that is not a 32-byte hash.
    pub fn parse(s: &str) -> Option<Self> {
        let mut hash = [0u8; 32];
        hex::decode_to_slice(s, &mut hash).ok()?;
        Some(Self::from_hash(&hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Relative path of this blob under the store root: `blake3/ab/cd/<hex>`.
    pub fn storage_locator(&self) -> String {
        format!("{}/{}/{}/{}", BLOB_DIR, &self.0[..2], &self.0[2..4], self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of publishing a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub file_id: FileId,
    pub size: u64,
    /// Relative storage locator, see [`FileId::storage_locator`].
    pub storage: String,
}

/// Content-addressed physical store
#[derive(Debug, Clone)]
pub struct PhysicalStore {
    root: PathBuf,
}

impl PhysicalStore {
    /// Open a store at the given root directory, creating it if needed.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(BLOB_DIR))?;
        fs::create_dir_all(root.join(STAGING_DIR))?;
        Ok(Self { root })
    }

    /// Compute the BLAKE3 hash of the given bytes.
    #[inline]
    pub fn compute_hash(data: &[u8]) -> Blake3Hash {
        *blake3::hash(data).as_bytes()
    }

    /// Get the root path of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a storage locator to an absolute path.
    ///
    /// Locators are always relative and must stay inside `blake3/`.
    pub fn blob_path(&self, locator: &str) -> Result<PathBuf> {
        let valid = locator.starts_with(BLOB_DIR)
            && !locator.starts_with('/')
            && !locator.split('/').any(|seg| seg == ".." || seg.is_empty());
        if !valid {
            return Err(CasError::InvalidLocator(locator.to_string()));
        }
        Ok(self.root.join(locator))
    }

    /// Start a streaming write. Bytes are hashed as they arrive; call
    /// [`BlobWriter::finish`] to publish.
    pub fn writer(&self) -> Result<BlobWriter> {
        let temp = NamedTempFile::new_in(self.root.join(STAGING_DIR))?;
        Ok(BlobWriter {
            temp,
            hasher: blake3::Hasher::new(),
            size: 0,
            root: self.root.clone(),
        })
    }

    /// Store bytes, returning the blob description.
    ///
    /// If the content already exists this is a no-op (deduplication).
    #[instrument(skip(self, data), level = "debug")]
    pub fn store(&self, data: &[u8]) -> Result<StoredBlob> {
        let mut writer = self.writer()?;
        writer.write_all(data)?;
        writer.finish()
    }

    /// Open a blob for streaming reads.
    pub fn open(&self, locator: &str) -> Result<File> {
        let path = self.blob_path(locator)?;
        match File::open(&path) {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(CasError::NotFound {
                locator: locator.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Read a whole blob, verifying its content against the file id.
    #[instrument(skip(self), level = "debug")]
    pub fn get(&self, file_id: &FileId) -> Result<Vec<u8>> {
        let mut file = self.open(&file_id.storage_locator())?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let actual = FileId::from_hash(&Self::compute_hash(&data));
        if actual != *file_id {
            return Err(CasError::HashMismatch {
                expected: file_id.to_string(),
                actual: actual.to_string(),
            });
        }

        Ok(data)
    }

    /// Check if a blob exists.
    pub fn exists(&self, locator: &str) -> bool {
        self.blob_path(locator).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Delete a blob. Returns `false` if it was already gone.
    pub fn delete(&self, locator: &str) -> Result<bool> {
        let path = self.blob_path(locator)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(locator, "deleted blob");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Get statistics about the store.
    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        for entry in walkdir::WalkDir::new(self.root.join(BLOB_DIR)) {
            let entry = entry.map_err(|e| {
                e.into_io_error()
                    .unwrap_or_else(|| io::Error::other("filesystem loop in blob store"))
            })?;
            if entry.file_type().is_file() {
                stats.blob_count += 1;
                stats.total_bytes += entry.metadata().map_err(io::Error::other)?.len();
            }
        }
        Ok(stats)
    }
}

/// Streaming writer into the staging area.
///
/// Dropping it without calling `finish` discards the staged bytes.
pub struct BlobWriter {
    temp: NamedTempFile,
    hasher: blake3::Hasher,
    size: u64,
    root: PathBuf,
}

impl BlobWriter {
    /// Bytes written so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Publish the staged content under its content hash.
    pub fn finish(mut self) -> Result<StoredBlob> {
        self.temp.flush()?;
        self.temp.as_file().sync_all()?;

        let file_id = FileId::from_hash(self.hasher.finalize().as_bytes());
        let storage = file_id.storage_locator();
        let path = self.root.join(&storage);

        // Deduplication: identical content is already published
        if path.is_file() {
            return Ok(StoredBlob {
                file_id,
                size: self.size,
                storage,
            });
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        if let Err(e) = self.temp.persist(&path) {
            // Another writer may have published the same content first
            if !path.is_file() {
                return Err(CasError::Io(e.error));
            }
        }

        debug!(file_id = %file_id, size = self.size, "published blob");
        Ok(StoredBlob {
            file_id,
            size: self.size,
            storage,
        })
    }
}

impl Write for BlobWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.temp.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.temp.flush()
    }
}

/// Statistics about the store
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    /// Number of unique blobs stored
    pub blob_count: u64,
    /// Total bytes stored (deduplicated)
    pub total_bytes: u64,
}
