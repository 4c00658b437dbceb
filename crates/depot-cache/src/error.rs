use std::io;
use std::time::Duration;

use depot_cas::CasError;
use depot_pathdb::PathDbError;
use thiserror::Error;

/// Errors raised by cache providers
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Path database error: {0}")]
    PathDb(#[from] PathDbError),

    #[error("Blob store error: {0}")]
    Cas(#[from] CasError),

    #[error("Timed out after {waited:?} waiting for lock on {resource}")]
    LockTimeout { resource: String, waited: Duration },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;
