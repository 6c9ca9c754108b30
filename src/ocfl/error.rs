use core::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::time::Duration;
use std::{error, io};

#[cfg(feature = "s3")]
use rusoto_core::region::ParseRegionError;
#[cfg(feature = "s3")]
use rusoto_core::RusotoError;
use thiserror::Error;

use crate::ocfl::{LogicalPath, VersionNum};

pub type Result<T, E = RocflError> = core::result::Result<T, E>;

/// Application errors
#[derive(Error)]
pub enum RocflError {
    #[error("Object {object_id} is corrupt: {message}")]
    CorruptObject { object_id: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("{0}")]
    General(String),

    #[error("File already exists at {0}. Use the overwrite option if you wish to replace it.")]
    AlreadyExists(LogicalPath),

    #[error("Path '{0}' violates the configured path constraints: {1}")]
    PathConstraint(String, String),

    #[error("Destination '{0}' already exists and overwrite was not requested")]
    Overwrite(String),

    #[error("Fixity check failed for '{path}': expected {algorithm} digest {expected}, got {actual}")]
    FixityCheck {
        path: String,
        algorithm: String,
        expected: String,
        actual: String,
    },

    #[error("Object {0} was concurrently modified by another writer")]
    ObjectOutOfSync(String),

    #[error("Failed to acquire {kind} lock on object {object_id} within {}ms: {reason}", .timeout.as_millis())]
    Lock {
        object_id: String,
        kind: &'static str,
        timeout: Duration,
        reason: String,
    },

    #[error("Operation is not legal for object {object_id} in its current state: {message}")]
    OcflState { object_id: String, message: String },

    #[error("{0}")]
    Io(io::Error),

    #[cfg(feature = "sql-lock")]
    #[error("{0}")]
    OcflDb(#[from] rusqlite::Error),

    #[error("Encountered {0} errors while copying/moving files:\n{0}")]
    CopyMoveError(MultiError),

    #[error("Failed to acquire lock on object {0}: lock file {1} already exists")]
    LockAcquire(String, String),

    #[error("The repository is closed")]
    Closed,

    #[error("{0}")]
    Wrapped(Box<dyn error::Error>),
}

/// Aggregates a batch of per-file error strings produced by a multi-file copy/move/remove
/// operation into a single displayable error.
#[derive(Debug)]
pub struct MultiError(pub Vec<String>);

impl Display for MultiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}

/// Constructs a `RocflError::NotFound` error
pub fn not_found(object_id: &str, version_num: Option<VersionNum>) -> RocflError {
    match version_num {
        Some(version) => RocflError::NotFound(format!("Object {} version {}", object_id, version)),
        None => RocflError::NotFound(format!("Object {}", object_id)),
    }
}

/// Constructs a `RocflError::NotFound` error for a missing logical path
pub fn not_found_path(object_id: &str, version_num: VersionNum, path: impl Display) -> RocflError {
    RocflError::NotFound(format!(
        "Object {} version {} path {}",
        object_id, version_num, path
    ))
}

impl Debug for RocflError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl From<io::Error> for RocflError {
    fn from(e: io::Error) -> Self {
        RocflError::Io(e)
    }
}

impl From<globset::Error> for RocflError {
    fn from(e: globset::Error) -> Self {
        RocflError::Wrapped(Box::new(e))
    }
}

impl From<serde_json::Error> for RocflError {
    fn from(e: serde_json::Error) -> Self {
        RocflError::Wrapped(Box::new(e))
    }
}

impl From<walkdir::Error> for RocflError {
    fn from(e: walkdir::Error) -> Self {
        RocflError::Wrapped(Box::new(e))
    }
}

#[cfg(feature = "s3")]
impl From<ParseRegionError> for RocflError {
    fn from(e: ParseRegionError) -> Self {
        RocflError::Wrapped(Box::new(e))
    }
}

#[cfg(feature = "s3")]
impl<T: error::Error + 'static> From<RusotoError<T>> for RocflError {
    fn from(e: RusotoError<T>) -> Self {
        RocflError::Wrapped(Box::new(e))
    }
}
