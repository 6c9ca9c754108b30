//! Core OCFL repository engine: inventories, the version construction pipeline, the storage
//! abstraction, and the concurrency/consistency layer described in the crate's design notes.

pub use self::cache::{InMemoryObjectDetailsCache, ObjectDetailsCache, ObjectDetailsRow};
pub use self::digest::{DigestAlgorithm, HexDigest};
pub use self::error::{Result, RocflError};
pub use self::lock::{InMemoryLockManager, ObjectLockManager};
pub use self::repo::{FileChangeEvent, FileChangeEventType, OcflRepo};
pub use self::store::layout::{LayoutExtensionName, StorageLayout};
pub use self::types::*;
pub use self::updater::{AddOptions, Updater};
pub use self::validate::{
    ErrorCode, IncrementalValidator, IncrementalValidatorImpl, ObjectValidationResult,
    ProblemLocation, ValidationError, ValidationResult, ValidationWarning, WarnCode,
};

#[cfg(feature = "sql-lock")]
pub use self::cache::SqliteObjectDetailsCache;
#[cfg(feature = "sql-lock")]
pub use self::lock::SqliteLockManager;

mod bimap;
mod cache;
mod consts;
mod digest;
mod error;
mod inventory;
mod lock;
mod paths;
mod repo;
mod serde;
mod specs;
mod store;
mod types;
mod updater;
mod util;
mod validate;
