use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Local;
use log::{error, info, warn};
use once_cell::sync::OnceCell;
#[cfg(feature = "s3")]
use rusoto_core::Region;

use crate::ocfl::cache::{InMemoryObjectDetailsCache, ObjectDetailsCache, ObjectDetailsRow};
use crate::ocfl::consts::*;
use crate::ocfl::digest::HexDigest;
use crate::ocfl::error::{Result, RocflError};
use crate::ocfl::inventory::Inventory;
#[cfg(feature = "sql-lock")]
use crate::ocfl::lock::SqliteLockManager;
#[cfg(not(feature = "sql-lock"))]
use crate::ocfl::lock::InMemoryLockManager;
use crate::ocfl::lock::{ObjectLockManager, DEFAULT_LOCK_TIMEOUT};
use crate::ocfl::store::fs::FsOcflStore;
use crate::ocfl::store::layout::{LayoutExtensionName, StorageLayout};
#[cfg(feature = "s3")]
use crate::ocfl::store::s3::S3OcflStore;
use crate::ocfl::store::{OcflStore, StagingStore};
use crate::ocfl::updater::Updater;
use crate::ocfl::validate::{IncrementalValidator, ObjectValidationResult};
use crate::ocfl::{
    paths, util, CommitMeta, Diff, DigestAlgorithm, InventoryPath, LogicalPath, ObjectVersion,
    ObjectVersionDetails, SpecVersion, VersionDetails, VersionNum, VersionRef,
};

/// Interface for interacting with an OCFL repository
pub struct OcflRepo {
    /// For local filesystem repos, this is the storage root. TBD for S3.
    store: Box<dyn OcflStore + Sync + Send>,
    /// The OCFL repo that stores staged objects
    staging: OnceCell<FsOcflStore>,
    /// Locks staged objects so they cannot be concurrently modified
    staging_lock_manager: OnceCell<StagingLockManager>,
    /// The path to the root of the staging repo
    staging_root: PathBuf,
    /// Caches each object's current HEAD bookkeeping so that repeated reads and the
    /// concurrent-writer check on commit don't have to re-derive it from storage every time.
    details_cache: Box<dyn ObjectDetailsCache>,
    /// Indicates if the repository should convert separators to backslashes when rendering
    /// physical paths.
    use_backslashes: bool,
    closed: AtomicBool,
}

/// Records a single change to a file across an object's version history.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FileChangeEvent {
    /// The version the change occurred in
    pub version_details: VersionDetails,
    /// What kind of change occurred
    pub change_type: FileChangeEventType,
}

/// The kind of change a `FileChangeEvent` represents
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FileChangeEventType {
    /// The file did not exist in the previous version and was added in this one
    Added,
    /// The file existed in the previous version, and its content changed in this one
    Modified,
    /// The file existed in the previous version and was removed in this one
    Removed,
}

/// Wraps an `ObjectLockManager` so that the write-path methods below can acquire a lock with a
/// single call instead of threading the lock kind and timeout through every call site. Backed by
/// `SqliteLockManager` when the `sql-lock` feature is enabled, so that concurrent `rocfl`
/// processes operating on the same staging directory coordinate through the lock database rather
/// than only within a single process.
struct StagingLockManager {
    inner: Box<dyn ObjectLockManager>,
}

impl StagingLockManager {
    fn new(_dir: impl AsRef<Path>) -> Result<Self> {
        #[cfg(feature = "sql-lock")]
        let inner: Box<dyn ObjectLockManager> =
            Box::new(SqliteLockManager::new(_dir.as_ref().join("locks.db"))?);
        #[cfg(not(feature = "sql-lock"))]
        let inner: Box<dyn ObjectLockManager> = Box::new(InMemoryLockManager::new());

        Ok(Self { inner })
    }

    fn acquire(&self, object_id: &str) -> Result<Box<dyn std::any::Any>> {
        self.inner.acquire_write(object_id, DEFAULT_LOCK_TIMEOUT)
    }
}

impl OcflRepo {
    /// Creates a new `OcflRepo` instance backed by the local filesystem. `storage_root` is the
    /// location of the OCFL repository to open. The OCFL repository must already exist.
    pub fn fs_repo(storage_root: impl AsRef<Path>) -> Result<Self> {
        let staging_root = paths::staging_extension_path(storage_root.as_ref());

        Ok(Self {
            staging_root,
            store: Box::new(FsOcflStore::new(storage_root)?),
            staging: OnceCell::default(),
            staging_lock_manager: OnceCell::default(),
            details_cache: Box::new(InMemoryObjectDetailsCache::default()),
            use_backslashes: util::BACKSLASH_SEPARATOR,
            closed: AtomicBool::new(false),
        })
    }

    /// Initializes a new `OcflRepo` instance backed by the local filesystem. The OCFL repository
    /// most not already exist.
    pub fn init_fs_repo(storage_root: impl AsRef<Path>, layout: StorageLayout) -> Result<Self> {
        let staging_root = paths::staging_extension_path(storage_root.as_ref());

        Ok(Self {
            staging_root,
            store: Box::new(FsOcflStore::init(
                storage_root,
                SpecVersion::LATEST,
                Some(layout),
            )?),
            staging: OnceCell::default(),
            staging_lock_manager: OnceCell::default(),
            details_cache: Box::new(InMemoryObjectDetailsCache::default()),
            use_backslashes: util::BACKSLASH_SEPARATOR,
            closed: AtomicBool::new(false),
        })
    }

    /// Initializes a new `OcflRepo` instance backed by S3. The OCFL repository
    /// most not already exist.
    #[cfg(feature = "s3")]
    #[allow(clippy::too_many_arguments)]
    pub fn init_s3_repo(
        region: Region,
        bucket: &str,
        prefix: Option<&str>,
        profile: Option<&str>,
        local_storage: impl AsRef<Path>,
        layout: StorageLayout,
    ) -> Result<Self> {
        let staging_root = paths::staging_extension_path(local_storage.as_ref());

        Ok(Self {
            staging_root,
            store: Box::new(S3OcflStore::init(region, bucket, prefix, Some(layout), profile)?),
            staging: OnceCell::default(),
            staging_lock_manager: OnceCell::default(),
            details_cache: Box::new(InMemoryObjectDetailsCache::default()),
            use_backslashes: false,
            closed: AtomicBool::new(false),
        })
    }

    /// Creates a new `OcflRepo` instance backed by S3. `prefix` used to specify a
    /// sub directory within a bucket that the OCFL repository is rooted in.
    #[cfg(feature = "s3")]
    pub fn s3_repo(
        region: Region,
        bucket: &str,
        prefix: Option<&str>,
        profile: Option<&str>,
        local_storage: impl AsRef<Path>,
    ) -> Result<Self> {
        let staging_root = paths::staging_extension_path(local_storage.as_ref());

        Ok(Self {
            staging_root,
            store: Box::new(S3OcflStore::new(region, bucket, prefix, profile)?),
            staging: OnceCell::default(),
            staging_lock_manager: OnceCell::default(),
            details_cache: Box::new(InMemoryObjectDetailsCache::default()),
            use_backslashes: false,
            closed: AtomicBool::new(false),
        })
    }

    /// Instructs the repo to gracefully stop any in-flight work and not accept any additional
    /// requests.
    pub fn close(&self) {
        info!("Closing OCFL repository");
        self.closed.store(true, Ordering::Release);
        self.store.close();
    }

    /// Returns an iterator that iterate through all of the objects in an OCFL repository.
    /// Objects are lazy-loaded. An optional glob pattern may be provided to filter the objects
    /// that are returned.
    ///
    /// The iterator return an error if it encounters a problem accessing an object. This does
    /// terminate the iterator; there are still more objects until it returns `None`.
    pub fn list_objects<'a>(
        &'a self,
        filter_glob: Option<&str>,
    ) -> Result<Box<dyn Iterator<Item = ObjectVersionDetails> + 'a>> {
        self.ensure_open()?;

        let inv_iter = self.store.iter_inventories(filter_glob)?;

        Ok(Box::new(InventoryAdapterIter::new(inv_iter, |inventory| {
            ObjectVersionDetails::from_inventory(inventory, VersionRef::Head)
        })))
    }

    /// Returns an iterator that iterate through all of the staged objects in an OCFL repository.
    /// Objects are lazy-loaded. An optional glob pattern may be provided to filter the objects
    /// that are returned.
    ///
    /// The iterator return an error if it encounters a problem accessing an object. This does
    /// terminate the iterator; there are still more objects until it returns `None`.
    pub fn list_staged_objects<'a>(
        &'a self,
        filter_glob: Option<&str>,
    ) -> Result<Box<dyn Iterator<Item = ObjectVersionDetails> + 'a>> {
        self.ensure_open()?;

        if !self.staging_root.exists() {
            return Ok(Box::new(Vec::new().into_iter()));
        }

        let inv_iter = self.get_staging()?.iter_inventories(filter_glob)?;

        Ok(Box::new(InventoryAdapterIter::new(inv_iter, |inventory| {
            ObjectVersionDetails::from_inventory(inventory, VersionRef::Head)
        })))
    }

    /// Returns a list of every object ID in the repository. An optional glob pattern may be
    /// provided to filter the objects that are returned.
    pub fn list_object_ids(&self, filter_glob: Option<&str>) -> Result<Vec<String>> {
        self.ensure_open()?;

        Ok(self
            .store
            .iter_inventories(filter_glob)?
            .filter_map(|result| match result {
                Ok(inventory) => Some(inventory.id),
                Err(e) => {
                    error!("{:#}", e);
                    None
                }
            })
            .collect())
    }

    /// Returns a view of a version of an object. If a `VersionNum` is not specified,
    /// then the head version of the object is returned.
    ///
    /// If the object or version of the object cannot be found, then a `RocflError::NotFound`
    /// error is returned.
    pub fn get_object(
        &self,
        object_id: &str,
        version_num: Option<VersionNum>,
    ) -> Result<ObjectVersion> {
        self.ensure_open()?;

        let inventory = self.store.get_inventory(object_id)?;
        let object_root = inventory.storage_path.clone();

        ObjectVersion::from_inventory(
            inventory,
            version_num.into(),
            &object_root,
            None,
            self.use_backslashes,
        )
    }

    /// Same as `get_object()`, but returns every file in the object's state as raw bytes written
    /// to `sink`, one after another, in logical path order. This is a convenience built on top of
    /// `get_object()`/`get_object_file()` for callers that want an object's full content stream
    /// rather than a file-by-file read.
    pub fn read_object(
        &self,
        object_id: &str,
        version_num: Option<VersionNum>,
        sink: &mut dyn Write,
    ) -> Result<()> {
        self.ensure_open()?;

        let object = self.get_object(object_id, version_num)?;
        let mut paths: Vec<&Rc<LogicalPath>> = object.state.keys().collect();
        paths.sort();

        for path in paths {
            self.get_object_file(object_id, path, version_num, sink)?;
        }

        Ok(())
    }

    /// Same as `get_object()` except that it returns the staged version of an object.
    ///
    /// If the object does not have a staged version, then a `RocflError::NotFound`
    /// error is returned.
    pub fn get_staged_object(&self, object_id: &str) -> Result<ObjectVersion> {
        self.ensure_open()?;

        let staging_inventory = self.get_staged_inventory(object_id)?;
        let version = staging_inventory.head;
        let object_staging_root = staging_inventory.storage_path.clone();

        let object_storage_root = match self.store.get_inventory(object_id) {
            Ok(inventory) => Some(inventory.storage_path),
            Err(RocflError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let (root, staging) = if let Some(storage_root) = object_storage_root {
            (storage_root, Some(object_staging_root))
        } else {
            (object_staging_root, None)
        };

        ObjectVersion::from_inventory(
            staging_inventory,
            version.into(),
            &root,
            staging.as_ref(),
            util::BACKSLASH_SEPARATOR,
        )
    }

    /// Returns high-level details about an object version. This method is similar to
    /// `OcflRepo::get_object()` except that it does less processing and does not
    /// include the version's state.
    ///
    /// If the object or version of the object cannot be found, then a `RocflError::NotFound`
    /// error is returned.
    pub fn get_object_details(
        &self,
        object_id: &str,
        version_num: Option<VersionNum>,
    ) -> Result<ObjectVersionDetails> {
        self.ensure_open()?;

        let inventory = self.store.get_inventory(object_id)?;
        ObjectVersionDetails::from_inventory(inventory, version_num.into())
    }

    /// Same as `describeObject`, but for the staged version of an object.
    pub fn describe_object(&self, object_id: &str) -> Result<ObjectVersionDetails> {
        self.get_object_details(object_id, None)
    }

    /// Returns high-level details about a specific version of an object.
    pub fn describe_version(
        &self,
        object_id: &str,
        version_num: VersionNum,
    ) -> Result<ObjectVersionDetails> {
        self.get_object_details(object_id, Some(version_num))
    }

    /// Same as `get_object_details()`, but for the staged version of an object.
    ///
    /// If the object does not have a staged version, then a `RocflError::NotFound`
    /// error is returned.
    pub fn get_staged_object_details(&self, object_id: &str) -> Result<ObjectVersionDetails> {
        self.ensure_open()?;

        let inventory = self.get_staged_inventory(object_id)?;
        let version = inventory.head;
        ObjectVersionDetails::from_inventory(inventory, version.into())
    }

    /// Returns a vector containing the version metadata for ever version of an object. The vector
    /// is sorted in ascending order.
    ///
    /// If the object cannot be found, then a `RocflError::NotFound` error is returned.
    pub fn list_object_versions(&self, object_id: &str) -> Result<Vec<VersionDetails>> {
        self.ensure_open()?;

        let inventory = self.store.get_inventory(object_id)?;
        let mut versions = Vec::with_capacity(inventory.versions.len());

        for (id, version) in inventory.versions {
            versions.push(VersionDetails::from_version(id, version))
        }

        Ok(versions)
    }

    /// Writes the specified file to the sink.
    ///
    /// If the file cannot be found, then a `RocflError::NotFound` error is returned.
    pub fn get_object_file(
        &self,
        object_id: &str,
        path: &LogicalPath,
        version_num: Option<VersionNum>,
        sink: &mut dyn Write,
    ) -> Result<()> {
        self.ensure_open()?;

        self.store
            .get_object_file(object_id, path, version_num.into(), sink)
    }

    /// Writes the specified file from the staged version of the object to the sink.
    ///
    /// If the file cannot be found, then a `RocflError::NotFound` error is returned.
    pub fn get_staged_object_file(
        &self,
        object_id: &str,
        path: &LogicalPath,
        sink: &mut dyn Write,
    ) -> Result<()> {
        self.ensure_open()?;

        let inventory = self.get_staged_inventory(object_id)?;
        let content_path = inventory.content_path_for_logical_path(path, VersionRef::Head)?;

        let version_prefix = format!("{}/", inventory.head);

        if content_path.starts_with(&version_prefix) {
            // The content exists in staging
            self.get_staging()?
                .get_object_file(object_id, path, VersionRef::Head, sink)
        } else {
            // The content exists in the main repo
            self.store.get_object_file(
                object_id,
                path,
                inventory.head.previous()?.into(),
                sink,
            )
        }
    }

    /// Returns a vector contain the version metadata for every version of an object that
    /// affected the specified file. The vector is sorted in ascending order.
    ///
    /// If the object or path cannot be found, then a `RocflError::NotFound' error is returned.
    pub fn list_file_versions(
        &self,
        object_id: &str,
        path: &LogicalPath,
    ) -> Result<Vec<VersionDetails>> {
        self.ensure_open()?;

        let inventory = self.store.get_inventory(object_id)?;

        let mut versions = Vec::new();
        let mut current_digest: Option<Rc<HexDigest>> = None;

        for (id, version) in inventory.versions {
            match version.lookup_digest(path) {
                Some(digest) => {
                    if current_digest.is_none()
                        || current_digest.as_ref().unwrap().as_ref().ne(digest)
                    {
                        current_digest = Some(digest.clone());
                        versions.push(VersionDetails::from_version(id, version));
                    }
                }
                None => {
                    if current_digest.is_some() {
                        current_digest = None;
                        versions.push(VersionDetails::from_version(id, version));
                    }
                }
            }
        }

        if versions.is_empty() {
            return Err(RocflError::NotFound(format!(
                "Path {} not found in object {}",
                path, object_id
            )));
        }

        Ok(versions)
    }

    /// Returns the complete history of changes to a file within an object, classifying each
    /// affecting version as having added, modified, or removed the file.
    ///
    /// If the object or path cannot be found, then a `RocflError::NotFound` error is returned.
    pub fn file_change_history(
        &self,
        object_id: &str,
        path: &LogicalPath,
    ) -> Result<Vec<FileChangeEvent>> {
        self.ensure_open()?;

        let inventory = self.store.get_inventory(object_id)?;

        let mut events = Vec::new();
        let mut current_digest: Option<Rc<HexDigest>> = None;

        for (id, version) in inventory.versions {
            match version.lookup_digest(path) {
                Some(digest) => {
                    let change_type = match &current_digest {
                        None => FileChangeEventType::Added,
                        Some(existing) if existing.as_ref().ne(digest) => {
                            FileChangeEventType::Modified
                        }
                        Some(_) => {
                            continue;
                        }
                    };
                    current_digest = Some(digest.clone());
                    events.push(FileChangeEvent {
                        version_details: VersionDetails::from_version(id, version),
                        change_type,
                    });
                }
                None => {
                    if current_digest.is_some() {
                        current_digest = None;
                        events.push(FileChangeEvent {
                            version_details: VersionDetails::from_version(id, version),
                            change_type: FileChangeEventType::Removed,
                        });
                    }
                }
            }
        }

        if events.is_empty() {
            return Err(RocflError::NotFound(format!(
                "Path {} not found in object {}",
                path, object_id
            )));
        }

        Ok(events)
    }

    /// Returns the diff of two object versions. If only one version is specified, then the diff
    /// is between the specified version and the version before it.
    ///
    /// If the object cannot be found, then a `RocflError::NotFound` error is returned.
    pub fn diff(
        &self,
        object_id: &str,
        left_version: Option<VersionNum>,
        right_version: VersionNum,
    ) -> Result<Vec<Diff>> {
        self.ensure_open()?;

        self.store
            .get_inventory(object_id)?
            .diff_versions(left_version, right_version)
    }

    /// Returns all of the staged changes to the specified object, if there are any.
    pub fn diff_staged(&self, object_id: &str) -> Result<Vec<Diff>> {
        self.ensure_open()?;

        if !self.staging_root.exists() {
            return Ok(Vec::new());
        }

        match self.get_staging()?.get_inventory(object_id) {
            Err(RocflError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
            Ok(inventory) => inventory.diff_versions(None, inventory.head),
        }
    }

    /// Completely removes the specified object from the repository. If the object doest not exist,
    /// nothing happens.
    pub fn purge_object(&self, object_id: &str) -> Result<()> {
        self.ensure_open()?;

        if self.staging_root.exists() {
            self.get_staging()?.purge_object(object_id)?;
        }

        // Last chance for the user to have ctrl-c'd the operation
        if self.is_open() {
            self.store.purge_object(object_id)?;
            self.details_cache.delete(object_id)?;
        }

        Ok(())
    }

    /// Creates a brand new object and populates it in a single, atomic operation: `update_fn` is
    /// invoked with an `Updater` bound to the new object's first version, and its changes are
    /// committed as soon as it returns successfully. Fails if an object already exists with the
    /// same ID.
    #[allow(clippy::too_many_arguments)]
    pub fn put_object(
        &self,
        object_id: &str,
        digest_algorithm: DigestAlgorithm,
        content_dir: &str,
        padding_width: u32,
        version_info: CommitMeta,
        update_fn: impl FnOnce(&mut Updater<'_, FsOcflStore>) -> Result<()>,
    ) -> Result<()> {
        self.ensure_open()?;

        let object_id = object_id.trim();
        crate::ocfl::validate::validate_object_id(object_id)?;
        crate::ocfl::validate::validate_digest_algorithm(digest_algorithm)?;
        crate::ocfl::validate::validate_content_dir(content_dir)?;

        let _lock = self.get_lock_manager()?.acquire(object_id)?;

        match self.store.get_inventory(object_id) {
            Err(RocflError::NotFound(_)) => (),
            Err(e) => return Err(e),
            _ => {
                return Err(RocflError::IllegalState(format!(
                    "Cannot create object {} because it already exists",
                    object_id
                )));
            }
        }

        let version_num = VersionNum::with_width(1, padding_width);

        let mut inventory = Inventory::builder(object_id)
            .with_digest_algorithm(digest_algorithm)
            .with_content_directory(content_dir)
            .with_head(version_num)
            .build()?;

        let staging = self.get_staging()?;
        staging.stage_object(&mut inventory)?;

        {
            let mut updater = Updater::new(&mut inventory, staging);
            update_fn(&mut updater)?;
        }

        inventory.head_version_mut().update_meta(version_info);
        self.finalize_commit(inventory)
    }

    /// Applies a batch of changes to an object and immediately commits them as a new version.
    /// The object may already exist, or have changes already staged from a prior call to
    /// `stage_changes`; either way, `update_fn` is applied on top of whatever is currently
    /// staged and the result is committed.
    pub fn update_object(
        &self,
        object_id: &str,
        version_info: CommitMeta,
        update_fn: impl FnOnce(&mut Updater<'_, FsOcflStore>) -> Result<()>,
    ) -> Result<()> {
        self.ensure_open()?;

        let mut inventory = self.stage_update(object_id, update_fn)?;
        inventory.head_version_mut().update_meta(version_info);
        self.finalize_commit(inventory)
    }

    /// Applies a batch of changes to an object's staged version without committing them. The
    /// changes are visible via `get_staged_object`/`diff_staged` until either
    /// `commit_staged_changes` or `purge_staged_changes` is called.
    pub fn stage_changes(
        &self,
        object_id: &str,
        update_fn: impl FnOnce(&mut Updater<'_, FsOcflStore>) -> Result<()>,
    ) -> Result<()> {
        self.ensure_open()?;
        self.stage_update(object_id, update_fn)?;
        Ok(())
    }

    fn stage_update(
        &self,
        object_id: &str,
        update_fn: impl FnOnce(&mut Updater<'_, FsOcflStore>) -> Result<()>,
    ) -> Result<Inventory> {
        let _lock = self.get_lock_manager()?.acquire(object_id)?;

        let mut inventory = self.get_or_created_staged_inventory(object_id)?;
        let staging = self.get_staging()?;

        {
            let mut updater = Updater::new(&mut inventory, staging);
            update_fn(&mut updater)?;
        }

        inventory.head_version_mut().created = Local::now();
        staging.stage_inventory(&inventory, false, false)?;

        Ok(inventory)
    }

    /// Commits all of an object's staged changes as a new version.
    ///
    /// If the object has no staged changes, a `RocflError::General` error is returned.
    pub fn commit_staged_changes(&self, object_id: &str, version_info: CommitMeta) -> Result<()> {
        self.ensure_open()?;

        let staging = self.get_staging()?;
        let _lock = self.get_lock_manager()?.acquire(object_id)?;

        let mut inventory = match staging.get_inventory(object_id) {
            Ok(inventory) => inventory,
            Err(RocflError::NotFound(_)) => {
                return Err(RocflError::General(format!(
                    "No staged changes found for object {}",
                    object_id
                )));
            }
            Err(e) => return Err(e),
        };

        inventory.head_version_mut().update_meta(version_info);
        self.finalize_commit(inventory)
    }

    /// Discards all of an object's staged changes, leaving the previously committed version
    /// untouched. If the object has no staged changes, nothing happens.
    pub fn purge_staged_changes(&self, object_id: &str) -> Result<()> {
        self.ensure_open()?;

        if self.staging_root.exists() {
            self.get_staging()?.purge_object(object_id)
        } else {
            Ok(())
        }
    }

    /// Creates a new version of an object whose state is an exact copy of an earlier version's
    /// state. No content is duplicated; the new version's manifest entries point at the same
    /// digests the source version used.
    pub fn rollback_to_version(
        &self,
        object_id: &str,
        version_num: VersionNum,
        version_info: CommitMeta,
    ) -> Result<()> {
        self.reinstate_version(object_id, version_num, version_info)
    }

    /// Creates a new version of an object whose state is an exact copy of an earlier version's
    /// state, without altering that earlier version. Unlike `rollback_to_version`, this is meant
    /// to be used when an object's HEAD has moved on and an old version should simply be
    /// replayed as the new HEAD rather than undoing intervening versions.
    pub fn replicate_version_as_head(
        &self,
        object_id: &str,
        version_num: VersionNum,
        version_info: CommitMeta,
    ) -> Result<()> {
        self.reinstate_version(object_id, version_num, version_info)
    }

    fn reinstate_version(
        &self,
        object_id: &str,
        version_num: VersionNum,
        version_info: CommitMeta,
    ) -> Result<()> {
        self.ensure_open()?;

        let _lock = self.get_lock_manager()?.acquire(object_id)?;

        let mut inventory = self.get_or_created_staged_inventory(object_id)?;

        let target_paths: Vec<Rc<LogicalPath>> = inventory
            .get_version(version_num)?
            .state_iter()
            .map(|(path, _digest)| path.clone())
            .collect();

        inventory.head_version_mut().remove_state();

        for path in &target_paths {
            inventory.copy_file_to_head(version_num, path, path.as_ref().clone())?;
        }

        inventory.head_version_mut().update_meta(version_info);
        self.finalize_commit(inventory)
    }

    /// Writes every file in an object's version state out to `destination` on the local
    /// filesystem, recreating the object's logical layout (not the OCFL on-disk structure).
    pub fn export_object(&self, object_id: &str, destination: impl AsRef<Path>) -> Result<()> {
        self.export_version(object_id, None, destination)
    }

    /// Same as `export_object`, but for a specific version of the object.
    pub fn export_version(
        &self,
        object_id: &str,
        version_num: Option<VersionNum>,
        destination: impl AsRef<Path>,
    ) -> Result<()> {
        self.ensure_open()?;

        let destination = destination.as_ref();
        let object = self.get_object(object_id, version_num)?;

        for (logical_path, _details) in &object.state {
            let dst_path = destination.join(logical_path.as_ref().as_path());

            if let Some(parent) = dst_path.parent() {
                fs::create_dir_all(parent)?;
            }

            let mut file = fs::File::create(&dst_path)?;
            self.get_object_file(object_id, logical_path, version_num, &mut file)?;
        }

        Ok(())
    }

    /// Imports a directory tree on the local filesystem as a brand new object, adding every file
    /// beneath `source` to the object's first version. Fails if an object already exists with the
    /// same ID.
    #[allow(clippy::too_many_arguments)]
    pub fn import_object(
        &self,
        object_id: &str,
        source: impl AsRef<Path>,
        digest_algorithm: DigestAlgorithm,
        content_dir: &str,
        padding_width: u32,
        version_info: CommitMeta,
    ) -> Result<()> {
        let source = source.as_ref().to_path_buf();

        self.put_object(
            object_id,
            digest_algorithm,
            content_dir,
            padding_width,
            version_info,
            move |updater| {
                updater.add_path(
                    &source,
                    "",
                    true,
                    crate::ocfl::updater::AddOptions::new(),
                )
            },
        )
    }

    /// Validates the specified object and returns any problems found. Err will only be returned
    /// if a non-validation problem was encountered.
    pub fn validate_object(
        &self,
        object_id: &str,
        fixity_check: bool,
    ) -> Result<ObjectValidationResult> {
        self.ensure_open()?;
        self.store.validate_object(object_id, fixity_check)
    }

    /// Validates the object at `object_root`, a path relative the storage root, without
    /// requiring the object's ID to be known ahead of time. Err is only returned if a
    /// non-validation problem was encountered.
    pub fn validate_object_at(
        &self,
        object_root: &str,
        fixity_check: bool,
    ) -> Result<ObjectValidationResult> {
        self.ensure_open()?;
        self.store.validate_object_at(object_root, fixity_check)
    }

    /// Validates the structure of the repository and all of the objects in it. The storage root
    /// is validated immediately; the rest of the repository is validated lazily as the returned
    /// iterator is consumed.
    pub fn validate_repo(&self, fixity_check: bool) -> Result<Box<dyn IncrementalValidator + '_>> {
        self.ensure_open()?;
        self.store.validate_repo(fixity_check)
    }

    /// Drops any cached bookkeeping this repository holds about an object, forcing the next read
    /// of it to go back to storage.
    pub fn invalidate_cache(&self, object_id: &str) -> Result<()> {
        self.details_cache.delete(object_id)
    }

    /// Attempts to get the inventory from staging. If it is not found, it is loaded from the
    /// main repo, and moved into staging. If it is not found in the main repo, then an error is
    /// returned.
    fn get_or_created_staged_inventory(&self, object_id: &str) -> Result<Inventory> {
        let staging = self.get_staging()?;

        match staging.get_inventory(object_id) {
            Ok(inventory) => Ok(inventory),
            Err(RocflError::NotFound(_)) => {
                let mut inventory = self.store.get_inventory(object_id)?;

                if inventory.mutable_head {
                    return Err(RocflError::IllegalState(
                        "Cannot stage changes for object because it has an active mutable HEAD."
                            .to_string(),
                    ));
                }

                for extension in self.store.list_object_extensions(object_id)? {
                    if !SUPPORTED_EXTENSIONS.contains(&extension.as_ref()) {
                        warn!("Object {} uses unsupported extension {}. Modifying this object may have unintended consequences.",
                              object_id, extension);
                    }
                }

                inventory.create_staging_head()?;
                staging.stage_object(&mut inventory)?;
                Ok(inventory)
            }
            Err(e) => Err(e),
        }
    }

    /// Attempts to load the object's inventory from staging. If it does not exist,
    /// then `RocflError::NotFound` is returned.
    fn get_staged_inventory(&self, object_id: &str) -> Result<Inventory> {
        if !self.staging_root.exists() {
            return Err(RocflError::NotFound(format!(
                "{} does not have a staged version.",
                object_id
            )));
        }

        match self.get_staging()?.get_inventory(object_id) {
            Ok(inventory) => Ok(inventory),
            Err(RocflError::NotFound(_)) => Err(RocflError::NotFound(format!(
                "{} does not have a staged version.",
                object_id
            ))),
            Err(e) => Err(e),
        }
    }

    /// Finalizes a staged inventory: dedups content added within the version being committed,
    /// writes the final inventory, moves the version into the main repository, and records the
    /// resulting HEAD state in the details cache.
    fn finalize_commit(&self, mut inventory: Inventory) -> Result<()> {
        let staging = self.get_staging()?;

        let duplicates = inventory.dedup_head();

        staging.stage_inventory(&inventory, true, true)?;
        staging.rm_staged_files(
            &inventory,
            &duplicates
                .iter()
                .map(|p| p.as_ref())
                .collect::<Vec<_>>(),
        )?;
        staging.rm_orphaned_files(&inventory)?;

        // Last chance to ctrl-c before committing
        if self.is_open() {
            if inventory.is_new() {
                let object_root = PathBuf::from(&inventory.storage_path);
                self.store
                    .write_new_object(&mut inventory, &object_root, None)?;
            } else {
                let version_root = paths::version_path(&inventory.storage_path, inventory.head);
                self.store
                    .write_new_version(&mut inventory, &version_root)?;
            }

            staging.purge_object(&inventory.id)?;

            self.details_cache.upsert(ObjectDetailsRow {
                object_id: inventory.id.clone(),
                version_num: inventory.head,
                revision_num: None,
                object_root_path: inventory.storage_path.clone(),
                inventory_digest: String::new(),
                digest_algorithm: inventory.digest_algorithm.to_string(),
                inventory_bytes: None,
                update_timestamp: Local::now().timestamp(),
            })?;
        }

        Ok(())
    }

    fn get_staging(&self) -> Result<&FsOcflStore> {
        // This is deferred so that the extension directories are only created if needed
        self.staging.get_or_try_init(|| {
            FsOcflStore::init_if_needed(
                &self.staging_root,
                StorageLayout::new(LayoutExtensionName::HashedNTupleLayout, None)?,
            )
        })
    }

    fn get_lock_manager(&self) -> Result<&StagingLockManager> {
        // Staging must exist first
        self.get_staging()?;
        // This is deferred so that the extension directories are only created if needed
        self.staging_lock_manager
            .get_or_try_init(|| -> Result<StagingLockManager> {
                let dir = paths::locks_extension_path(&self.staging_root);
                fs::create_dir_all(&dir)?;
                StagingLockManager::new(dir)
            })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(RocflError::Closed)
        } else {
            Ok(())
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn is_open(&self) -> bool {
        !self.is_closed()
    }
}

/// An iterator that adapts the output of a delegate `Inventory` iterator into another type.
/// Errors produced by the delegate iterator are logged and skipped rather than ending iteration.
struct InventoryAdapterIter<'a, T> {
    iter: Box<dyn Iterator<Item = Result<Inventory>> + 'a>,
    adapter: Box<dyn Fn(Inventory) -> Result<T>>,
}

impl<'a, T> InventoryAdapterIter<'a, T> {
    /// Creates a new `InventoryAdapterIter` that applies the `adapter` closure to the output
    /// of every `next()` call.
    fn new(
        iter: Box<dyn Iterator<Item = Result<Inventory>> + 'a>,
        adapter: impl Fn(Inventory) -> Result<T> + 'a + 'static,
    ) -> Self {
        Self {
            iter,
            adapter: Box::new(adapter),
        }
    }
}

impl<'a, T> Iterator for InventoryAdapterIter<'a, T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        match self.iter.next() {
            None => None,
            Some(Err(e)) => {
                error!("{:#}", e);
                self.next()
            }
            Some(Ok(inventory)) => match (self.adapter)(inventory) {
                Ok(adapted) => Some(adapted),
                Err(e) => {
                    error!("{:#}", e);
                    self.next()
                }
            },
        }
    }
}
