//! Validation limited to fixity guarantees: that every content file referenced from an object's
//! manifest is present and hashes to the digest recorded for it, and that every inventory
//! sidecar's digest matches the bytes of the inventory it describes. Deep structural validation
//! of inventories against the full OCFL validation code catalog is not implemented here.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::collections::VecDeque;

use crate::ocfl::consts::*;
use crate::ocfl::error::{Result, RocflError};
use crate::ocfl::inventory::Inventory;
use crate::ocfl::paths;
use crate::ocfl::store::{Listing, Storage};
use crate::ocfl::DigestAlgorithm;

/// Where in an object or repository a validation problem was found.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ProblemLocation {
    /// The OCFL storage root, outside of any particular object.
    StorageRoot,
    /// An object's root, outside of any particular version.
    ObjectRoot,
    /// A content file, identified by its path relative the object root.
    ContentFile(String),
}

impl fmt::Display for ProblemLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProblemLocation::StorageRoot => write!(f, "storage root"),
            ProblemLocation::ObjectRoot => write!(f, "object root"),
            ProblemLocation::ContentFile(path) => write!(f, "content file '{}'", path),
        }
    }
}

/// Codes identifying the fixity problems this validator is able to detect. This is a narrow
/// subset of the official OCFL validation error catalog -- only the codes relevant to fixity --
/// rather than a full re-implementation of it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ErrorCode {
    /// The storage root does not contain an OCFL root version declaration
    E001,
    /// The object root does not contain an `inventory.json`
    E063,
    /// The inventory could not be parsed as JSON
    E033,
    /// The inventory sidecar is missing or malformed
    E061,
    /// The inventory's digest does not match the digest recorded in its sidecar
    E060,
    /// A content file referenced by the manifest could not be read
    E092,
    /// A content file's digest does not match the digest recorded for it in the manifest
    E093,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Codes identifying non-fatal fixity concerns.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum WarnCode {
    /// `ocfl_layout.json` is present but could not be read
    W004,
}

impl fmt::Display for WarnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ValidationError {
    pub code: ErrorCode,
    pub location: ProblemLocation,
    pub text: String,
}

impl ValidationError {
    fn new(code: ErrorCode, location: ProblemLocation, text: String) -> Self {
        Self {
            code,
            location,
            text,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ValidationWarning {
    pub code: WarnCode,
    pub location: ProblemLocation,
    pub text: String,
}

impl ValidationWarning {
    fn new(code: WarnCode, location: ProblemLocation, text: String) -> Self {
        Self {
            code,
            location,
            text,
        }
    }
}

/// The errors and warnings found validating the top-level structure of an OCFL storage root
/// (its namaste marker and `ocfl_layout.json`), independent of any particular object.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    fn new() -> Self {
        Self::default()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// The errors and warnings found validating a single OCFL object.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct ObjectValidationResult {
    pub object_id: Option<String>,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ObjectValidationResult {
    fn new(object_id: Option<String>) -> Self {
        Self {
            object_id,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn error(&mut self, code: ErrorCode, location: ProblemLocation, text: String) {
        self.errors.push(ValidationError::new(code, location, text));
    }

    fn warn(&mut self, code: WarnCode, location: ProblemLocation, text: String) {
        self.warnings
            .push(ValidationWarning::new(code, location, text));
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    fn extend_from_root(&mut self, root: ValidationResult) {
        self.errors.extend(root.errors);
        self.warnings.extend(root.warnings);
    }
}

/// Validates objects' fixity against whatever `Storage` backend they're persisted on.
pub struct Validator<S: Storage> {
    storage: S,
    closed: Arc<AtomicBool>,
}

impl<S: Storage> Validator<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Validates the presence of the storage root's namaste marker and, if present, confirms
    /// `ocfl_layout.json` can be read.
    pub fn validate_storage_root(&self) -> Result<ValidationResult> {
        let mut result = ValidationResult::new();

        let listing = self.storage.list("", false)?;

        let has_namaste = listing.iter().any(|entry| {
            matches!(entry, Listing::File(name) if name.starts_with(REPO_NAMASTE_FILE_PREFIX))
        });

        if !has_namaste {
            result.errors.push(ValidationError::new(
                ErrorCode::E001,
                ProblemLocation::StorageRoot,
                "Storage root does not contain an OCFL root version declaration".to_string(),
            ));
        }

        let has_layout = listing
            .iter()
            .any(|entry| matches!(entry, Listing::File(name) if name.as_ref() == OCFL_LAYOUT_FILE));

        if has_layout {
            let mut bytes = Vec::new();
            if self.storage.read(OCFL_LAYOUT_FILE, &mut bytes).is_err() {
                result.warnings.push(ValidationWarning::new(
                    WarnCode::W004,
                    ProblemLocation::StorageRoot,
                    "ocfl_layout.json is present but could not be read".to_string(),
                ));
            }
        }

        Ok(result)
    }

    /// Validates the object at `object_root`, relative the storage root. `object_id` is the
    /// expected OCFL object ID, checked against the inventory's `id` field when known.
    pub fn validate_object(
        &self,
        object_id: Option<&str>,
        object_root: &str,
        fixity_check: bool,
    ) -> Result<ObjectValidationResult> {
        let mut result = ObjectValidationResult::new(object_id.map(str::to_string));

        let inventory_path = paths::join(object_root, INVENTORY_FILE);
        let mut inventory_bytes = Vec::new();

        if self
            .storage
            .read(&inventory_path, &mut inventory_bytes)
            .is_err()
        {
            result.error(
                ErrorCode::E063,
                ProblemLocation::ObjectRoot,
                format!(
                    "Object at '{}' does not contain an inventory.json",
                    object_root
                ),
            );
            return Ok(result);
        }

        let inventory: Inventory = match serde_json::from_slice(&inventory_bytes) {
            Ok(inventory) => inventory,
            Err(e) => {
                result.error(
                    ErrorCode::E033,
                    ProblemLocation::ObjectRoot,
                    format!("Inventory could not be parsed: {}", e),
                );
                return Ok(result);
            }
        };

        self.validate_sidecar(object_root, &inventory, &inventory_bytes, &mut result)?;

        if let Some(expected_id) = object_id {
            if expected_id != inventory.id {
                result.error(
                    ErrorCode::E033,
                    ProblemLocation::ObjectRoot,
                    format!(
                        "Inventory id '{}' does not match expected object id '{}'",
                        inventory.id, expected_id
                    ),
                );
            }
        }

        self.validate_manifest(object_root, &inventory, fixity_check, &mut result)?;

        Ok(result)
    }

    fn validate_sidecar(
        &self,
        object_root: &str,
        inventory: &Inventory,
        inventory_bytes: &[u8],
        result: &mut ObjectValidationResult,
    ) -> Result<()> {
        let sidecar_name = paths::sidecar_name(inventory.digest_algorithm);
        let sidecar_rel = paths::join(object_root, &sidecar_name);

        let mut sidecar_bytes = Vec::new();
        if self.storage.read(&sidecar_rel, &mut sidecar_bytes).is_err() {
            result.error(
                ErrorCode::E061,
                ProblemLocation::ObjectRoot,
                format!("Inventory sidecar '{}' does not exist", sidecar_name),
            );
            return Ok(());
        }

        let contents = match String::from_utf8(sidecar_bytes) {
            Ok(contents) => contents,
            Err(_) => {
                result.error(
                    ErrorCode::E061,
                    ProblemLocation::ObjectRoot,
                    "Inventory sidecar contains invalid UTF-8".to_string(),
                );
                return Ok(());
            }
        };

        let expected_digest = match contents.split_whitespace().next() {
            Some(digest) if !digest.is_empty() => digest,
            _ => {
                result.error(
                    ErrorCode::E061,
                    ProblemLocation::ObjectRoot,
                    "Inventory sidecar is malformed".to_string(),
                );
                return Ok(());
            }
        };

        let actual_digest = inventory
            .digest_algorithm
            .hash_hex(&mut io::Cursor::new(inventory_bytes))?;

        if !expected_digest.eq_ignore_ascii_case(actual_digest.as_ref()) {
            result.error(
                ErrorCode::E060,
                ProblemLocation::ObjectRoot,
                format!(
                    "Inventory does not match the digest recorded in its sidecar. Expected: {}; Actual: {}",
                    expected_digest, actual_digest
                ),
            );
        }

        Ok(())
    }

    fn validate_manifest(
        &self,
        object_root: &str,
        inventory: &Inventory,
        fixity_check: bool,
        result: &mut ObjectValidationResult,
    ) -> Result<()> {
        for (digest, content_paths) in inventory.manifest().iter_id_paths() {
            for content_path in content_paths {
                let rel_path = paths::join(object_root, content_path.as_ref());

                let mut writer = inventory.digest_algorithm.writer(io::sink());

                match self.storage.read(&rel_path, &mut writer) {
                    Ok(()) => {
                        if fixity_check {
                            let actual = writer.finalize_hex();
                            if actual != **digest {
                                result.error(
                                    ErrorCode::E093,
                                    ProblemLocation::ContentFile(content_path.to_string()),
                                    format!(
                                        "Content file does not match the digest recorded in the manifest. Expected: {}; Actual: {}",
                                        digest, actual
                                    ),
                                );
                            }
                        }
                    }
                    Err(_) => {
                        result.error(
                            ErrorCode::E092,
                            ProblemLocation::ContentFile(content_path.to_string()),
                            "Content file referenced by the manifest could not be found"
                                .to_string(),
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Validates the storage root immediately and returns an iterator that lazily validates
    /// every object found within it.
    pub fn validate_repo(&self, fixity_check: bool) -> Result<IncrementalValidatorImpl<'_, S>> {
        let root_result = self.validate_storage_root()?;
        Ok(IncrementalValidatorImpl::new(self, fixity_check, root_result))
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Lazily iterates over the validation result of every object in a repository, plus a synthetic
/// first result for the storage root itself.
pub trait IncrementalValidator: Iterator<Item = Result<ObjectValidationResult>> {}

impl<T> IncrementalValidator for T where T: Iterator<Item = Result<ObjectValidationResult>> {}

pub struct IncrementalValidatorImpl<'a, S: Storage> {
    validator: &'a Validator<S>,
    fixity_check: bool,
    root_result: Option<ValidationResult>,
    pending_dirs: Vec<String>,
    pending_objects: VecDeque<String>,
}

impl<'a, S: Storage> IncrementalValidatorImpl<'a, S> {
    fn new(validator: &'a Validator<S>, fixity_check: bool, root_result: ValidationResult) -> Self {
        Self {
            validator,
            fixity_check,
            root_result: Some(root_result),
            pending_dirs: vec![String::new()],
            pending_objects: VecDeque::new(),
        }
    }

    fn is_object_root(listing: &[Listing]) -> bool {
        listing.iter().any(
            |entry| matches!(entry, Listing::File(name) if name.starts_with(OBJECT_NAMASTE_FILE_PREFIX)),
        )
    }
}

impl<'a, S: Storage> Iterator for IncrementalValidatorImpl<'a, S> {
    type Item = Result<ObjectValidationResult>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(root_result) = self.root_result.take() {
            let mut result = ObjectValidationResult::new(None);
            result.extend_from_root(root_result);
            return Some(Ok(result));
        }

        loop {
            if self.validator.is_closed() {
                return None;
            }

            if let Some(object_root) = self.pending_objects.pop_front() {
                return Some(
                    self.validator
                        .validate_object(None, &object_root, self.fixity_check),
                );
            }

            let dir = self.pending_dirs.pop()?;

            let listing = match self.validator.storage.list(&dir, false) {
                Ok(listing) => listing,
                Err(e) => return Some(Err(e)),
            };

            if Self::is_object_root(&listing) {
                self.pending_objects.push_back(dir);
                continue;
            }

            for entry in listing {
                if let Listing::Directory(name) = entry {
                    if name.as_ref() == EXTENSIONS_DIR {
                        continue;
                    }
                    let child = if dir.is_empty() {
                        name.into_owned()
                    } else {
                        format!("{}/{}", dir, name)
                    };
                    self.pending_dirs.push(child);
                }
            }
        }
    }
}

pub fn validate_object_id(object_id: &str) -> Result<()> {
    if object_id.trim().is_empty() {
        return Err(RocflError::IllegalArgument(
            "Object IDs may not be blank".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_digest_algorithm(digest_algorithm: DigestAlgorithm) -> Result<()> {
    if digest_algorithm != DigestAlgorithm::Sha512 && digest_algorithm != DigestAlgorithm::Sha256 {
        return Err(RocflError::IllegalArgument(format!(
            "The inventory digest algorithm must be sha512 or sha256. Found: {}",
            digest_algorithm
        )));
    }
    Ok(())
}

pub fn validate_content_dir(content_dir: &str) -> Result<()> {
    if content_dir.eq(".") || content_dir.eq("..") || content_dir.contains('/') {
        return Err(RocflError::IllegalArgument(format!(
            "The content directory cannot equal '.' or '..' and cannot contain a '/'. Found: {}",
            content_dir
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocfl::store::Listing;
    use std::collections::HashMap;

    struct MapStorage {
        files: HashMap<String, Vec<u8>>,
        dirs: HashMap<String, Vec<String>>,
    }

    impl Storage for MapStorage {
        fn read<W: std::io::Write>(&self, path: &str, sink: &mut W) -> Result<()> {
            match self.files.get(path) {
                Some(bytes) => {
                    sink.write_all(bytes)?;
                    Ok(())
                }
                None => Err(RocflError::NotFound(path.to_string())),
            }
        }

        fn list(&self, path: &str, _recursive: bool) -> Result<Vec<Listing>> {
            Ok(self
                .dirs
                .get(path)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|name| {
                    if name.contains('.') || name.starts_with("0=") {
                        Listing::file_owned(name)
                    } else {
                        Listing::dir_owned(name)
                    }
                })
                .collect())
        }
    }

    #[test]
    fn object_id_must_not_be_blank() {
        assert!(validate_object_id("").is_err());
        assert!(validate_object_id("  ").is_err());
        assert!(validate_object_id("foo").is_ok());
    }

    #[test]
    fn content_dir_rejects_dot_and_slash() {
        assert!(validate_content_dir(".").is_err());
        assert!(validate_content_dir("..").is_err());
        assert!(validate_content_dir("a/b").is_err());
        assert!(validate_content_dir("content").is_ok());
    }

    #[test]
    fn missing_inventory_is_reported() {
        let storage = MapStorage {
            files: HashMap::new(),
            dirs: HashMap::new(),
        };
        let validator = Validator::new(storage);

        let result = validator
            .validate_object(Some("obj1"), "obj1", true)
            .unwrap();

        assert!(result.has_errors());
        assert_eq!(result.errors[0].code, ErrorCode::E063);
    }
}
