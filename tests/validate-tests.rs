//! Exercises the fixity validator: every content file referenced from an object's manifest must
//! be present and hash to the digest recorded for it, and every inventory sidecar's digest must
//! match the bytes of the inventory it describes.

use std::fs;
use std::path::PathBuf;

use assert_fs::prelude::*;
use assert_fs::TempDir;
use ocfl_core::ocfl::{
    AddOptions, CommitMeta, DigestAlgorithm, ErrorCode, LayoutExtensionName, ObjectValidationResult,
    OcflRepo, ProblemLocation, StorageLayout, WarnCode,
};

mod common;

use common::create_file;

const LAYOUT: &str = r#"{
  "extensionName": "0003-hash-and-id-n-tuple-storage-layout",
  "digestAlgorithm": "sha256",
  "tupleSize": 3,
  "numberOfTuples": 3
}"#;

/// A repo under test plus the absolute filesystem path to its storage root.
struct TestRepo {
    _temp: TempDir,
    repo: OcflRepo,
    storage_root: PathBuf,
}

impl TestRepo {
    /// Absolute path to a file inside the object rooted at `object_root_rel`.
    fn abs(&self, object_root_rel: &str, rel: &str) -> PathBuf {
        self.storage_root.join(object_root_rel).join(rel)
    }
}

#[test]
fn valid_object_has_no_errors() {
    let (test_repo, object_id, _root) = new_object_repo();

    let result = test_repo.repo.validate_object(&object_id, true).unwrap();

    no_errors(&result);
    no_warnings(&result);
}

#[test]
fn missing_inventory_reports_e063() {
    let (test_repo, _object_id, root) = new_object_repo();

    fs::remove_file(test_repo.abs(&root, "inventory.json")).unwrap();

    let result = test_repo.repo.validate_object_at(&root, true).unwrap();

    has_errors(
        &result,
        &[object_root_error(
            ErrorCode::E063,
            &format!("Object at '{}' does not contain an inventory.json", root),
        )],
    );
}

#[test]
fn corrupt_inventory_json_reports_e033() {
    let (test_repo, _object_id, root) = new_object_repo();

    fs::write(test_repo.abs(&root, "inventory.json"), b"not json").unwrap();

    let result = test_repo.repo.validate_object_at(&root, true).unwrap();

    assert_eq!(1, result.errors.len());
    assert_eq!(ErrorCode::E033, result.errors[0].code);
    assert_eq!(ProblemLocation::ObjectRoot, result.errors[0].location);
}

#[test]
fn missing_sidecar_reports_e061() {
    let (test_repo, _object_id, root) = new_object_repo();

    fs::remove_file(test_repo.abs(&root, "inventory.json.sha512")).unwrap();

    let result = test_repo.repo.validate_object_at(&root, true).unwrap();

    has_errors(
        &result,
        &[object_root_error(
            ErrorCode::E061,
            "Inventory sidecar 'inventory.json.sha512' does not exist",
        )],
    );
}

#[test]
fn sidecar_digest_mismatch_reports_e060() {
    let (test_repo, _object_id, root) = new_object_repo();

    fs::write(
        test_repo.abs(&root, "inventory.json.sha512"),
        "0000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000  inventory.json\n",
    )
    .unwrap();

    let result = test_repo.repo.validate_object_at(&root, true).unwrap();

    assert_eq!(1, result.errors.len());
    assert_eq!(ErrorCode::E060, result.errors[0].code);
    assert_eq!(ProblemLocation::ObjectRoot, result.errors[0].location);
}

#[test]
fn content_digest_mismatch_reports_e093() {
    let (test_repo, _object_id, root) = new_object_repo();

    fs::write(test_repo.abs(&root, "v1/content/test.txt"), "tampered").unwrap();

    let result = test_repo.repo.validate_object_at(&root, true).unwrap();

    assert_eq!(1, result.errors.len());
    assert_eq!(ErrorCode::E093, result.errors[0].code);
    assert_eq!(
        ProblemLocation::ContentFile("v1/content/test.txt".to_string()),
        result.errors[0].location
    );
}

#[test]
fn content_digest_mismatch_not_checked_without_fixity_check() {
    let (test_repo, _object_id, root) = new_object_repo();

    fs::write(test_repo.abs(&root, "v1/content/test.txt"), "tampered").unwrap();

    let result = test_repo.repo.validate_object_at(&root, false).unwrap();

    no_errors(&result);
}

#[test]
fn missing_content_file_reports_e092() {
    let (test_repo, _object_id, root) = new_object_repo();

    fs::remove_file(test_repo.abs(&root, "v1/content/test.txt")).unwrap();

    let result = test_repo.repo.validate_object_at(&root, true).unwrap();

    assert_eq!(1, result.errors.len());
    assert_eq!(ErrorCode::E092, result.errors[0].code);
    assert_eq!(
        ProblemLocation::ContentFile("v1/content/test.txt".to_string()),
        result.errors[0].location
    );
}

#[test]
fn validate_repo_root_has_no_errors() {
    let (test_repo, _ids) = new_repo_with_objects(2);

    let mut validator = test_repo.repo.validate_repo(true).unwrap();

    let root_result = validator.next().unwrap().unwrap();
    assert!(root_result.object_id.is_none());
    no_errors(&root_result);
    no_warnings(&root_result);

    let mut object_count = 0;
    for result in validator {
        let result = result.unwrap();
        no_errors(&result);
        no_warnings(&result);
        object_count += 1;
    }

    assert_eq!(2, object_count);
}

#[test]
fn validate_repo_reports_missing_root_declaration() {
    let test_repo = new_empty_repo();

    fs::remove_file(test_repo.storage_root.join("0=ocfl_1.0")).unwrap();

    let mut validator = test_repo.repo.validate_repo(true).unwrap();

    let root_result = validator.next().unwrap().unwrap();
    assert!(root_result.object_id.is_none());
    has_errors(
        &root_result,
        &[ValidationErrorExpectation {
            code: ErrorCode::E001,
            location: ProblemLocation::StorageRoot,
            text: "Storage root does not contain an OCFL root version declaration".to_string(),
        }],
    );
}

#[test]
fn validate_repo_reports_unreadable_layout() {
    let test_repo = new_empty_repo();

    fs::write(test_repo.storage_root.join("ocfl_layout.json"), "not json").unwrap();

    let mut validator = test_repo.repo.validate_repo(true).unwrap();

    let root_result = validator.next().unwrap().unwrap();
    no_errors(&root_result);
    assert_eq!(1, root_result.warnings.len());
    assert_eq!(WarnCode::W004, root_result.warnings[0].code);
    assert_eq!(ProblemLocation::StorageRoot, root_result.warnings[0].location);
    assert_eq!(
        "ocfl_layout.json is present but could not be read",
        root_result.warnings[0].text
    );
}

struct ValidationErrorExpectation {
    code: ErrorCode,
    location: ProblemLocation,
    text: String,
}

fn object_root_error(code: ErrorCode, text: &str) -> ValidationErrorExpectation {
    ValidationErrorExpectation {
        code,
        location: ProblemLocation::ObjectRoot,
        text: text.to_string(),
    }
}

fn has_errors(result: &ObjectValidationResult, expected: &[ValidationErrorExpectation]) {
    assert_eq!(
        expected.len(),
        result.errors.len(),
        "Expected errors {:?}; found {:?}",
        expected.iter().map(|e| &e.text).collect::<Vec<_>>(),
        result.errors
    );
    for (actual, expected) in result.errors.iter().zip(expected) {
        assert_eq!(expected.code, actual.code);
        assert_eq!(expected.location, actual.location);
        assert_eq!(expected.text, actual.text);
    }
}

fn no_errors(result: &ObjectValidationResult) {
    assert!(!result.has_errors(), "Expected no errors; found {:?}", result.errors);
}

fn no_warnings(result: &ObjectValidationResult) {
    assert!(
        result.warnings.is_empty(),
        "Expected no warnings; found {:?}",
        result.warnings
    );
}

/// Creates a new repo on disk containing a single object with one file, `test.txt`, and returns
/// the test repo, the object's id, and its root path relative to the storage root.
fn new_object_repo() -> (TestRepo, String, String) {
    let (test_repo, ids) = new_repo_with_objects(1);
    let object_id = ids.into_iter().next().unwrap();
    let details = test_repo.repo.get_object_details(&object_id, None).unwrap();
    let root = details.object_root.clone();
    (test_repo, object_id, root)
}

fn new_repo_with_objects(count: usize) -> (TestRepo, Vec<String>) {
    let temp = TempDir::new().unwrap();
    let storage_root_child = temp.child("repo");
    storage_root_child.create_dir_all().unwrap();
    let storage_root = storage_root_child.path().to_path_buf();

    let layout = StorageLayout::new(
        LayoutExtensionName::HashedNTupleObjectIdLayout,
        Some(LAYOUT.as_bytes()),
    )
    .unwrap();

    let repo = OcflRepo::init_fs_repo(&storage_root, layout).unwrap();

    let mut ids = Vec::new();
    for i in 0..count {
        let object_id = format!("object-{}", i);
        let source = create_file(&temp, &format!("source-{}/test.txt", i), "testing");

        repo.put_object(
            &object_id,
            DigestAlgorithm::Sha512,
            "content",
            0,
            CommitMeta::new(),
            |updater| updater.add_path(source.path(), "test.txt", false, AddOptions::new()),
        )
        .unwrap();

        ids.push(object_id);
    }

    let test_repo = TestRepo {
        _temp: temp,
        repo,
        storage_root,
    };

    (test_repo, ids)
}

fn new_empty_repo() -> TestRepo {
    let temp = TempDir::new().unwrap();
    let storage_root_child = temp.child("repo");
    storage_root_child.create_dir_all().unwrap();
    let storage_root = storage_root_child.path().to_path_buf();

    let layout = StorageLayout::new(
        LayoutExtensionName::HashedNTupleObjectIdLayout,
        Some(LAYOUT.as_bytes()),
    )
    .unwrap();

    let repo = OcflRepo::init_fs_repo(&storage_root, layout).unwrap();

    TestRepo {
        _temp: temp,
        repo,
        storage_root,
    }
}
