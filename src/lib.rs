//! A storage-agnostic engine implementing the core of an
//! [OCFL repository](https://ocfl.io/): content-addressed, version-preserving object storage
//! with a self-describing on-disk/on-cloud layout.
//!
//! Create a new `OcflRepo` as follows:
//!
//! ```rust,no_run
//! use ocfl_core::ocfl::OcflRepo;
//!
//! let repo = OcflRepo::fs_repo("path/to/ocfl/storage/root");
//! ```

pub mod ocfl;
