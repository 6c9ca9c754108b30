//! Applies changes to the staged HEAD version of an object, following the dedup-at-commit design
//! used by the rest of the version construction pipeline: every file added here is staged
//! unconditionally, and duplicate content introduced within the same version is only cleaned up
//! when the version is committed (see `Inventory::dedup_head`).

use std::collections::HashSet;
use std::convert::TryInto;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::info;
use walkdir::WalkDir;

use crate::ocfl::digest::HexDigest;
use crate::ocfl::error::{Result, RocflError};
use crate::ocfl::inventory::Inventory;
use crate::ocfl::store::StagingStore;
use crate::ocfl::{util, DigestAlgorithm, LogicalPath, VersionNum};

/// Options that control how a single file is added to a staged version.
#[derive(Debug, Copy, Clone, Default)]
pub struct AddOptions {
    /// When `false` (the default), adding a file at a logical path that's already present in the
    /// staged version fails with `RocflError::Overwrite`. When `true`, the existing entry is
    /// replaced.
    pub overwrite: bool,
}

impl AddOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

/// Applies a batch of changes to an object's staged HEAD version. An `Updater` borrows the
/// object's in-progress inventory and the staging store it's backed by; none of the changes it
/// makes are durable until the repository commits the staged version.
pub struct Updater<'a, S: StagingStore> {
    inventory: &'a mut Inventory,
    staging: &'a S,
}

impl<'a, S: StagingStore> Updater<'a, S> {
    pub(crate) fn new(inventory: &'a mut Inventory, staging: &'a S) -> Self {
        Self { inventory, staging }
    }

    /// Adds `source` to the object at `destination`. If `source` is a directory, `recursive` must
    /// be set, and every file beneath it is added, preserving its path relative `source` under
    /// `destination`.
    pub fn add_path(
        &mut self,
        source: impl AsRef<Path>,
        destination: &str,
        recursive: bool,
        options: AddOptions,
    ) -> Result<()> {
        let source = source.as_ref();

        if !source.exists() {
            return Err(RocflError::IllegalArgument(format!(
                "Failed to add {}: Does not exist",
                source.to_string_lossy()
            )));
        }

        if source.is_file() {
            let logical_path: LogicalPath = destination.try_into()?;
            return self.add_file_path(source, logical_path, options);
        }

        if !recursive {
            return Err(RocflError::IllegalArgument(format!(
                "Cannot add directory {} without enabling recursion",
                source.to_string_lossy()
            )));
        }

        for entry in WalkDir::new(source) {
            let entry = entry?;
            if entry.file_type().is_file() {
                let logical_path = logical_path_in_dst_dir(entry.path(), source, destination)?;
                self.add_file_path(entry.path(), logical_path, options)?;
            }
        }

        Ok(())
    }

    fn add_file_path(
        &mut self,
        file: &Path,
        logical_path: LogicalPath,
        options: AddOptions,
    ) -> Result<()> {
        self.check_overwrite(&logical_path, options)?;

        let mut reader = self.inventory.digest_algorithm.reader(File::open(file)?);

        info!(
            "Adding file {} to object at {}",
            file.to_string_lossy(),
            logical_path
        );

        self.staging
            .stage_file_copy(self.inventory, &mut reader, &logical_path)?;
        let digest = reader.finalize_hex();
        self.inventory.add_file_to_head(digest, logical_path)
    }

    /// Streams `source` directly into the object at `logical_path` without reading it from the
    /// filesystem first, eg content that was received over the network.
    pub fn write_file(
        &mut self,
        mut source: impl Read,
        logical_path: LogicalPath,
        options: AddOptions,
    ) -> Result<()> {
        self.check_overwrite(&logical_path, options)?;

        let mut reader = self.inventory.digest_algorithm.reader(&mut source);

        self.staging
            .stage_file_copy(self.inventory, &mut reader, &logical_path)?;
        let digest = reader.finalize_hex();
        self.inventory.add_file_to_head(digest, logical_path)
    }

    /// Adds `source` to the object at `logical_path`, trusting `digest` as the file's content
    /// digest rather than computing it. Intended for bulk imports where the digest was already
    /// verified by the caller; supplying an incorrect digest silently breaks the object's fixity
    /// guarantees.
    pub fn unsafe_add_path(
        &mut self,
        source: impl AsRef<Path>,
        logical_path: LogicalPath,
        digest: HexDigest,
        options: AddOptions,
    ) -> Result<()> {
        self.check_overwrite(&logical_path, options)?;

        let source = source.as_ref();

        info!(
            "Adding file {} to object at {} without validating its digest",
            source.to_string_lossy(),
            logical_path
        );

        self.staging
            .stage_file_move(self.inventory, &source, &logical_path)?;
        self.inventory.add_file_to_head(digest, logical_path)
    }

    /// Removes a file from the staged version's state. The file remains reachable from earlier
    /// versions unless it was added in this same version, in which case its staged content is
    /// deleted as well.
    pub fn remove_file(&mut self, logical_path: &LogicalPath) -> Result<()> {
        if let Some(content_path) = self.inventory.remove_logical_path_from_head(logical_path) {
            self.staging
                .rm_staged_files(self.inventory, &[&content_path])?;
        }
        Ok(())
    }

    /// Renames a file within the staged version. Fails if `src_logical_path` does not exist.
    pub fn rename_file(
        &mut self,
        src_logical_path: &LogicalPath,
        dst_logical_path: LogicalPath,
        options: AddOptions,
    ) -> Result<()> {
        self.check_overwrite(&dst_logical_path, options)?;
        self.inventory
            .move_file_in_head(src_logical_path, dst_logical_path)
    }

    /// Restores a file that existed in an earlier version of the object, placing it at
    /// `dst_logical_path` in the staged version. No content is copied: the destination is simply
    /// pointed at the digest the file already had.
    pub fn reinstate_file(
        &mut self,
        src_version_num: VersionNum,
        src_logical_path: &LogicalPath,
        dst_logical_path: LogicalPath,
        options: AddOptions,
    ) -> Result<()> {
        self.check_overwrite(&dst_logical_path, options)?;
        self.inventory
            .copy_file_to_head(src_version_num, src_logical_path, dst_logical_path)
    }

    /// Records an additional fixity digest for the file currently at `logical_path`. The file
    /// must already exist in the staged version.
    pub fn add_fixity(
        &mut self,
        logical_path: &LogicalPath,
        algorithm: DigestAlgorithm,
        digest: HexDigest,
    ) -> Result<()> {
        let primary_digest = match self.inventory.head_version().lookup_digest(logical_path) {
            Some(digest) => digest.clone(),
            None => {
                return Err(RocflError::NotFound(format!(
                    "Path {} not found in object {}",
                    logical_path, self.inventory.id
                )))
            }
        };

        let content_paths = match self.inventory.manifest().get_paths(&primary_digest) {
            Some(paths) => paths.clone(),
            None => return Ok(()),
        };

        let fixity = self.inventory.fixity.get_or_insert_with(Default::default);
        let digests = fixity.entry(algorithm.to_string()).or_insert_with(Default::default);
        let paths = digests.entry(digest.to_string()).or_insert_with(Vec::new);

        for content_path in content_paths {
            let content_path = content_path.to_string();
            if !paths.contains(&content_path) {
                paths.push(content_path);
            }
        }

        Ok(())
    }

    /// Clears recorded fixity information. When `logical_path` is `Some`, only the entries
    /// covering that file's content path are removed; when `None`, all fixity information on the
    /// object is discarded.
    pub fn clear_fixity(&mut self, logical_path: Option<&LogicalPath>) -> Result<()> {
        let content_paths = match logical_path {
            None => None,
            Some(logical_path) => {
                let digest = match self.inventory.head_version().lookup_digest(logical_path) {
                    Some(digest) => digest.clone(),
                    None => return Ok(()),
                };

                match self.inventory.manifest().get_paths(&digest) {
                    Some(paths) => Some(
                        paths
                            .iter()
                            .map(|path| path.to_string())
                            .collect::<HashSet<_>>(),
                    ),
                    None => return Ok(()),
                }
            }
        };

        let content_paths = match content_paths {
            None => {
                self.inventory.fixity = None;
                return Ok(());
            }
            Some(content_paths) => content_paths,
        };

        if let Some(fixity) = self.inventory.fixity.as_mut() {
            for digests in fixity.values_mut() {
                for paths in digests.values_mut() {
                    paths.retain(|path| !content_paths.contains(path));
                }
                digests.retain(|_, paths| !paths.is_empty());
            }
            fixity.retain(|_, digests| !digests.is_empty());
        }

        Ok(())
    }

    /// Empties the staged version's logical state, removing every file it references. Content
    /// that was added in this same version and is left unreferenced is cleaned up when the
    /// version is committed.
    pub fn clear_state(&mut self) {
        self.inventory.head_version_mut().remove_state();
    }

    fn check_overwrite(&self, logical_path: &LogicalPath, options: AddOptions) -> Result<()> {
        if !options.overwrite && self.inventory.head_version().is_file(logical_path) {
            return Err(RocflError::Overwrite(logical_path.to_string()));
        }
        Ok(())
    }
}

/// Computes the logical path `src` should be added at, given that the directory tree rooted at
/// `base` is being added under `dst`.
fn logical_path_in_dst_dir(
    src: impl AsRef<Path>,
    base: impl AsRef<Path>,
    dst: &str,
) -> Result<LogicalPath> {
    let mut logical_path = dst.to_string();
    if !logical_path.ends_with('/') {
        logical_path.push('/');
    }

    let relative_path = pathdiff::diff_paths(&src, &base).unwrap();
    let relative_str = relative_path.to_string_lossy();

    logical_path.push_str(&util::convert_backslash_to_forward(&relative_str));
    logical_path.as_str().try_into()
}

#[cfg(test)]
mod tests {
    use std::convert::TryInto;

    use super::*;

    #[test]
    fn logical_path_in_dst_dir_joins_relative_path() {
        let path = logical_path_in_dst_dir("/tmp/src/a/b.txt", "/tmp/src", "dst").unwrap();
        let expected: LogicalPath = "dst/a/b.txt".try_into().unwrap();
        assert_eq!(expected, path);
    }

    #[test]
    fn add_options_default_does_not_overwrite() {
        assert!(!AddOptions::new().overwrite);
        assert!(AddOptions::new().overwrite(true).overwrite);
    }
}
