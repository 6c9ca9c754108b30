// Defaults retained for backwards-compatible construction of new repositories; actual
// storage/object roots may declare either spec version, resolved through `SpecVersion`.
pub const REPO_NAMASTE_FILE: &str = "0=ocfl_1.0";
pub const OBJECT_NAMASTE_FILE: &str = "0=ocfl_object_1.0";
pub const REPO_NAMASTE_FILE_PREFIX: &str = "0=ocfl_";
pub const OBJECT_NAMASTE_FILE_PREFIX: &str = "0=ocfl_object_";
pub const INVENTORY_FILE: &str = "inventory.json";
pub const OCFL_LAYOUT_FILE: &str = "ocfl_layout.json";
pub const OCFL_SPEC_FILE: &str = "ocfl_1.0.txt";
pub const EXTENSIONS_DIR: &str = "extensions";
pub const EXTENSIONS_CONFIG_FILE: &str = "config.json";
pub const OCFL_VERSION: &str = "ocfl_1.0";
pub const OCFL_OBJECT_VERSION: &str = "ocfl_object_1.0";
pub const INVENTORY_TYPE: &str = "https://ocfl.io/1.0/spec/#inventory";

pub const DEFAULT_CONTENT_DIR: &str = "content";

pub const MUTABLE_HEAD_EXT_DIR: &str = "extensions/0005-mutable-head";
pub const MUTABLE_HEAD_INVENTORY_FILE: &str = "extensions/0005-mutable-head/head/inventory.json";
pub const MUTABLE_HEAD_REVISIONS_DIR: &str = "extensions/0005-mutable-head/revisions";

pub const FLAT_DIRECT_LAYOUT_EXTENSION: &str = "0002-flat-direct-storage-layout";
pub const HASHED_NTUPLE_OBJECT_ID_LAYOUT_EXTENSION: &str = "0003-hash-and-id-n-tuple-storage-layout";
pub const HASHED_NTUPLE_LAYOUT_EXTENSION: &str = "0004-hashed-n-tuple-storage-layout";
pub const MUTABLE_HEAD_EXTENSION: &str = "0005-mutable-head";
pub const FLAT_OMIT_PREFIX_LAYOUT_EXTENSION: &str = "0006-flat-omit-prefix-storage-layout";
pub const NTUPLE_OMIT_PREFIX_LAYOUT_EXTENSION: &str = "0007-n-tuple-omit-prefix-storage-layout";
pub const PAIR_TREE_ID_ENCAPSULATION_LAYOUT_EXTENSION: &str = "pair-tree-id-encapsulation";
pub const ROCFL_STAGING_EXTENSION: &str = "rocfl-staging";
pub const ROCFL_LOCKS_EXTENSION: &str = "rocfl-locks";

pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    FLAT_DIRECT_LAYOUT_EXTENSION,
    HASHED_NTUPLE_OBJECT_ID_LAYOUT_EXTENSION,
    HASHED_NTUPLE_LAYOUT_EXTENSION,
    MUTABLE_HEAD_EXTENSION,
    FLAT_OMIT_PREFIX_LAYOUT_EXTENSION,
    NTUPLE_OMIT_PREFIX_LAYOUT_EXTENSION,
    PAIR_TREE_ID_ENCAPSULATION_LAYOUT_EXTENSION,
    ROCFL_STAGING_EXTENSION,
    ROCFL_LOCKS_EXTENSION,
];
