//! Location identity, raw directory entries, and normalized file metadata for layerscope.
//!
//! This crate defines the value types shared by every other layer of the
//! workspace: identifier newtypes (`LayerId`, `ImageRef`, `Digest`), the
//! `Location` key, per-layer `DirectoryEntry` records, the cataloged
//! `FileMetadata` with its closed `FileType` classification, resolver `Scope`,
//! content `FileDigest`s, and path helpers.

pub mod digest;
pub mod entry;
pub mod location;
pub mod metadata;
pub mod mode;
pub mod path;
pub mod scope;
pub mod types;

pub use digest::{DigestAlgorithm, FileDigest};
pub use entry::DirectoryEntry;
pub use location::Location;
pub use metadata::{FileMetadata, FileType};
pub use path::normalize_path;
pub use scope::Scope;
pub use types::{Digest, ImageRef, LayerId};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path escapes its root: {0}")]
    Traversal(String),
    #[error("path contains a NUL byte: {0:?}")]
    Nul(String),
}
