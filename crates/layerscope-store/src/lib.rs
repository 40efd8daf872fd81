//! Layer trees, whiteout handling, squashing, image sources, and the content cache.
//!
//! This crate provides the storage layer: per-layer `Layer` trees built from
//! archives or directory snapshots, the ordered `LayerStore` for one image, the
//! `squash` fold producing the merged `SquashedTree`, `ImageSource` loaders for
//! OCI layouts, docker archives and plain tarballs, and a content-addressable
//! `ObjectStore` (blake3, atomic writes, verified reads) under a `StoreLayout`.

pub mod archive;
pub mod integrity;
pub mod layer;
pub mod layer_store;
pub mod layout;
pub mod objects;
pub mod snapshot;
pub mod source;
pub mod squash;
pub mod whiteout;

pub use archive::{read_layer_archive, read_layer_stream};
pub use integrity::{
    verify_cache_integrity, IntegrityFailure, IntegrityProblem, IntegrityReport,
};
pub use layer::{ContentSource, Layer, LayerBuilder};
pub use layer_store::LayerStore;
pub use layout::{StoreLayout, STORE_FORMAT_VERSION};
pub use objects::ObjectStore;
pub use snapshot::read_directory_snapshot;
pub use source::ImageSource;
pub use squash::{squash, SquashedEntry, SquashedTree};
pub use whiteout::{Marker, OPAQUE_MARKER, WHITEOUT_PREFIX};

use layerscope_schema::PathError;
use std::path::Path;
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("integrity check failed for '{hash}': expected {expected}, got {actual}")]
    IntegrityFailure {
        hash: String,
        expected: String,
        actual: String,
    },
    #[error("object not found: {0}")]
    ObjectNotFound(String),
    #[error("layer not found: {0}")]
    LayerNotFound(String),
    #[error("cache format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid path: {0}")]
    InvalidPath(#[from] PathError),
    #[error("unreadable layer archive {layer}: {reason}")]
    Archive { layer: String, reason: String },
    #[error("invalid image source: {0}")]
    InvalidSource(String),
}

impl StoreError {
    pub(crate) fn archive(layer: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Archive {
            layer: layer.into(),
            reason: reason.to_string(),
        }
    }
}
