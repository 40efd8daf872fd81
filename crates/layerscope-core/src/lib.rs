//! Resolution and cataloging engine for layerscope.
//!
//! This crate turns a loaded `LayerStore` into answers: the `ImageResolver`
//! exposes the squashed or all-layers view through the `FileResolver` trait,
//! the `MetadataCataloger` and `DigestCataloger` walk a resolver on a bounded
//! worker pool, and the `Engine` ties source loading, the cache lock, and SBOM
//! assembly together. Cancellation and the cache lock live in `concurrency`.

pub mod cataloger;
pub mod concurrency;
pub mod config;
pub mod digests;
pub mod engine;
pub mod pool;
pub mod resolver;

pub use cataloger::{CatalogReport, MetadataCataloger, SkippedLocation};
pub use concurrency::{install_signal_handler, CancelToken, StoreLock};
pub use config::ScanConfig;
pub use digests::{DigestCataloger, DigestReport};
pub use engine::{Engine, ScanResult};
pub use resolver::{FileResolver, ImageResolver, ResolveError, Scope};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("cannot construct layer store: {0}")]
    Construction(#[from] layerscope_store::StoreError),
    #[error("resolver error: {0}")]
    Resolve(#[from] ResolveError),
    #[error("document error: {0}")]
    Format(#[from] layerscope_format::FormatError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("cache lock error: {0}")]
    Lock(String),
}
