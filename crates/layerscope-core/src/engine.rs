use crate::cataloger::{CatalogReport, MetadataCataloger, SkippedLocation};
use crate::concurrency::{CancelToken, StoreLock};
use crate::config::ScanConfig;
use crate::digests::DigestCataloger;
use crate::resolver::{FileResolver, ImageResolver};
use crate::CoreError;
use layerscope_format::{FileRecord, Sbom, SourceDescription};
use layerscope_schema::{FileDigest, Location, Scope};
use layerscope_store::{
    verify_cache_integrity, ImageSource, IntegrityReport, LayerStore, StoreLayout,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Entry point tying sources, the content cache, resolvers, and catalogers
/// together.
pub struct Engine {
    layout: StoreLayout,
    config: ScanConfig,
}

/// Outcome of a full scan: the document plus everything that was left out.
#[derive(Debug)]
pub struct ScanResult {
    pub sbom: Sbom,
    pub skipped: Vec<SkippedLocation>,
    pub cancelled: bool,
}

impl ScanResult {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty() && !self.cancelled
    }
}

impl Engine {
    /// Create an engine whose content cache lives under `cache_root`.
    pub fn new(cache_root: impl Into<PathBuf>, config: ScanConfig) -> Self {
        Self {
            layout: StoreLayout::new(cache_root),
            config,
        }
    }

    /// Create an engine on the cache directory named by `config`.
    pub fn from_config(config: ScanConfig) -> Result<Self, CoreError> {
        let root = config.cache_root()?;
        Ok(Self::new(root, config))
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Load `source` into a layer store, ingesting archive contents into the
    /// cache under the cache lock.
    pub fn open(&self, source: &ImageSource) -> Result<Arc<LayerStore>, CoreError> {
        info!("opening {source}");
        self.layout.initialize()?;
        let _lock = StoreLock::acquire(&self.layout.lock_file())?;
        Ok(Arc::new(source.load(&self.layout)?))
    }

    /// Parse a source reference (`dir:`, `oci-dir:`, `docker-archive:`,
    /// `tar:`, or a bare path) and open it.
    pub fn open_ref(&self, reference: &str) -> Result<Arc<LayerStore>, CoreError> {
        let source = ImageSource::parse(reference)?;
        self.open(&source)
    }

    pub fn resolver(&self, store: Arc<LayerStore>, scope: Scope) -> ImageResolver {
        ImageResolver::new(store, scope)
    }

    pub fn catalog(
        &self,
        resolver: &dyn FileResolver,
        cancel: &CancelToken,
    ) -> Result<CatalogReport, CoreError> {
        MetadataCataloger::new()
            .with_workers(self.config.worker_count())
            .with_cancel(cancel.clone())
            .catalog(resolver)
    }

    /// Catalog `store` in `scope` and assemble the SBOM, digesting file
    /// contents when the config asks for it.
    pub fn scan(
        &self,
        store: &Arc<LayerStore>,
        scope: Scope,
        cancel: &CancelToken,
    ) -> Result<ScanResult, CoreError> {
        let resolver = self.resolver(Arc::clone(store), scope);
        let report = self.catalog(&resolver, cancel)?;
        let mut skipped = report.skipped.clone();
        let mut cancelled = report.cancelled;

        let mut digests: HashMap<Location, Vec<FileDigest>> = HashMap::new();
        if self.config.digests && !cancelled {
            let targets: Vec<_> = report
                .sorted()
                .into_iter()
                .filter(|(_, m)| m.file_type.has_content())
                .map(|(l, _)| l.clone())
                .collect();
            let digest_report = DigestCataloger::new()
                .with_workers(self.config.worker_count())
                .with_cancel(cancel.clone())
                .catalog(&resolver, &targets);
            skipped.extend(digest_report.skipped);
            cancelled |= digest_report.cancelled;
            digests = digest_report.digests;
        }

        let files = report
            .metadata
            .into_iter()
            .map(|(location, metadata)| FileRecord {
                digests: digests.remove(&location).unwrap_or_default(),
                location,
                metadata: Some(metadata),
            })
            .collect();
        let sbom = Sbom::new(SourceDescription {
            image_ref: store.image().clone(),
            scope,
            layers: store.layer_ids(),
        })
        .with_files(files);
        info!(
            "{} ({scope}): {} files, {} skipped",
            store.image(),
            sbom.files.len(),
            skipped.len()
        );
        Ok(ScanResult {
            sbom,
            skipped,
            cancelled,
        })
    }

    /// Re-hash every cached object.
    pub fn verify_cache(&self) -> Result<IntegrityReport, CoreError> {
        self.layout.initialize()?;
        let _lock = StoreLock::acquire(&self.layout.lock_file())?;
        Ok(verify_cache_integrity(&self.layout)?)
    }
}
