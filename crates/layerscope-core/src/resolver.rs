use glob::{MatchOptions, Pattern};
use layerscope_schema::{normalize_path, DirectoryEntry, Location};
use layerscope_store::{squash, Layer, LayerStore, SquashedTree};
use std::collections::HashSet;
use std::io::Read;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub use layerscope_schema::Scope;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("cannot read {location}: {reason}")]
    ReadFailure { location: String, reason: String },
    #[error("invalid glob pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Read and query surface over one view of an image.
///
/// Lookups that find nothing return an empty vec or [`ResolveError::NotFound`];
/// a read failure affects only the call that hit it.
pub trait FileResolver: Send + Sync {
    /// Locations of `path` visible in this view.
    fn files_by_path(&self, path: &str) -> Result<Vec<Location>, ResolveError>;

    /// Locations whose path matches `pattern`, ordered by path then layer.
    /// `*` stays within one path component and `**` spans any number of them.
    fn files_by_glob(&self, pattern: &str) -> Result<Vec<Location>, ResolveError>;

    /// Open the content of a regular file or hardlink.
    fn file_contents(&self, location: &Location) -> Result<Box<dyn Read + Send>, ResolveError>;

    /// The raw entry behind `location`, without touching its content.
    fn metadata_entry(&self, location: &Location) -> Result<DirectoryEntry, ResolveError>;

    /// Every location in the view, including the root.
    fn all_locations(&self) -> Result<Vec<Location>, ResolveError>;
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

fn compile(pattern: &str) -> Result<Pattern, ResolveError> {
    let absolute = if pattern.starts_with('/') {
        pattern.to_owned()
    } else {
        format!("/{pattern}")
    };
    Pattern::new(&absolute).map_err(|e| ResolveError::InvalidPattern {
        pattern: pattern.to_owned(),
        reason: e.to_string(),
    })
}

/// Resolver over a [`LayerStore`] in either scope.
///
/// A squashed resolver folds the layers once at construction and answers from
/// that view; an all-layers resolver answers straight from the per-layer trees,
/// reporting every version of a path that no higher layer deletes.
#[derive(Debug, Clone)]
pub struct ImageResolver {
    store: Arc<LayerStore>,
    scope: Scope,
    squashed: Option<Arc<SquashedTree>>,
}

impl ImageResolver {
    pub fn new(store: Arc<LayerStore>, scope: Scope) -> Self {
        let squashed = match scope {
            Scope::Squashed => Some(Arc::new(squash(&store))),
            Scope::AllLayers => None,
        };
        Self {
            store,
            scope,
            squashed,
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn store(&self) -> &Arc<LayerStore> {
        &self.store
    }

    pub fn squashed_view(&self) -> Option<&SquashedTree> {
        self.squashed.as_deref()
    }

    fn location(&self, path: &str, layer: &Layer) -> Location {
        Location::new(path, layer.id().clone(), self.store.image().clone())
    }

    /// Locations for every visible (path, layer index) accepted by `keep`, in
    /// path then layer order, without repeats.
    fn collect(&self, keep: impl Fn(&str) -> bool) -> Vec<Location> {
        if let Some(tree) = &self.squashed {
            return tree
                .iter()
                .filter(|(path, _)| keep(path))
                .filter_map(|(path, visible)| {
                    self.store
                        .layer(visible.layer_index)
                        .map(|layer| self.location(path, layer))
                })
                .collect();
        }

        let mut hits: Vec<(&str, usize)> = Vec::new();
        for (index, layer) in self.store.layers().iter().enumerate() {
            for path in layer.entries().keys() {
                if keep(path) && !self.store.is_hidden_above(index, path) {
                    hits.push((path.as_str(), index));
                }
            }
        }
        hits.sort_unstable();
        self.dedup(hits)
    }

    fn dedup(&self, hits: Vec<(&str, usize)>) -> Vec<Location> {
        let mut seen = HashSet::with_capacity(hits.len());
        hits.into_iter()
            .filter_map(|(path, index)| self.store.layer(index).map(|l| self.location(path, l)))
            .filter(|loc| seen.insert(loc.clone()))
            .collect()
    }

    /// The layer and entry a location refers to, if it is part of this view.
    fn lookup(&self, location: &Location) -> Result<(&Layer, &DirectoryEntry), ResolveError> {
        let not_found = || ResolveError::NotFound(location.to_string());
        if &location.image_ref != self.store.image() {
            return Err(not_found());
        }
        let path = normalize_path(&location.path).map_err(|_| not_found())?;

        if let Some(tree) = &self.squashed {
            let visible = tree.get(&path).ok_or_else(not_found)?;
            let layer = self
                .store
                .layer(visible.layer_index)
                .ok_or_else(not_found)?;
            if layer.id() != &location.layer_id {
                return Err(not_found());
            }
            return Ok((layer.as_ref(), &visible.entry));
        }

        self.store
            .layers()
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, layer)| layer.id() == &location.layer_id)
            .find_map(|(index, layer)| {
                let entry = layer.entry(&path)?;
                (!self.store.is_hidden_above(index, &path)).then_some((layer.as_ref(), entry))
            })
            .ok_or_else(not_found)
    }
}

impl FileResolver for ImageResolver {
    fn files_by_path(&self, path: &str) -> Result<Vec<Location>, ResolveError> {
        let Ok(path) = normalize_path(path) else {
            debug!("unusable lookup path {path:?}");
            return Ok(Vec::new());
        };
        if let Some(tree) = &self.squashed {
            return Ok(tree
                .get(&path)
                .and_then(|visible| self.store.layer(visible.layer_index))
                .map(|layer| self.location(&path, layer))
                .into_iter()
                .collect());
        }
        let hits = self
            .store
            .layers()
            .iter()
            .enumerate()
            .filter(|(index, layer)| {
                layer.entry(&path).is_some() && !self.store.is_hidden_above(*index, &path)
            })
            .map(|(index, _)| (path.as_str(), index))
            .collect();
        Ok(self.dedup(hits))
    }

    fn files_by_glob(&self, pattern: &str) -> Result<Vec<Location>, ResolveError> {
        let compiled = compile(pattern)?;
        Ok(self.collect(|path| compiled.matches_with(path, MATCH_OPTIONS)))
    }

    fn file_contents(&self, location: &Location) -> Result<Box<dyn Read + Send>, ResolveError> {
        let (layer, entry) = self.lookup(location)?;
        if !entry.is_regular() {
            return Err(ResolveError::NotFound(format!(
                "{location} has no readable content"
            )));
        }
        layer
            .read_content(entry)
            .map_err(|e| ResolveError::ReadFailure {
                location: location.to_string(),
                reason: e.to_string(),
            })
    }

    fn metadata_entry(&self, location: &Location) -> Result<DirectoryEntry, ResolveError> {
        self.lookup(location).map(|(_, entry)| entry.clone())
    }

    fn all_locations(&self) -> Result<Vec<Location>, ResolveError> {
        Ok(self.collect(|_| true))
    }
}
