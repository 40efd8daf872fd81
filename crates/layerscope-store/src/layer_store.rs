use crate::layer::Layer;
use layerscope_schema::{ImageRef, LayerId};
use std::collections::HashMap;
use std::sync::Arc;

/// Ordered, read-only stack of layers making up one image, bottom first.
///
/// Shared by every resolver and worker through `Arc`; nothing here mutates
/// after construction.
#[derive(Debug)]
pub struct LayerStore {
    image: ImageRef,
    layers: Vec<Arc<Layer>>,
    index: HashMap<LayerId, usize>,
}

impl LayerStore {
    /// Layers repeated under the same id (identical blobs, e.g. empty layers)
    /// resolve to their lowest occurrence when looked up by id.
    pub fn new(image: impl Into<ImageRef>, layers: Vec<Layer>) -> Self {
        let layers: Vec<Arc<Layer>> = layers.into_iter().map(Arc::new).collect();
        let mut index = HashMap::with_capacity(layers.len());
        for (i, layer) in layers.iter().enumerate() {
            index.entry(layer.id().clone()).or_insert(i);
        }
        Self {
            image: image.into(),
            layers,
            index,
        }
    }

    pub fn image(&self) -> &ImageRef {
        &self.image
    }

    pub fn layers(&self) -> &[Arc<Layer>] {
        &self.layers
    }

    pub fn layer(&self, index: usize) -> Option<&Arc<Layer>> {
        self.layers.get(index)
    }

    pub fn position(&self, id: &LayerId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn layer_by_id(&self, id: &LayerId) -> Option<&Arc<Layer>> {
        self.position(id).and_then(|i| self.layers.get(i))
    }

    pub fn layer_ids(&self) -> Vec<LayerId> {
        self.layers.iter().map(|l| l.id().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Whether the version of `path` recorded at layer `index` is deleted by a
    /// whiteout in any layer above it.
    pub fn is_hidden_above(&self, index: usize, path: &str) -> bool {
        self.layers
            .iter()
            .skip(index + 1)
            .any(|layer| layer.hides(path))
    }
}
