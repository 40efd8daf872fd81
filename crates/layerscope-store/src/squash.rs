use crate::layer::Layer;
use crate::layer_store::LayerStore;
use layerscope_schema::DirectoryEntry;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// The visible version of one path in the merged view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SquashedEntry {
    pub layer_index: usize,
    pub entry: DirectoryEntry,
}

/// Merged path → entry view of a layer stack.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SquashedTree {
    entries: BTreeMap<String, SquashedEntry>,
}

impl SquashedTree {
    pub fn get(&self, path: &str) -> Option<&SquashedEntry> {
        self.entries.get(path)
    }

    /// Entries in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &SquashedEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Paths strictly beneath `dir`, in order.
    pub fn children_of<'a>(&'a self, dir: &str) -> impl Iterator<Item = &'a String> + 'a {
        let prefix = if dir == "/" {
            "/".to_owned()
        } else {
            format!("{dir}/")
        };
        let skip_self = dir == "/";
        self.entries
            .range(prefix.clone()..)
            .map(|(k, _)| k)
            .take_while(move |k| k.starts_with(&prefix))
            .filter(move |k| !(skip_self && k.as_str() == "/"))
    }

    fn remove_tree(&mut self, path: &str) {
        self.entries.remove(path);
        self.remove_descendants(path);
    }

    fn remove_descendants(&mut self, dir: &str) {
        if dir == "/" {
            self.entries.retain(|k, _| k == "/");
            return;
        }
        let doomed: Vec<String> = self.children_of(dir).cloned().collect();
        for path in doomed {
            self.entries.remove(&path);
        }
    }

    fn apply(&mut self, index: usize, layer: &Layer) {
        for dir in layer.opaque_dirs() {
            self.remove_descendants(dir);
        }
        for path in layer.whiteouts() {
            self.remove_tree(path);
        }
        for (path, entry) in layer.entries() {
            self.entries.insert(
                path.clone(),
                SquashedEntry {
                    layer_index: index,
                    entry: entry.clone(),
                },
            );
        }
    }
}

/// Fold the layers bottom to top into the merged view.
///
/// Each layer first applies its opaque markers and whiteouts to everything
/// merged so far, then overlays its own entries. An entry always replaces a
/// lower entry at the same path, whatever either one's type.
pub fn squash(store: &LayerStore) -> SquashedTree {
    let tree = store
        .layers()
        .iter()
        .enumerate()
        .fold(SquashedTree::default(), |mut tree, (index, layer)| {
            tree.apply(index, layer);
            tree
        });
    debug!(
        "squashed {} layers of {} into {} paths",
        store.len(),
        store.image(),
        tree.len()
    );
    tree
}
