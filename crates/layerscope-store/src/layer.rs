use crate::objects::ObjectStore;
use crate::whiteout::{self, Marker};
use crate::StoreError;
use layerscope_schema::mode::S_IFDIR;
use layerscope_schema::{normalize_path, path, Digest, DirectoryEntry, LayerId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Where a layer's file contents can be read from.
#[derive(Clone)]
pub enum ContentSource {
    /// Contents were ingested into the content cache, keyed by entry digest.
    Objects(ObjectStore),
    /// Contents live in a directory snapshot, keyed by entry path.
    Directory(PathBuf),
    /// Contents are held in memory, keyed by entry digest.
    Memory(Arc<HashMap<Digest, Vec<u8>>>),
    /// The layer carries no readable contents.
    None,
}

impl fmt::Debug for ContentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Objects(_) => f.write_str("Objects"),
            Self::Directory(root) => write!(f, "Directory({})", root.display()),
            Self::Memory(map) => write!(f, "Memory({} objects)", map.len()),
            Self::None => f.write_str("None"),
        }
    }
}

/// One immutable layer: its entries by normalized path, plus the whiteouts and
/// opaque directories it applies to the layers beneath it.
#[derive(Debug)]
pub struct Layer {
    id: LayerId,
    entries: BTreeMap<String, DirectoryEntry>,
    whiteouts: BTreeSet<String>,
    opaque_dirs: BTreeSet<String>,
    content: ContentSource,
}

impl Layer {
    pub fn builder(id: impl Into<LayerId>) -> LayerBuilder {
        LayerBuilder::new(id)
    }

    pub fn id(&self) -> &LayerId {
        &self.id
    }

    pub fn entries(&self) -> &BTreeMap<String, DirectoryEntry> {
        &self.entries
    }

    pub fn entry(&self, path: &str) -> Option<&DirectoryEntry> {
        self.entries.get(path)
    }

    pub fn whiteouts(&self) -> &BTreeSet<String> {
        &self.whiteouts
    }

    pub fn opaque_dirs(&self) -> &BTreeSet<String> {
        &self.opaque_dirs
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether this layer deletes `path` as seen from any lower layer: a
    /// whiteout of the path or one of its ancestors, or an opaque marker on
    /// one of its ancestors.
    pub fn hides(&self, path: &str) -> bool {
        if self.whiteouts.contains(path) {
            return true;
        }
        path::ancestors(path)
            .any(|dir| self.whiteouts.contains(dir) || self.opaque_dirs.contains(dir))
    }

    /// Open the contents of `entry`, which must belong to this layer.
    pub fn read_content(&self, entry: &DirectoryEntry) -> Result<Box<dyn Read + Send>, StoreError> {
        match &self.content {
            ContentSource::Objects(objects) => {
                let digest = self.content_digest(entry)?;
                Ok(Box::new(Cursor::new(objects.get(digest)?)))
            }
            ContentSource::Directory(root) => {
                let file = File::open(root.join(entry.path.trim_start_matches('/')))?;
                Ok(Box::new(file))
            }
            ContentSource::Memory(map) => {
                let digest = self.content_digest(entry)?;
                let data = map
                    .get(digest)
                    .ok_or_else(|| StoreError::ObjectNotFound(digest.to_string()))?;
                Ok(Box::new(Cursor::new(data.clone())))
            }
            ContentSource::None => Err(StoreError::ObjectNotFound(entry.path.clone())),
        }
    }

    fn content_digest<'a>(&self, entry: &'a DirectoryEntry) -> Result<&'a Digest, StoreError> {
        entry
            .digest
            .as_ref()
            .ok_or_else(|| StoreError::ObjectNotFound(format!("{} in {}", entry.path, self.id)))
    }
}

/// Accumulates entries and whiteout markers for one layer.
///
/// Paths are normalized on insertion; names following the whiteout convention
/// become whiteouts or opaque markers instead of entries.
#[derive(Debug)]
pub struct LayerBuilder {
    id: LayerId,
    entries: BTreeMap<String, DirectoryEntry>,
    whiteouts: BTreeSet<String>,
    opaque_dirs: BTreeSet<String>,
    content: Option<ContentSource>,
    memory: HashMap<Digest, Vec<u8>>,
}

impl LayerBuilder {
    pub fn new(id: impl Into<LayerId>) -> Self {
        Self {
            id: id.into(),
            entries: BTreeMap::new(),
            whiteouts: BTreeSet::new(),
            opaque_dirs: BTreeSet::new(),
            content: None,
            memory: HashMap::new(),
        }
    }

    #[must_use]
    pub fn content(mut self, content: ContentSource) -> Self {
        self.content = Some(content);
        self
    }

    pub fn id(&self) -> &LayerId {
        &self.id
    }

    /// Add an entry (or whiteout marker) and return the normalized path.
    pub fn insert(&mut self, mut entry: DirectoryEntry) -> Result<String, StoreError> {
        let normalized = normalize_path(&entry.path)?;
        match whiteout::classify(&normalized) {
            Marker::Whiteout(target) => {
                self.whiteouts.insert(target);
            }
            Marker::Opaque(dir) => {
                self.opaque_dirs.insert(dir);
            }
            Marker::Entry => {
                entry.path.clone_from(&normalized);
                self.entries.insert(normalized.clone(), entry);
            }
        }
        Ok(normalized)
    }

    pub fn whiteout(&mut self, raw: &str) -> Result<(), StoreError> {
        self.whiteouts.insert(normalize_path(raw)?);
        Ok(())
    }

    pub fn opaque(&mut self, raw: &str) -> Result<(), StoreError> {
        self.opaque_dirs.insert(normalize_path(raw)?);
        Ok(())
    }

    /// Add a directory entry owned by root.
    pub fn dir(&mut self, raw: &str, perm: u32) -> Result<String, StoreError> {
        self.insert(DirectoryEntry::new(raw, S_IFDIR | perm))
    }

    /// Add a regular file whose contents are kept in memory.
    pub fn file(
        &mut self,
        raw: &str,
        mode: u32,
        owner: (u32, u32),
        data: &[u8],
    ) -> Result<String, StoreError> {
        let digest = Digest::new(blake3::hash(data).to_hex().to_string());
        self.memory.insert(digest.clone(), data.to_vec());
        self.insert(
            DirectoryEntry::new(raw, mode)
                .with_owner(owner.0, owner.1)
                .with_digest(digest)
                .with_size(data.len() as u64),
        )
    }

    /// Finish the layer, linking hardlink records to their targets.
    ///
    /// A regular entry with a link target (tar `Link`) takes the digest and
    /// size of its target, and every member of the resulting group gets a link
    /// count equal to the group size.
    pub fn build(mut self) -> Layer {
        self.resolve_hardlinks();
        let content = match self.content {
            Some(content) => content,
            None if !self.memory.is_empty() => ContentSource::Memory(Arc::new(self.memory)),
            None => ContentSource::None,
        };
        Layer {
            id: self.id,
            entries: self.entries,
            whiteouts: self.whiteouts,
            opaque_dirs: self.opaque_dirs,
            content,
        }
    }

    fn resolve_hardlinks(&mut self) {
        let records: Vec<(String, String)> = self
            .entries
            .values()
            .filter(|e| e.is_regular())
            .filter_map(|e| e.link_target.as_ref().map(|t| (e.path.clone(), t.clone())))
            .collect();
        if records.is_empty() {
            return;
        }

        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (link_path, raw_target) in records {
            let Ok(target) = normalize_path(&raw_target) else {
                debug!("hardlink {link_path} has unusable target {raw_target}");
                continue;
            };
            let Some(target_entry) = self.entries.get(&target) else {
                debug!("hardlink {link_path} targets {target}, absent from layer {}", self.id);
                continue;
            };
            let (digest, size) = (target_entry.digest.clone(), target_entry.size);
            if let Some(link) = self.entries.get_mut(&link_path) {
                link.link_target = Some(target.clone());
                link.digest = digest;
                link.size = size;
            }
            groups.entry(target).or_default().push(link_path);
        }

        for (target, links) in groups {
            let count = links.len() as u32 + 1;
            for member in std::iter::once(&target).chain(links.iter()) {
                if let Some(e) = self.entries.get_mut(member) {
                    e.link_count = e.link_count.max(count);
                }
            }
        }
    }
}
