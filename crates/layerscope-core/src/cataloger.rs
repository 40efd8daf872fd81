use crate::concurrency::CancelToken;
use crate::pool;
use crate::resolver::FileResolver;
use crate::CoreError;
use layerscope_schema::{Digest, DirectoryEntry, FileMetadata, LayerId, Location};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// A location the cataloger could not process, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedLocation {
    pub location: Location,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct CatalogReport {
    pub metadata: HashMap<Location, FileMetadata>,
    pub skipped: Vec<SkippedLocation>,
    pub cancelled: bool,
}

impl CatalogReport {
    /// True when every enumerated location was cataloged.
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty() && !self.cancelled
    }

    /// Entries ordered by location.
    pub fn sorted(&self) -> Vec<(&Location, &FileMetadata)> {
        let mut entries: Vec<_> = self.metadata.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

/// Walks every location of a resolver and classifies its entry.
///
/// Entry fetches run on the worker pool; classification happens afterwards on
/// the calling thread because hardlink anchors depend on the whole group.
#[derive(Debug, Clone)]
pub struct MetadataCataloger {
    workers: usize,
    cancel: CancelToken,
}

impl Default for MetadataCataloger {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataCataloger {
    pub fn new() -> Self {
        Self {
            workers: pool::default_workers(),
            cancel: CancelToken::new(),
        }
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Catalog every location `resolver` reports.
    ///
    /// Only a failed enumeration is an error; a location whose entry cannot be
    /// fetched is reported in `skipped` and left out of the map.
    pub fn catalog(&self, resolver: &dyn FileResolver) -> Result<CatalogReport, CoreError> {
        let locations = resolver.all_locations()?;
        debug!("cataloging {} locations on {} workers", locations.len(), self.workers);

        let outcome = pool::run(&locations, self.workers, &self.cancel, |location| {
            resolver
                .metadata_entry(location)
                .map_err(|e| e.to_string())
        });

        let skipped: Vec<SkippedLocation> = outcome
            .failed
            .into_iter()
            .map(|(index, reason)| {
                let location = locations[index].clone();
                warn!("skipping {location}: {reason}");
                SkippedLocation { location, reason }
            })
            .collect();

        let fetched: Vec<(&Location, DirectoryEntry)> = outcome
            .completed
            .into_iter()
            .map(|(index, entry)| (&locations[index], entry))
            .collect();
        let anchors = hardlink_anchors(&fetched);

        let metadata: HashMap<Location, FileMetadata> = fetched
            .iter()
            .map(|(location, entry)| {
                let anchor = anchors.get(*location).map(String::as_str);
                ((*location).clone(), FileMetadata::classify(entry, anchor))
            })
            .collect();

        if outcome.cancelled {
            warn!(
                "cataloging cancelled after {} of {} locations",
                metadata.len() + skipped.len(),
                locations.len()
            );
        } else {
            info!(
                "cataloged {} locations ({} skipped)",
                metadata.len(),
                skipped.len()
            );
        }
        Ok(CatalogReport {
            metadata,
            skipped,
            cancelled: outcome.cancelled,
        })
    }
}

/// Anchor path for every member of a hardlink group.
///
/// A group is the set of hardlink candidates sharing a layer and a digest; it
/// needs at least two members. The anchor is the smallest member path that is
/// not itself a hardlink record, or the smallest path when every member is.
fn hardlink_anchors<'a>(fetched: &'a [(&'a Location, DirectoryEntry)]) -> HashMap<&'a Location, String> {
    let mut groups: BTreeMap<(&LayerId, &Digest), Vec<(&Location, &DirectoryEntry)>> = BTreeMap::new();
    for (location, entry) in fetched {
        if !entry.is_hardlink_candidate() {
            continue;
        }
        if let Some(digest) = &entry.digest {
            groups
                .entry((&location.layer_id, digest))
                .or_default()
                .push((*location, entry));
        }
    }

    let mut anchors = HashMap::new();
    for members in groups.into_values().filter(|m| m.len() > 1) {
        let anchor = members
            .iter()
            .filter(|(_, entry)| entry.link_target.is_none())
            .map(|(location, _)| location.path.as_str())
            .min()
            .or_else(|| members.iter().map(|(location, _)| location.path.as_str()).min());
        let Some(anchor) = anchor else { continue };
        debug!("hardlink group of {} anchored at {anchor}", members.len());
        for (location, _) in &members {
            anchors.insert(*location, anchor.to_owned());
        }
    }
    anchors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{ImageResolver, Scope};
    use layerscope_schema::mode::S_IFREG;
    use layerscope_schema::{FileType, ImageRef};
    use layerscope_store::{Layer, LayerStore};
    use std::sync::Arc;

    fn loc(path: &str) -> Location {
        Location::new(path, LayerId::new("l0"), ImageRef::new("img"))
    }

    fn candidate(path: &str, digest: &str, target: Option<&str>) -> DirectoryEntry {
        let e = DirectoryEntry::new(path, S_IFREG | 0o644)
            .with_digest(digest)
            .with_link_count(2);
        match target {
            Some(t) => e.with_link_target(t),
            None => e,
        }
    }

    #[test]
    fn anchor_prefers_entry_without_link_target() {
        let (a, b) = (loc("/a"), loc("/z"));
        let fetched = vec![
            (&a, candidate("/a", "d", Some("/z"))),
            (&b, candidate("/z", "d", None)),
        ];
        let anchors = hardlink_anchors(&fetched);
        assert_eq!(anchors[&a], "/z");
        assert_eq!(anchors[&b], "/z");
    }

    #[test]
    fn anchor_falls_back_to_smallest_path() {
        let (a, b) = (loc("/b"), loc("/c"));
        let fetched = vec![
            (&a, candidate("/b", "d", Some("/x"))),
            (&b, candidate("/c", "d", Some("/x"))),
        ];
        assert_eq!(hardlink_anchors(&fetched)[&b], "/b");
    }

    #[test]
    fn singletons_and_distinct_digests_are_not_groups() {
        let (a, b) = (loc("/a"), loc("/b"));
        let fetched = vec![(&a, candidate("/a", "d1", None)), (&b, candidate("/b", "d2", None))];
        assert!(hardlink_anchors(&fetched).is_empty());
    }

    #[test]
    fn catalog_covers_every_location() {
        let mut b = Layer::builder("l0");
        b.dir("/etc", 0o755).unwrap();
        b.file("/etc/hosts", S_IFREG | 0o644, (0, 0), b"127.0.0.1").unwrap();
        let store = Arc::new(LayerStore::new("img", vec![b.build()]));
        let resolver = ImageResolver::new(store, Scope::Squashed);

        let report = MetadataCataloger::new().with_workers(2).catalog(&resolver).unwrap();
        assert!(report.is_complete());
        assert_eq!(report.metadata.len(), 2);
        assert_eq!(report.metadata[&loc("/etc")].file_type, FileType::Directory);
        let sorted: Vec<&str> = report.sorted().iter().map(|(l, _)| l.path.as_str()).collect();
        assert_eq!(sorted, vec!["/etc", "/etc/hosts"]);
    }
}
