use crate::cataloger::SkippedLocation;
use crate::concurrency::CancelToken;
use crate::pool;
use crate::resolver::FileResolver;
use layerscope_schema::{DigestAlgorithm, FileDigest, Location};
use sha2::{Digest as _, Sha256};
use std::collections::HashMap;
use std::io::{self, Read};
use tracing::{info, warn};

const CHUNK: usize = 64 * 1024;

/// SHA-256 and BLAKE3 of everything `reader` yields, in one pass.
pub fn digest_reader(mut reader: impl Read) -> io::Result<Vec<FileDigest>> {
    let mut sha = Sha256::new();
    let mut b3 = blake3::Hasher::new();
    let mut buf = vec![0u8; CHUNK];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        sha.update(&buf[..n]);
        b3.update(&buf[..n]);
    }
    Ok(vec![
        FileDigest::new(DigestAlgorithm::Sha256, hex::encode(sha.finalize())),
        FileDigest::new(DigestAlgorithm::Blake3, b3.finalize().to_hex().to_string()),
    ])
}

#[derive(Debug, Default)]
pub struct DigestReport {
    pub digests: HashMap<Location, Vec<FileDigest>>,
    pub skipped: Vec<SkippedLocation>,
    pub cancelled: bool,
}

/// Reads file contents through a resolver and digests them on the worker pool.
#[derive(Debug, Clone)]
pub struct DigestCataloger {
    workers: usize,
    cancel: CancelToken,
}

impl Default for DigestCataloger {
    fn default() -> Self {
        Self::new()
    }
}

impl DigestCataloger {
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

    /// Digest the content of each of `targets`. Callers pass the locations
    /// that carry content; anything unreadable is skipped.
    pub fn catalog(&self, resolver: &dyn FileResolver, targets: &[Location]) -> DigestReport {
        let outcome = pool::run(targets, self.workers, &self.cancel, |location| {
            let reader = resolver.file_contents(location).map_err(|e| e.to_string())?;
            digest_reader(reader).map_err(|e| format!("cannot read {location}: {e}"))
        });

        let skipped: Vec<SkippedLocation> = outcome
            .failed
            .into_iter()
            .map(|(index, reason)| {
                let location = targets[index].clone();
                warn!("no digest for {location}: {reason}");
                SkippedLocation { location, reason }
            })
            .collect();
        let digests: HashMap<Location, Vec<FileDigest>> = outcome
            .completed
            .into_iter()
            .map(|(index, digests)| (targets[index].clone(), digests))
            .collect();
        info!("digested {} files ({} skipped)", digests.len(), skipped.len());

        DigestReport {
            digests,
            skipped,
            cancelled: outcome.cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{ImageResolver, Scope};
    use layerscope_schema::mode::S_IFREG;
    use layerscope_schema::{ImageRef, LayerId};
    use layerscope_store::{Layer, LayerStore};
    use std::sync::Arc;

    #[test]
    fn known_vectors() {
        let digests = digest_reader(&b"abc"[..]).unwrap();
        assert_eq!(digests[0].algorithm, DigestAlgorithm::Sha256);
        assert_eq!(
            digests[0].value,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(digests[1].algorithm, DigestAlgorithm::Blake3);
        assert_eq!(digests[1].value, blake3::hash(b"abc").to_hex().to_string());
    }

    #[test]
    fn unreadable_targets_are_skipped() {
        let mut b = Layer::builder("l0");
        b.file("/a", S_IFREG | 0o644, (0, 0), b"abc").unwrap();
        b.dir("/d", 0o755).unwrap();
        let resolver = ImageResolver::new(
            Arc::new(LayerStore::new("img", vec![b.build()])),
            Scope::Squashed,
        );
        let loc = |p: &str| Location::new(p, LayerId::new("l0"), ImageRef::new("img"));

        let report = DigestCataloger::new().catalog(&resolver, &[loc("/a"), loc("/d")]);
        assert_eq!(report.digests.len(), 1);
        assert_eq!(report.digests[&loc("/a")].len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].location, loc("/d"));
    }
}
