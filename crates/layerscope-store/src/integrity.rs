use crate::layout::StoreLayout;
use crate::objects::ObjectStore;
use crate::StoreError;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, warn};

#[derive(Debug, Default, Serialize)]
pub struct IntegrityReport {
    pub checked: usize,
    pub passed: usize,
    pub failed: Vec<IntegrityFailure>,
}

/// One object that did not verify, with the file it was read from.
#[derive(Debug, Serialize)]
pub struct IntegrityFailure {
    pub digest: String,
    pub path: PathBuf,
    pub problem: IntegrityProblem,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum IntegrityProblem {
    /// The content hashes to something other than its name.
    Mismatch { actual: String },
    /// The object could not be opened or read to the end.
    Unreadable { reason: String },
    /// The name is not a blake3 digest, so nothing in the cache refers to it.
    Foreign,
}

impl fmt::Display for IntegrityProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mismatch { actual } => write!(f, "content hashes to blake3:{actual}"),
            Self::Unreadable { reason } => write!(f, "unreadable: {reason}"),
            Self::Foreign => f.write_str("not a cache object"),
        }
    }
}

fn is_object_name(name: &str) -> bool {
    name.len() == 64 && name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Re-hash every cached layer object and report the ones whose content no
/// longer matches their name.
pub fn verify_cache_integrity(layout: &StoreLayout) -> Result<IntegrityReport, StoreError> {
    let objects = ObjectStore::new(layout.clone());
    let names = objects.list()?;
    debug!("verifying {} objects under {}", names.len(), layout.objects_dir().display());

    let mut report = IntegrityReport {
        checked: names.len(),
        ..Default::default()
    };
    for name in names {
        let problem = if !is_object_name(&name) {
            IntegrityProblem::Foreign
        } else {
            match objects.verify(&name) {
                Ok(()) => {
                    report.passed += 1;
                    continue;
                }
                Err(StoreError::IntegrityFailure { actual, .. }) => {
                    IntegrityProblem::Mismatch { actual }
                }
                Err(e) => IntegrityProblem::Unreadable {
                    reason: e.to_string(),
                },
            }
        };
        let path = objects.path(&name);
        warn!("{}: {problem}", path.display());
        report.failed.push(IntegrityFailure {
            digest: name,
            path,
            problem,
        });
    }
    Ok(report)
}
