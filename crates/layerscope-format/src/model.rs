use chrono::{SecondsFormat, Utc};
use layerscope_schema::{FileDigest, FileMetadata, ImageRef, LayerId, Location, Scope};
use serde::{Deserialize, Serialize};

/// Name and version recorded as the document creator.
pub const TOOL_NAME: &str = "layerscope";
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// What was scanned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDescription {
    pub image_ref: ImageRef,
    pub scope: Scope,
    /// Layer ids, bottom first.
    pub layers: Vec<LayerId>,
}

/// One cataloged file occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub location: Location,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FileMetadata>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub digests: Vec<FileDigest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purl: Option<String>,
    #[serde(default)]
    pub locations: Vec<Location>,
}

/// Format-independent software bill of materials.
///
/// Files are kept sorted by location and packages by (name, version), so two
/// models built from the same scan compare equal and encode identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sbom {
    pub source: SourceDescription,
    pub files: Vec<FileRecord>,
    #[serde(default)]
    pub packages: Vec<Package>,
    pub creator: String,
    /// RFC 3339, whole seconds, UTC.
    pub created: String,
}

impl Sbom {
    pub fn new(source: SourceDescription) -> Self {
        Self {
            source,
            files: Vec::new(),
            packages: Vec::new(),
            creator: format!("{TOOL_NAME}-{TOOL_VERSION}"),
            created: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    #[must_use]
    pub fn with_files(mut self, files: Vec<FileRecord>) -> Self {
        self.files = files;
        self.normalize();
        self
    }

    #[must_use]
    pub fn with_packages(mut self, packages: Vec<Package>) -> Self {
        self.packages = packages;
        self.normalize();
        self
    }

    #[must_use]
    pub fn with_created(mut self, created: impl Into<String>) -> Self {
        self.created = created.into();
        self
    }

    /// Restore the canonical ordering.
    pub fn normalize(&mut self) {
        self.files.sort_by(|a, b| a.location.cmp(&b.location));
        for file in &mut self.files {
            file.digests.sort();
        }
        for pkg in &mut self.packages {
            pkg.locations.sort();
        }
        self.packages
            .sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
    }

    pub fn file(&self, location: &Location) -> Option<&FileRecord> {
        self.files.iter().find(|f| &f.location == location)
    }
}

/// `path@layer` token used where a format has no structured slot for a
/// location. Layer ids never contain `@`, so the last one separates.
pub(crate) fn location_token(location: &Location) -> String {
    format!("{}@{}", location.path, location.layer_id)
}

pub(crate) fn parse_location_token(token: &str, image: &ImageRef) -> Option<Location> {
    let (path, layer) = token.rsplit_once('@')?;
    if path.is_empty() {
        return None;
    }
    Some(Location::new(path, LayerId::new(layer), image.clone()))
}
