//! Image sources: where a layer stack comes from and how to open it.

use crate::archive::{maybe_decompress, read_layer_archive, sha256_file};
use crate::layer::Layer;
use crate::layer_store::LayerStore;
use crate::layout::StoreLayout;
use crate::objects::ObjectStore;
use crate::snapshot::read_directory_snapshot;
use crate::StoreError;
use layerscope_schema::{normalize_path, ImageRef, LayerId};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const OCI_REF_ANNOTATION: &str = "org.opencontainers.image.ref.name";
const MAX_INDEX_DEPTH: usize = 8;

/// A container image on the local filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// A directory tree, read as one layer.
    Directory(PathBuf),
    /// An OCI image layout (`oci-layout`, `index.json`, `blobs/`).
    OciLayout(PathBuf),
    /// A `docker save` tarball.
    DockerArchive(PathBuf),
    /// Layer tarballs, bottom first.
    Archives(Vec<PathBuf>),
}

impl ImageSource {
    /// Parse `scheme:path`, or detect the kind from the filesystem when no
    /// known scheme prefix is present.
    pub fn parse(spec: &str) -> Result<Self, StoreError> {
        if let Some((scheme, rest)) = spec.split_once(':') {
            let source = match scheme {
                "dir" => Some(Self::Directory(PathBuf::from(rest))),
                "oci-dir" => Some(Self::OciLayout(PathBuf::from(rest))),
                "docker-archive" => Some(Self::DockerArchive(PathBuf::from(rest))),
                "tar" => {
                    let paths: Vec<PathBuf> = rest
                        .split(',')
                        .filter(|p| !p.is_empty())
                        .map(PathBuf::from)
                        .collect();
                    if paths.is_empty() {
                        return Err(StoreError::InvalidSource(format!(
                            "no layer archives in '{spec}'"
                        )));
                    }
                    Some(Self::Archives(paths))
                }
                _ => None,
            };
            if let Some(source) = source {
                return Ok(source);
            }
        }
        Self::detect(Path::new(spec))
    }

    /// Work out what kind of image lives at `path`.
    pub fn detect(path: &Path) -> Result<Self, StoreError> {
        let meta = fs::metadata(path).map_err(|e| {
            StoreError::InvalidSource(format!("cannot open {}: {e}", path.display()))
        })?;
        if meta.is_dir() {
            if path.join("oci-layout").is_file() && path.join("index.json").is_file() {
                return Ok(Self::OciLayout(path.to_path_buf()));
            }
            return Ok(Self::Directory(path.to_path_buf()));
        }
        if archive_has_docker_manifest(path)? {
            Ok(Self::DockerArchive(path.to_path_buf()))
        } else {
            Ok(Self::Archives(vec![path.to_path_buf()]))
        }
    }

    /// Reference used when the image carries no name of its own.
    pub fn image_ref(&self) -> ImageRef {
        match self {
            Self::Directory(p) | Self::OciLayout(p) | Self::DockerArchive(p) => {
                ImageRef::new(p.display().to_string())
            }
            Self::Archives(paths) => ImageRef::new(
                paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            ),
        }
    }

    /// Open the source into an ordered layer stack. Archive contents are
    /// ingested into the object cache under `layout`.
    pub fn load(&self, layout: &StoreLayout) -> Result<LayerStore, StoreError> {
        let objects = ObjectStore::new(layout.clone());
        let store = match self {
            Self::Directory(root) => {
                LayerStore::new(self.image_ref(), vec![read_directory_snapshot(root)?])
            }
            Self::Archives(paths) => {
                let layers = paths
                    .iter()
                    .map(|p| read_layer_archive(p, None, &objects))
                    .collect::<Result<Vec<_>, _>>()?;
                LayerStore::new(self.image_ref(), layers)
            }
            Self::OciLayout(root) => load_oci_layout(root, &objects, self.image_ref())?,
            Self::DockerArchive(path) => {
                load_docker_archive(path, layout, &objects, self.image_ref())?
            }
        };
        info!("opened {} with {} layers", store.image(), store.len());
        Ok(store)
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory(p) => write!(f, "dir:{}", p.display()),
            Self::OciLayout(p) => write!(f, "oci-dir:{}", p.display()),
            Self::DockerArchive(p) => write!(f, "docker-archive:{}", p.display()),
            Self::Archives(_) => write!(f, "tar:{}", self.image_ref()),
        }
    }
}

fn archive_has_docker_manifest(path: &Path) -> Result<bool, StoreError> {
    let reader = maybe_decompress(File::open(path)?)?;
    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| StoreError::InvalidSource(format!("{}: {e}", path.display())))?;
    for entry in entries {
        let entry =
            entry.map_err(|e| StoreError::InvalidSource(format!("{}: {e}", path.display())))?;
        let name = entry
            .path()
            .map(|p| p.to_string_lossy().trim_start_matches("./").to_owned())
            .unwrap_or_default();
        if name == "manifest.json" {
            return Ok(true);
        }
    }
    Ok(false)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Descriptor {
    #[serde(default)]
    media_type: String,
    digest: String,
    #[serde(default)]
    annotations: HashMap<String, String>,
}

/// Either an image index or an image manifest; which one is decided by the
/// fields present.
#[derive(Debug, Deserialize)]
struct OciDocument {
    #[serde(default)]
    manifests: Vec<Descriptor>,
    #[serde(default)]
    layers: Vec<Descriptor>,
}

fn blob_path(root: &Path, digest: &str) -> Result<PathBuf, StoreError> {
    let (alg, hex) = digest
        .split_once(':')
        .ok_or_else(|| StoreError::InvalidSource(format!("malformed digest '{digest}'")))?;
    let safe = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !safe(alg) || !safe(hex) {
        return Err(StoreError::InvalidSource(format!("malformed digest '{digest}'")));
    }
    Ok(root.join("blobs").join(alg).join(hex))
}

/// Blob path after checking its sha256 against the descriptor digest.
fn verified_blob(root: &Path, digest: &str) -> Result<PathBuf, StoreError> {
    let path = blob_path(root, digest)?;
    if digest.starts_with("sha256:") {
        let actual = sha256_file(&path)?;
        if actual != digest {
            return Err(StoreError::IntegrityFailure {
                hash: digest.to_owned(),
                expected: digest.to_owned(),
                actual,
            });
        }
    } else {
        debug!("not verifying blob {digest}: unsupported digest algorithm");
    }
    Ok(path)
}

fn read_document(root: &Path, digest: &str) -> Result<OciDocument, StoreError> {
    let path = verified_blob(root, digest)?;
    Ok(serde_json::from_slice(&fs::read(path)?)?)
}

fn load_oci_layout(
    root: &Path,
    objects: &ObjectStore,
    fallback: ImageRef,
) -> Result<LayerStore, StoreError> {
    let index: OciDocument = serde_json::from_slice(&fs::read(root.join("index.json"))?)?;
    let Some(top) = index.manifests.first() else {
        return Err(StoreError::InvalidSource(format!(
            "{}: index.json lists no manifests",
            root.display()
        )));
    };
    let image = top
        .annotations
        .get(OCI_REF_ANNOTATION)
        .map_or(fallback, |name| ImageRef::new(name.as_str()));

    let mut doc = read_document(root, &top.digest)?;
    let mut depth = 0;
    while doc.layers.is_empty() {
        let Some(next) = doc.manifests.first() else {
            break;
        };
        depth += 1;
        if depth > MAX_INDEX_DEPTH {
            return Err(StoreError::InvalidSource(format!(
                "{}: image indexes nested too deeply",
                root.display()
            )));
        }
        debug!("following nested {} {}", next.media_type, next.digest);
        doc = read_document(root, &next.digest)?;
    }

    let layers = doc
        .layers
        .iter()
        .map(|desc| {
            let path = verified_blob(root, &desc.digest)?;
            read_layer_archive(&path, Some(LayerId::new(desc.digest.as_str())), objects)
        })
        .collect::<Result<Vec<Layer>, _>>()?;
    Ok(LayerStore::new(image, layers))
}

#[derive(Debug, Deserialize)]
struct DockerManifest {
    #[serde(rename = "RepoTags", default)]
    repo_tags: Option<Vec<String>>,
    #[serde(rename = "Layers")]
    layers: Vec<String>,
}

fn load_docker_archive(
    path: &Path,
    layout: &StoreLayout,
    objects: &ObjectStore,
    fallback: ImageRef,
) -> Result<LayerStore, StoreError> {
    fs::create_dir_all(layout.staging_dir())?;
    let staging = tempfile::Builder::new()
        .prefix("docker-archive-")
        .tempdir_in(layout.staging_dir())?;
    let mut archive = tar::Archive::new(maybe_decompress(File::open(path)?)?);
    archive.set_preserve_permissions(false);
    archive.set_unpack_xattrs(false);
    archive
        .unpack(staging.path())
        .map_err(|e| StoreError::InvalidSource(format!("{}: {e}", path.display())))?;

    let manifest_path = staging.path().join("manifest.json");
    if !manifest_path.is_file() {
        return Err(StoreError::InvalidSource(format!(
            "{}: no manifest.json",
            path.display()
        )));
    }
    let manifests: Vec<DockerManifest> = serde_json::from_slice(&fs::read(manifest_path)?)?;
    let Some(manifest) = manifests.into_iter().next() else {
        return Err(StoreError::InvalidSource(format!(
            "{}: manifest.json lists no images",
            path.display()
        )));
    };
    let image = manifest
        .repo_tags
        .and_then(|tags| tags.into_iter().next())
        .map_or(fallback, ImageRef::new);

    let layers = manifest
        .layers
        .iter()
        .map(|rel| {
            let rel = normalize_path(rel)?;
            read_layer_archive(&staging.path().join(rel.trim_start_matches('/')), None, objects)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(LayerStore::new(image, layers))
}
