use crate::layer::{ContentSource, Layer};
use crate::StoreError;
use layerscope_schema::mode::{PERMISSION_BITS, S_IFMT};
use layerscope_schema::{Digest, DirectoryEntry, LayerId};
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Read a directory tree as a single layer.
///
/// Symlinks are recorded, never followed. Regular files are hashed but their
/// contents stay on disk and are read from the directory on demand. A file
/// that cannot be read is still listed, without a digest. The layer
/// id is `blake3:` over the sorted listing, so an unchanged tree keeps its id.
pub fn read_directory_snapshot(root: &Path) -> Result<Layer, StoreError> {
    let meta = fs::metadata(root)?;
    if !meta.is_dir() {
        return Err(StoreError::InvalidSource(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let mut paths = collect_entries(root, root)?;
    paths.sort_by(|a, b| a.0.cmp(&b.0));

    let mut listing = blake3::Hasher::new();
    let mut entries = Vec::with_capacity(paths.len());
    for (rel, full) in &paths {
        let entry = match snapshot_entry(rel, full) {
            Ok(e) => e,
            Err(e) => {
                warn!("skipping {rel}: {e}");
                continue;
            }
        };
        listing.update(
            format!(
                "{} {:o} {}:{} {}\n",
                entry.path,
                entry.mode,
                entry.uid,
                entry.gid,
                entry.digest.as_deref().unwrap_or("-")
            )
            .as_bytes(),
        );
        entries.push(entry);
    }

    let id = LayerId::new(format!("blake3:{}", listing.finalize().to_hex()));
    debug!("snapshot of {} has {} entries, id {}", root.display(), entries.len(), id);
    let mut builder =
        Layer::builder(id).content(ContentSource::Directory(root.to_path_buf()));
    for entry in entries {
        builder.insert(entry)?;
    }
    Ok(builder.build())
}

fn snapshot_entry(rel: &str, full: &Path) -> Result<DirectoryEntry, StoreError> {
    let meta = full.symlink_metadata()?;
    let mode = (meta.mode() & S_IFMT) | (meta.mode() & PERMISSION_BITS);
    let mut entry = DirectoryEntry::new(format!("/{rel}"), mode)
        .with_owner(meta.uid(), meta.gid())
        .with_link_count(meta.nlink() as u32);

    let ft = meta.file_type();
    if ft.is_symlink() {
        let target = fs::read_link(full)?;
        entry = entry.with_link_target(target.to_string_lossy().into_owned());
    } else if ft.is_file() {
        entry = entry.with_size(meta.len());
        match hash_file(full) {
            Ok(digest) => entry = entry.with_digest(digest),
            Err(e) => warn!("recording {rel} without a digest: {e}"),
        }
    }
    Ok(entry)
}

fn hash_file(path: &Path) -> io::Result<Digest> {
    let mut file = fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(Digest::new(hasher.finalize().to_hex().to_string()))
}

/// Recursively collect (relative_path, full_path) pairs from a directory tree.
fn collect_entries(root: &Path, current: &Path) -> Result<Vec<(String, PathBuf)>, StoreError> {
    let mut result = Vec::new();
    for entry in fs::read_dir(current)? {
        let entry = entry?;
        let full = entry.path();
        let rel = full
            .strip_prefix(root)
            .map_err(|e| StoreError::Io(io::Error::other(format!("path strip: {e}"))))?
            .to_string_lossy()
            .into_owned();

        let meta = full.symlink_metadata()?;
        if meta.is_dir() {
            result.push((rel, full.clone()));
            result.extend(collect_entries(root, &full)?);
        } else {
            result.push((rel, full));
        }
    }
    Ok(result)
}
