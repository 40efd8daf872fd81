//! Reading layer tarballs (plain or gzip) into [`Layer`] trees.
//!
//! Regular-file contents are streamed into the content cache as they are
//! read, so a layer is decoded exactly once; later content reads go through
//! the cache and never reopen the archive.

use crate::layer::{ContentSource, Layer};
use crate::objects::ObjectStore;
use crate::whiteout::{self, Marker};
use crate::StoreError;
use flate2::read::GzDecoder;
use layerscope_schema::mode::{
    PERMISSION_BITS, S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK, S_IFREG,
};
use layerscope_schema::{normalize_path, DirectoryEntry, LayerId};
use sha2::{Digest as _, Sha256};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use tracing::{debug, warn};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// `sha256:<hex>` of a file's bytes, the id used for archive layers.
pub(crate) fn sha256_file(path: &Path) -> Result<String, StoreError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

/// Wrap `reader` in a gzip decoder when its first bytes carry the gzip magic.
pub(crate) fn maybe_decompress<'a>(reader: impl Read + 'a) -> io::Result<Box<dyn Read + 'a>> {
    let mut buffered = BufReader::new(reader);
    let is_gzip = buffered.fill_buf()?.starts_with(&GZIP_MAGIC);
    if is_gzip {
        Ok(Box::new(GzDecoder::new(buffered)))
    } else {
        Ok(Box::new(buffered))
    }
}

/// Read a layer tarball from disk. The layer id is the sha256 of the file as
/// stored, unless `id` is given.
pub fn read_layer_archive(
    path: &Path,
    id: Option<LayerId>,
    objects: &ObjectStore,
) -> Result<Layer, StoreError> {
    let id = match id {
        Some(id) => id,
        None => LayerId::new(sha256_file(path)?),
    };
    let file = File::open(path)?;
    let reader = maybe_decompress(file).map_err(|e| StoreError::archive(id.as_str(), e))?;
    debug!("reading layer {} from {}", id, path.display());
    read_layer_stream(id, reader, objects)
}

/// Read an uncompressed (or already decompressed) tar stream as one layer.
pub fn read_layer_stream(
    id: LayerId,
    reader: impl Read,
    objects: &ObjectStore,
) -> Result<Layer, StoreError> {
    let mut builder = Layer::builder(id.clone()).content(ContentSource::Objects(objects.clone()));
    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| StoreError::archive(id.as_str(), e))?;

    for item in entries {
        let mut entry = item.map_err(|e| StoreError::archive(id.as_str(), e))?;
        let kind = entry.header().entry_type();
        let raw_path = entry
            .path()
            .map_err(|e| StoreError::archive(id.as_str(), e))?
            .to_string_lossy()
            .into_owned();

        let Some(format) = format_bits(kind) else {
            if !matches!(kind, tar::EntryType::XGlobalHeader) {
                warn!("skipping {raw_path} in {id}: unsupported tar entry type {kind:?}");
            }
            continue;
        };

        let normalized = match normalize_path(&raw_path) {
            Ok(p) => p,
            Err(e) => {
                warn!("skipping entry in {id}: {e}");
                continue;
            }
        };

        let header = entry.header();
        let perm = header
            .mode()
            .map_err(|e| StoreError::archive(id.as_str(), e))?
            & PERMISSION_BITS;
        let uid = owner_id(header.uid(), &normalized, "uid")
            .map_err(|e| StoreError::archive(id.as_str(), e))?;
        let gid = owner_id(header.gid(), &normalized, "gid")
            .map_err(|e| StoreError::archive(id.as_str(), e))?;
        let link_name = entry
            .link_name()
            .map_err(|e| StoreError::archive(id.as_str(), e))?
            .map(|p| p.to_string_lossy().into_owned());

        let mut record = DirectoryEntry::new(normalized.clone(), format | perm).with_owner(uid, gid);
        match kind {
            tar::EntryType::Symlink | tar::EntryType::Link => {
                if let Some(target) = link_name {
                    record = record.with_link_target(target);
                }
            }
            _ if format == S_IFREG && whiteout::classify(&normalized) == Marker::Entry => {
                let (digest, size) = objects
                    .put_reader(&mut entry)
                    .map_err(|e| StoreError::archive(id.as_str(), e))?;
                record = record.with_digest(digest).with_size(size);
            }
            _ => {}
        }
        builder.insert(record)?;
    }

    Ok(builder.build())
}

fn owner_id(raw: io::Result<u64>, path: &str, which: &str) -> Result<u32, String> {
    let raw = raw.map_err(|e| e.to_string())?;
    u32::try_from(raw).map_err(|_| format!("{path}: {which} {raw} does not fit in 32 bits"))
}

fn format_bits(kind: tar::EntryType) -> Option<u32> {
    use tar::EntryType;
    match kind {
        EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse | EntryType::Link => {
            Some(S_IFREG)
        }
        EntryType::Directory => Some(S_IFDIR),
        EntryType::Symlink => Some(S_IFLNK),
        EntryType::Char => Some(S_IFCHR),
        EntryType::Block => Some(S_IFBLK),
        EntryType::Fifo => Some(S_IFIFO),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::StoreLayout;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use layerscope_schema::mode;
    use std::io::Read as _;

    fn objects() -> (tempfile::TempDir, ObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        (dir, ObjectStore::new(layout))
    }

    fn header(kind: tar::EntryType, mode: u32, uid: u64, gid: u64) -> tar::Header {
        let mut h = tar::Header::new_gnu();
        h.set_entry_type(kind);
        h.set_mode(mode);
        h.set_uid(uid);
        h.set_gid(gid);
        h.set_mtime(0);
        h.set_size(0);
        h
    }

    fn fixture_tar() -> Vec<u8> {
        let mut ar = tar::Builder::new(Vec::new());

        let mut h = header(tar::EntryType::Directory, 0o755, 0, 0);
        h.set_cksum();
        ar.append_data(&mut h, "bin/", &[] as &[u8]).unwrap();

        let data = b"file 1!";
        let mut h = header(tar::EntryType::Regular, 0o644, 1, 2);
        h.set_size(data.len() as u64);
        h.set_cksum();
        ar.append_data(&mut h, "file-1.txt", &data[..]).unwrap();

        let mut h = header(tar::EntryType::Link, 0o644, 1, 2);
        ar.append_link(&mut h, "hardlink-1", "file-1.txt").unwrap();

        let mut h = header(tar::EntryType::Symlink, 0o777, 0, 0);
        ar.append_link(&mut h, "symlink-1", "file-1.txt").unwrap();

        let mut h = header(tar::EntryType::Char, 0o644, 0, 0);
        h.set_cksum();
        ar.append_data(&mut h, "char-device-1", &[] as &[u8]).unwrap();

        let mut h = header(tar::EntryType::Block, 0o644, 0, 0);
        h.set_cksum();
        ar.append_data(&mut h, "block-device-1", &[] as &[u8]).unwrap();

        let mut h = header(tar::EntryType::Fifo, 0o644, 0, 0);
        h.set_cksum();
        ar.append_data(&mut h, "fifo-1", &[] as &[u8]).unwrap();

        let mut h = header(tar::EntryType::Regular, 0o644, 0, 0);
        h.set_cksum();
        ar.append_data(&mut h, "etc/.wh.motd", &[] as &[u8]).unwrap();

        ar.into_inner().unwrap()
    }

    #[test]
    fn reads_every_entry_kind() {
        let (_dir, objects) = objects();
        let layer =
            read_layer_stream(LayerId::new("l0"), fixture_tar().as_slice(), &objects).unwrap();

        let file = layer.entry("/file-1.txt").unwrap();
        assert_eq!(file.mode, S_IFREG | 0o644);
        assert_eq!((file.uid, file.gid), (1, 2));
        assert_eq!(file.size, 7);
        assert!(file.digest.is_some());

        let link = layer.entry("/hardlink-1").unwrap();
        assert_eq!(link.digest, file.digest);
        assert_eq!(link.link_target.as_deref(), Some("/file-1.txt"));
        assert_eq!(layer.entry("/file-1.txt").unwrap().link_count, 2);

        let symlink = layer.entry("/symlink-1").unwrap();
        assert_eq!(mode::format_bits(symlink.mode), S_IFLNK);
        assert_eq!(symlink.link_target.as_deref(), Some("file-1.txt"));

        assert_eq!(mode::format_bits(layer.entry("/char-device-1").unwrap().mode), S_IFCHR);
        assert_eq!(mode::format_bits(layer.entry("/block-device-1").unwrap().mode), S_IFBLK);
        assert_eq!(mode::format_bits(layer.entry("/fifo-1").unwrap().mode), S_IFIFO);
        assert_eq!(layer.entry("/bin").unwrap().mode, S_IFDIR | 0o755);

        assert!(layer.whiteouts().contains("/etc/motd"));
        assert!(layer.entry("/etc/.wh.motd").is_none());
    }

    #[test]
    fn content_lands_in_cache() {
        let (_dir, objects) = objects();
        let layer =
            read_layer_stream(LayerId::new("l0"), fixture_tar().as_slice(), &objects).unwrap();
        let entry = layer.entry("/hardlink-1").unwrap().clone();
        let mut out = String::new();
        layer.read_content(&entry).unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "file 1!");
    }

    #[test]
    fn gzip_archive_detected() {
        let (dir, objects) = objects();
        let path = dir.path().join("layer.tar.gz");
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        std::io::Write::write_all(&mut enc, &fixture_tar()).unwrap();
        std::fs::write(&path, enc.finish().unwrap()).unwrap();

        let layer = read_layer_archive(&path, None, &objects).unwrap();
        assert!(layer.id().starts_with("sha256:"));
        assert!(layer.entry("/file-1.txt").is_some());
    }

    #[test]
    fn plain_archive_id_is_sha256_of_file() {
        let (dir, objects) = objects();
        let path = dir.path().join("layer.tar");
        let bytes = fixture_tar();
        std::fs::write(&path, &bytes).unwrap();
        let layer = read_layer_archive(&path, None, &objects).unwrap();
        let expected = format!("sha256:{}", hex::encode(Sha256::digest(&bytes)));
        assert_eq!(layer.id().as_str(), expected);
    }

    #[test]
    fn oversized_owner_is_an_archive_error() {
        let (_dir, objects) = objects();
        let mut ar = tar::Builder::new(Vec::new());
        let mut h = header(tar::EntryType::Regular, 0o644, 1 << 40, 0);
        h.set_cksum();
        ar.append_data(&mut h, "etc/passwd", &[] as &[u8]).unwrap();
        let bytes = ar.into_inner().unwrap();

        let err = read_layer_stream(LayerId::new("wide"), bytes.as_slice(), &objects).unwrap_err();
        assert!(matches!(err, StoreError::Archive { .. }));
        assert!(err.to_string().contains("/etc/passwd: uid 1099511627776"));
    }

    #[test]
    fn truncated_archive_is_an_archive_error() {
        let (_dir, objects) = objects();
        let bytes = fixture_tar();
        let truncated = &bytes[..700];
        let result = read_layer_stream(LayerId::new("bad"), truncated, &objects);
        assert!(matches!(result, Err(StoreError::Archive { .. })));
    }
}
