#![allow(unsafe_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use layerscope_schema::mode::{self, S_IFIFO, S_IFREG};
use layerscope_store::{squash, ImageSource, StoreError, StoreLayout};
use sha2::{Digest as _, Sha256};
use std::fs;
use std::io::{Read as _, Write as _};
use std::path::Path;

fn layout(dir: &Path) -> StoreLayout {
    let layout = StoreLayout::new(dir.join("cache"));
    layout.initialize().unwrap();
    layout
}

fn layer_tar(files: &[(&str, &str)]) -> Vec<u8> {
    let mut ar = tar::Builder::new(Vec::new());
    for (path, data) in files {
        let mut h = tar::Header::new_gnu();
        h.set_entry_type(tar::EntryType::Regular);
        h.set_mode(0o644);
        h.set_mtime(0);
        h.set_size(data.len() as u64);
        h.set_cksum();
        ar.append_data(&mut h, path, data.as_bytes()).unwrap();
    }
    ar.into_inner().unwrap()
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

fn sha256(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

fn write_blob(root: &Path, data: &[u8]) -> String {
    let digest = sha256(data);
    let hex = digest.trim_start_matches("sha256:");
    fs::create_dir_all(root.join("blobs/sha256")).unwrap();
    fs::write(root.join("blobs/sha256").join(hex), data).unwrap();
    digest
}

fn oci_layout(root: &Path, layers: &[Vec<u8>]) -> Vec<String> {
    fs::create_dir_all(root).unwrap();
    fs::write(root.join("oci-layout"), r#"{"imageLayoutVersion":"1.0.0"}"#).unwrap();
    let digests: Vec<String> = layers.iter().map(|l| write_blob(root, l)).collect();
    let config = write_blob(root, b"{}");
    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": {"mediaType": "application/vnd.oci.image.config.v1+json", "digest": config, "size": 2},
        "layers": digests.iter().map(|d| serde_json::json!({
            "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
            "digest": d,
            "size": 0,
        })).collect::<Vec<_>>(),
    });
    let manifest_digest = write_blob(root, manifest.to_string().as_bytes());
    let index = serde_json::json!({
        "schemaVersion": 2,
        "manifests": [{
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "digest": manifest_digest,
            "size": 0,
            "annotations": {"org.opencontainers.image.ref.name": "example:latest"},
        }],
    });
    fs::write(root.join("index.json"), index.to_string()).unwrap();
    digests
}

#[test]
fn oci_layout_loads_layers_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("image");
    let digests = oci_layout(
        &root,
        &[
            gzip(&layer_tar(&[("etc/motd", "v1"), ("bin/sh", "elf")])),
            gzip(&layer_tar(&[("etc/motd", "v2"), ("etc/.wh.gone", "")])),
        ],
    );

    let source = ImageSource::parse(&root.display().to_string()).unwrap();
    assert!(matches!(source, ImageSource::OciLayout(_)));
    let store = source.load(&layout(dir.path())).unwrap();

    assert_eq!(store.image().as_str(), "example:latest");
    assert_eq!(store.len(), 2);
    assert_eq!(store.layer(0).unwrap().id().as_str(), digests[0]);
    assert_eq!(store.layer(1).unwrap().id().as_str(), digests[1]);

    let tree = squash(&store);
    let motd = tree.get("/etc/motd").unwrap();
    assert_eq!(motd.layer_index, 1);
    let mut out = String::new();
    store
        .layer(1)
        .unwrap()
        .read_content(&motd.entry)
        .unwrap()
        .read_to_string(&mut out)
        .unwrap();
    assert_eq!(out, "v2");
}

#[test]
fn oci_layout_with_corrupt_blob_fails_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("image");
    let digests = oci_layout(&root, &[layer_tar(&[("a", "1")])]);
    let hex = digests[0].trim_start_matches("sha256:");
    fs::write(root.join("blobs/sha256").join(hex), b"tampered").unwrap();

    let result = ImageSource::OciLayout(root).load(&layout(dir.path()));
    assert!(matches!(result, Err(StoreError::IntegrityFailure { .. })));
}

#[test]
fn docker_archive_is_detected_and_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let base = layer_tar(&[("etc/os-release", "ID=test"), ("usr/bin/app", "v1")]);
    let top = layer_tar(&[("usr/bin/app", "v2")]);
    let manifest = serde_json::json!([{
        "Config": "config.json",
        "RepoTags": ["example/app:1.0"],
        "Layers": ["base/layer.tar", "top/layer.tar"],
    }])
    .to_string();

    let mut ar = tar::Builder::new(Vec::new());
    for (path, data) in [
        ("base/layer.tar", base.as_slice()),
        ("top/layer.tar", top.as_slice()),
        ("config.json", b"{}".as_slice()),
        ("manifest.json", manifest.as_bytes()),
    ] {
        let mut h = tar::Header::new_gnu();
        h.set_mode(0o644);
        h.set_size(data.len() as u64);
        h.set_cksum();
        ar.append_data(&mut h, path, data).unwrap();
    }
    let archive_path = dir.path().join("image.tar");
    fs::write(&archive_path, ar.into_inner().unwrap()).unwrap();

    let source = ImageSource::parse(&archive_path.display().to_string()).unwrap();
    assert!(matches!(source, ImageSource::DockerArchive(_)));
    let store = source.load(&layout(dir.path())).unwrap();
    assert_eq!(store.image().as_str(), "example/app:1.0");
    assert_eq!(store.layer(0).unwrap().id().as_str(), sha256(&base));
    assert_eq!(squash(&store).get("/usr/bin/app").unwrap().layer_index, 1);
}

#[test]
fn plain_tarball_is_a_single_layer_source() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("layer.tar.gz");
    fs::write(&path, gzip(&layer_tar(&[("hello", "world")]))).unwrap();

    let source = ImageSource::parse(&path.display().to_string()).unwrap();
    assert_eq!(source, ImageSource::Archives(vec![path.clone()]));
    let store = source.load(&layout(dir.path())).unwrap();
    let entry = store.layer(0).unwrap().entry("/hello").unwrap();
    assert_eq!(entry.mode, S_IFREG | 0o644);
    assert_eq!(entry.size, 5);
}

#[test]
fn directory_snapshot_records_fifo() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("rootfs");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("file"), "x").unwrap();
    let fifo = std::ffi::CString::new(root.join("pipe").to_str().unwrap()).unwrap();
    // SAFETY: `fifo` is a valid NUL-terminated path for the duration of the call.
    let rc = unsafe { libc::mkfifo(fifo.as_ptr(), 0o644) };
    assert_eq!(rc, 0);

    let store = ImageSource::parse(&format!("dir:{}", root.display()))
        .unwrap()
        .load(&layout(dir.path()))
        .unwrap();
    let pipe = store.layer(0).unwrap().entry("/pipe").unwrap();
    assert_eq!(mode::format_bits(pipe.mode), S_IFIFO);
    assert!(pipe.digest.is_none());
}
