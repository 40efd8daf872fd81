use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Current cache format version. Incremented on incompatible layout changes.
pub const STORE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

/// Directory layout of the layerscope content cache.
///
/// Manages paths for cached file objects, the staging area used while
/// unpacking outer archives, the cache lock, and the version marker. All
/// subdirectories are created on [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreVersion {
    format_version: u32,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn objects_dir(&self) -> PathBuf {
        self.root.join("store").join("objects")
    }

    /// Scratch space for unpacking docker archives before their layers are read.
    #[inline]
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("store").join("staging")
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.root.join("store").join(".lock")
    }

    #[inline]
    fn version_file(&self) -> PathBuf {
        self.root.join("store").join(VERSION_FILE)
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.objects_dir())?;
        fs::create_dir_all(self.staging_dir())?;

        let version_path = self.version_file();
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StoreVersion {
                format_version: STORE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            let store_dir = self.root.join("store");
            let mut tmp = NamedTempFile::new_in(&store_dir)?;
            tmp.write_all(content.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&version_path)
                .map_err(|e| StoreError::Io(e.error))?;
            crate::fsync_dir(&store_dir)?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let content = fs::read_to_string(self.version_file())?;
        let ver: StoreVersion = serde_json::from_str(&content)?;

        if ver.format_version != STORE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STORE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_correct() {
        let layout = StoreLayout::new("/tmp/layerscope-test");
        assert_eq!(
            layout.objects_dir(),
            PathBuf::from("/tmp/layerscope-test/store/objects")
        );
        assert_eq!(
            layout.staging_dir(),
            PathBuf::from("/tmp/layerscope-test/store/staging")
        );
        assert_eq!(
            layout.lock_file(),
            PathBuf::from("/tmp/layerscope-test/store/.lock")
        );
    }

    #[test]
    fn initialize_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();

        assert!(layout.objects_dir().is_dir());
        assert!(layout.staging_dir().is_dir());
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        layout.initialize().unwrap();
        layout.verify_version().unwrap();
    }

    #[test]
    fn foreign_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        fs::write(
            dir.path().join("store").join(VERSION_FILE),
            r#"{"format_version": 99}"#,
        )
        .unwrap();
        assert!(matches!(
            layout.initialize(),
            Err(StoreError::VersionMismatch { found: 99, .. })
        ));
    }
}
