use crate::mode::{self, S_IFDIR, S_IFREG};
use crate::types::Digest;
use serde::{Deserialize, Serialize};

fn default_link_count() -> u32 {
    1
}

/// Raw directory entry as recorded by one layer.
///
/// `mode` carries both the format bits and the permission bits. A regular
/// entry with a `link_target` is a hardlink record (tar `Link`); for symlinks
/// `link_target` is the stored target verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub path: String,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<Digest>,
    #[serde(default = "default_link_count")]
    pub link_count: u32,
    #[serde(default)]
    pub size: u64,
}

impl DirectoryEntry {
    pub fn new(path: impl Into<String>, mode: u32) -> Self {
        Self {
            path: path.into(),
            mode,
            uid: 0,
            gid: 0,
            link_target: None,
            digest: None,
            link_count: 1,
            size: 0,
        }
    }

    #[must_use]
    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    #[must_use]
    pub fn with_link_target(mut self, target: impl Into<String>) -> Self {
        self.link_target = Some(target.into());
        self
    }

    #[must_use]
    pub fn with_digest(mut self, digest: impl Into<Digest>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    #[must_use]
    pub fn with_link_count(mut self, count: u32) -> Self {
        self.link_count = count;
        self
    }

    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn is_dir(&self) -> bool {
        mode::format_bits(self.mode) == S_IFDIR
    }

    /// Regular files include entries whose mode carries no format bits, which
    /// is how many tar writers record plain files.
    pub fn is_regular(&self) -> bool {
        matches!(mode::format_bits(self.mode), 0 | S_IFREG)
    }

    /// Whether this entry may belong to a hardlink group at its layer.
    pub fn is_hardlink_candidate(&self) -> bool {
        self.is_regular() && self.digest.is_some() && (self.link_count > 1 || self.link_target.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::S_IFLNK;

    #[test]
    fn builder_sets_fields() {
        let e = DirectoryEntry::new("/etc/passwd", S_IFREG | 0o644)
            .with_owner(1, 2)
            .with_digest("d1")
            .with_size(42);
        assert_eq!(e.uid, 1);
        assert_eq!(e.gid, 2);
        assert_eq!(e.digest.as_deref(), Some("d1"));
        assert_eq!(e.size, 42);
        assert_eq!(e.link_count, 1);
        assert!(e.is_regular());
        assert!(!e.is_dir());
    }

    #[test]
    fn hardlink_candidate_requires_digest_and_link_marker() {
        let plain = DirectoryEntry::new("/a", S_IFREG | 0o644).with_digest("d");
        assert!(!plain.is_hardlink_candidate());
        assert!(plain.clone().with_link_count(2).is_hardlink_candidate());
        assert!(plain.with_link_target("/b").is_hardlink_candidate());

        let symlink = DirectoryEntry::new("/l", S_IFLNK | 0o777).with_link_target("/a");
        assert!(!symlink.is_hardlink_candidate());
    }

    #[test]
    fn deserialize_defaults_link_count() {
        let json = r#"{"path":"/x","mode":33188,"uid":0,"gid":0}"#;
        let e: DirectoryEntry = serde_json::from_str(json).unwrap();
        assert_eq!(e.link_count, 1);
        assert!(e.digest.is_none());
    }
}
