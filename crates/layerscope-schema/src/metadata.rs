use crate::entry::DirectoryEntry;
use crate::mode::{self, S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK, S_IFREG, S_IFSOCK};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of file kinds a cataloged location can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileType {
    RegularFile,
    HardLink,
    SymbolicLink,
    CharacterDevice,
    BlockDevice,
    Directory,
    FifoNode,
    Socket,
    Irregular,
}

impl FileType {
    /// Classify by format bits alone. Hardlinks cannot be recognized from the
    /// mode; see [`FileMetadata::classify`].
    pub fn from_mode(mode: u32) -> Self {
        match mode::format_bits(mode) {
            0 | S_IFREG => Self::RegularFile,
            S_IFDIR => Self::Directory,
            S_IFLNK => Self::SymbolicLink,
            S_IFCHR => Self::CharacterDevice,
            S_IFBLK => Self::BlockDevice,
            S_IFIFO => Self::FifoNode,
            S_IFSOCK => Self::Socket,
            _ => Self::Irregular,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RegularFile => "regularFile",
            Self::HardLink => "hardLink",
            Self::SymbolicLink => "symbolicLink",
            Self::CharacterDevice => "characterDevice",
            Self::BlockDevice => "blockDevice",
            Self::Directory => "directory",
            Self::FifoNode => "fifoNode",
            Self::Socket => "socket",
            Self::Irregular => "irregular",
        }
    }

    /// Whether locations of this type carry readable content.
    pub fn has_content(self) -> bool {
        matches!(self, Self::RegularFile | Self::HardLink)
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let all = [
            Self::RegularFile,
            Self::HardLink,
            Self::SymbolicLink,
            Self::CharacterDevice,
            Self::BlockDevice,
            Self::Directory,
            Self::FifoNode,
            Self::Socket,
            Self::Irregular,
        ];
        all.into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown file type '{s}'"))
    }
}

/// Normalized attributes of one cataloged location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub mode: u32,
    #[serde(rename = "type")]
    pub file_type: FileType,
    #[serde(rename = "userID")]
    pub user_id: u32,
    #[serde(rename = "groupID")]
    pub group_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_destination: Option<String>,
    #[serde(default)]
    pub size: u64,
}

impl FileMetadata {
    /// Derive the metadata record for `entry`.
    ///
    /// `hardlink_anchor` is the anchor path of the entry's hardlink group at its
    /// layer, when it belongs to one. Owner and mode always come from `entry`
    /// itself, never from the anchor.
    pub fn classify(entry: &DirectoryEntry, hardlink_anchor: Option<&str>) -> Self {
        let base = FileType::from_mode(entry.mode);
        let (file_type, link_destination) = match base {
            FileType::RegularFile => match (hardlink_anchor, entry.link_target.as_deref()) {
                (Some(anchor), _) => (FileType::HardLink, Some(anchor.to_owned())),
                (None, Some(target)) => (FileType::HardLink, Some(target.to_owned())),
                (None, None) => (FileType::RegularFile, None),
            },
            FileType::SymbolicLink => (FileType::SymbolicLink, entry.link_target.clone()),
            other => (other, None),
        };
        Self {
            mode: entry.mode,
            file_type,
            user_id: entry.uid,
            group_id: entry.gid,
            link_destination,
            size: entry.size,
        }
    }
}
