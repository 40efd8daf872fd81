//! SPDX 2.3 documents, in tag-value and JSON form.
//!
//! SPDX has no slot for layer coordinates or POSIX file metadata, so both
//! encodings carry them as `key: value` lines in the file comment:
//!
//! ```text
//! layerID: "sha256:…"
//! type: symbolicLink
//! mode: 120777
//! userID: 0
//! groupID: 0
//! size: 0
//! linkDestination: "./file-1.txt"
//! ```
//!
//! String values are JSON string literals with `<` escaped too, so a value
//! can neither span lines nor close a tag-value `<text>` block. A `path` line
//! is added when the file name cannot be written on a tag-value line as is.
//!
//! The document comment carries the scope and the ordered layer list, and a
//! package comment lists its locations as `location: "path@layer"` lines.

pub mod json;
pub mod tag_value;

use crate::model::{location_token, parse_location_token, FileRecord, Sbom, SourceDescription};
use layerscope_schema::{
    DigestAlgorithm, FileDigest, FileMetadata, FileType, ImageRef, LayerId, Location, Scope,
};

pub const SPDX_VERSION: &str = "SPDX-2.3";
pub const SPDX_VERSION_NUMBER: &str = "2.3";
pub const DATA_LICENSE: &str = "CC0-1.0";
pub const DOCUMENT_ID: &str = "SPDXRef-DOCUMENT";
pub const NOASSERTION: &str = "NOASSERTION";
pub(crate) const LICENSE_LIST_VERSION: &str = "3.20";
pub(crate) const TOOL_PREFIX: &str = "Tool: ";

/// SPDX requires a SHA1 checksum on every file; this stands in when no
/// digests were computed and is dropped again on decode.
pub(crate) const ZERO_SHA1: &str = "0000000000000000000000000000000000000000";

pub(crate) fn document_namespace(sbom: &Sbom) -> String {
    let name: String = sbom
        .source
        .image_ref
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '-' })
        .collect();
    format!("https://layerscope.dev/spdx/{name}-{}", sbom.created)
}

pub(crate) fn file_id(index: usize) -> String {
    format!("SPDXRef-File-{index}")
}

pub(crate) fn package_id(index: usize) -> String {
    format!("SPDXRef-Package-{index}")
}

/// `value` as a single-line JSON string literal containing no `<`.
pub(crate) fn quote(value: &str) -> String {
    serde_json::Value::String(value.to_owned())
        .to_string()
        .replace('<', "\\u003c")
}

/// Inverse of [`quote`]. Unquoted values, as written by hand or by older
/// documents, are taken verbatim.
pub(crate) fn unquote(raw: &str) -> Result<String, String> {
    if raw.starts_with('"') {
        serde_json::from_str(raw).map_err(|e| format!("invalid quoted value {raw}: {e}"))
    } else {
        Ok(raw.to_owned())
    }
}

/// Whether `value` survives a tag-value `Tag: value` line unchanged.
pub(crate) fn is_line_safe(value: &str) -> bool {
    !value.is_empty()
        && value.trim() == value
        && !value.chars().any(char::is_control)
        && !value.starts_with("<text>")
}

pub(crate) fn document_comment(source: &SourceDescription) -> String {
    let mut lines = vec![format!("scope: {}", source.scope)];
    lines.extend(source.layers.iter().map(|l| format!("layer: {}", quote(l))));
    lines.join("\n")
}

/// Scope and layer list from a document comment; documents from other tools
/// have neither and default to the squashed scope with no layers.
pub(crate) fn parse_document_comment(text: Option<&str>) -> Result<(Scope, Vec<LayerId>), String> {
    let mut scope = Scope::Squashed;
    let mut layers = Vec::new();
    for (key, value) in comment_fields(text.unwrap_or_default()) {
        match key {
            "scope" => scope = value.parse()?,
            "layer" => layers.push(LayerId::new(unquote(value)?)),
            _ => {}
        }
    }
    Ok((scope, layers))
}

/// What a file comment carries besides the file name.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct FileComment {
    pub layer: LayerId,
    pub metadata: Option<FileMetadata>,
    /// Exact path, present when the file name had to be quoted.
    pub path: Option<String>,
}

impl FileComment {
    /// The recorded path, or `file_name` when the comment has none.
    pub fn path_or(&mut self, file_name: String) -> String {
        self.path.take().unwrap_or(file_name)
    }
}

/// `value` itself, or its quoted form when a tag-value line would alter it.
pub(crate) fn line_value(value: &str) -> String {
    if is_line_safe(value) {
        value.to_owned()
    } else {
        quote(value)
    }
}

pub(crate) fn file_comment(record: &FileRecord) -> String {
    let mut lines = vec![format!("layerID: {}", quote(&record.location.layer_id))];
    if !is_line_safe(&record.location.path) {
        lines.push(format!("path: {}", quote(&record.location.path)));
    }
    if let Some(m) = &record.metadata {
        lines.push(format!("type: {}", m.file_type));
        lines.push(format!("mode: {:o}", m.mode));
        lines.push(format!("userID: {}", m.user_id));
        lines.push(format!("groupID: {}", m.group_id));
        lines.push(format!("size: {}", m.size));
        if let Some(dest) = &m.link_destination {
            lines.push(format!("linkDestination: {}", quote(dest)));
        }
    }
    lines.join("\n")
}

/// Layer id, metadata and exact path from a file comment. Metadata is present
/// when a `type` line is; the remaining required fields must then be present
/// too. Repeated keys are an error.
pub(crate) fn parse_file_comment(text: Option<&str>) -> Result<FileComment, String> {
    let mut seen = std::collections::HashSet::new();
    let mut layer = LayerId::new("");
    let mut path = None;
    let mut file_type = None;
    let mut mode = None;
    let mut user_id = None;
    let mut group_id = None;
    let mut size = 0;
    let mut link_destination = None;
    for (key, value) in comment_fields(text.unwrap_or_default()) {
        if !seen.insert(key) {
            return Err(format!("file comment repeats '{key}'"));
        }
        match key {
            "layerID" => layer = LayerId::new(unquote(value)?),
            "path" => path = Some(unquote(value)?),
            "type" => file_type = Some(value.parse::<FileType>()?),
            "mode" => {
                mode = Some(
                    u32::from_str_radix(value, 8).map_err(|e| format!("invalid mode '{value}': {e}"))?,
                );
            }
            "userID" => user_id = Some(parse_number(key, value)?),
            "groupID" => group_id = Some(parse_number(key, value)?),
            "size" => size = value.parse().map_err(|e| format!("invalid size '{value}': {e}"))?,
            "linkDestination" => link_destination = Some(unquote(value)?),
            _ => {}
        }
    }
    let Some(file_type) = file_type else {
        return Ok(FileComment {
            layer,
            metadata: None,
            path,
        });
    };
    let missing = |field: &str| format!("file comment has a type but no {field}");
    let metadata = FileMetadata {
        mode: mode.ok_or_else(|| missing("mode"))?,
        file_type,
        user_id: user_id.ok_or_else(|| missing("userID"))?,
        group_id: group_id.ok_or_else(|| missing("groupID"))?,
        link_destination,
        size,
    };
    Ok(FileComment {
        layer,
        metadata: Some(metadata),
        path,
    })
}

fn parse_number(key: &str, value: &str) -> Result<u32, String> {
    value.parse().map_err(|e| format!("invalid {key} '{value}': {e}"))
}

pub(crate) fn package_comment(locations: &[Location]) -> Option<String> {
    if locations.is_empty() {
        return None;
    }
    Some(
        locations
            .iter()
            .map(|l| format!("location: {}", quote(&location_token(l))))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

pub(crate) fn parse_package_comment(text: Option<&str>, image: &ImageRef) -> Result<Vec<Location>, String> {
    comment_fields(text.unwrap_or_default())
        .filter(|(key, _)| *key == "location")
        .map(|(_, value)| {
            let token = unquote(value)?;
            parse_location_token(&token, image).ok_or_else(|| format!("invalid location '{value}'"))
        })
        .collect()
}

/// Checksums to write for a file, as (SPDX algorithm name, value).
pub(crate) fn checksums(record: &FileRecord) -> Vec<(&'static str, String)> {
    if record.digests.is_empty() {
        return vec![("SHA1", ZERO_SHA1.to_owned())];
    }
    record
        .digests
        .iter()
        .map(|d| (d.algorithm.spdx_name(), d.value.clone()))
        .collect()
}

/// A checksum read back from a document; algorithms the model does not
/// track are dropped.
pub(crate) fn parse_checksum(algorithm: &str, value: &str) -> Option<FileDigest> {
    let algorithm: DigestAlgorithm = algorithm.trim().parse().ok()?;
    Some(FileDigest::new(algorithm, value.trim()))
}

pub(crate) fn creator_from(creators: &[String]) -> Option<String> {
    creators
        .iter()
        .find_map(|c| c.strip_prefix(TOOL_PREFIX))
        .or_else(|| creators.first().map(String::as_str))
        .map(str::to_owned)
}

pub(crate) fn validate_created(created: &str) -> Result<(), String> {
    chrono::DateTime::parse_from_rfc3339(created)
        .map(|_| ())
        .map_err(|e| format!("invalid created timestamp '{created}': {e}"))
}

/// `key: value` lines of a comment. Quoted values carry any significant
/// whitespace inside their quotes, so both sides are trimmed.
fn comment_fields(text: &str) -> impl Iterator<Item = (&str, &str)> {
    text.lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim(), v.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use layerscope_schema::mode::S_IFLNK;

    fn record(metadata: Option<FileMetadata>) -> FileRecord {
        FileRecord {
            location: Location::new("/symlink-1", LayerId::new("sha256:abc"), ImageRef::new("img")),
            metadata,
            digests: vec![],
        }
    }

    #[test]
    fn file_comment_round_trip() {
        let metadata = FileMetadata {
            mode: S_IFLNK | 0o777,
            file_type: FileType::SymbolicLink,
            user_id: 0,
            group_id: 0,
            link_destination: Some("./file-1.txt".to_owned()),
            size: 0,
        };
        let text = file_comment(&record(Some(metadata.clone())));
        assert!(text.contains("mode: 120777"));
        assert!(text.contains("linkDestination: \"./file-1.txt\""));
        let parsed = parse_file_comment(Some(&text)).unwrap();
        assert_eq!(parsed.layer.as_str(), "sha256:abc");
        assert_eq!(parsed.metadata, Some(metadata));
        assert_eq!(parsed.path, None);
    }

    #[test]
    fn comment_without_type_has_no_metadata() {
        let parsed = parse_file_comment(Some("layerID: l0")).unwrap();
        assert_eq!(parsed.layer.as_str(), "l0");
        assert!(parsed.metadata.is_none());
    }

    #[test]
    fn link_target_cannot_inject_fields() {
        let metadata = FileMetadata {
            mode: S_IFLNK | 0o777,
            file_type: FileType::SymbolicLink,
            user_id: 1000,
            group_id: 1000,
            link_destination: Some("a\nmode: 4755\nuserID: 0".to_owned()),
            size: 0,
        };
        let text = file_comment(&record(Some(metadata.clone())));
        assert_eq!(text.lines().filter(|l| l.starts_with("mode:")).count(), 1);
        assert_eq!(parse_file_comment(Some(&text)).unwrap().metadata, Some(metadata));
    }

    #[test]
    fn repeated_keys_rejected() {
        let err = parse_file_comment(Some("type: directory\nmode: 40755\nmode: 4755")).unwrap_err();
        assert!(err.contains("repeats 'mode'"));
    }

    #[test]
    fn quote_hides_newlines_and_text_markers() {
        for value in ["plain", " padded ", "two\nlines", "x</text>y", "\"q\"", "tab\there"] {
            let quoted = quote(value);
            assert!(!quoted.contains('\n'));
            assert!(!quoted.contains('<'));
            assert_eq!(unquote(&quoted).unwrap(), value);
        }
        assert_eq!(unquote("bare value").unwrap(), "bare value");
    }

    #[test]
    fn unsafe_paths_recorded_in_comment() {
        assert_eq!(line_value("/etc/motd"), "/etc/motd");
        assert_eq!(line_value("/etc/x "), "\"/etc/x \"");
        let mut rec = record(None);
        rec.location.path = "/etc/x\ny".to_owned();
        let mut parsed = parse_file_comment(Some(&file_comment(&rec))).unwrap();
        assert_eq!(parsed.path_or("ignored".to_owned()), "/etc/x\ny");
    }

    #[test]
    fn type_without_mode_is_an_error() {
        assert!(parse_file_comment(Some("type: directory\nuserID: 0\ngroupID: 0")).is_err());
    }

    #[test]
    fn placeholder_sha1_not_read_back() {
        let sums = checksums(&record(None));
        assert_eq!(sums, vec![("SHA1", ZERO_SHA1.to_owned())]);
        assert!(parse_checksum("SHA1", ZERO_SHA1).is_none());
        assert_eq!(
            parse_checksum("SHA256", "ff"),
            Some(FileDigest::new(DigestAlgorithm::Sha256, "ff"))
        );
    }

    #[test]
    fn creator_prefers_tool_entry() {
        let creators = vec!["Organization: Acme".to_owned(), "Tool: layerscope-0.1.0".to_owned()];
        assert_eq!(creator_from(&creators).as_deref(), Some("layerscope-0.1.0"));
        assert_eq!(creator_from(&[]), None);
    }
}
