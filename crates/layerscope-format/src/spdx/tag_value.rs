use super::{
    checksums, creator_from, document_comment, document_namespace, file_comment, file_id,
    is_line_safe, line_value, package_comment, package_id, parse_checksum,
    parse_document_comment, parse_file_comment, parse_package_comment, validate_created,
    DATA_LICENSE, DOCUMENT_ID, LICENSE_LIST_VERSION, NOASSERTION, SPDX_VERSION, TOOL_PREFIX,
};
use crate::model::{FileRecord, Package, Sbom, SourceDescription};
use crate::{Format, FormatError};
use layerscope_schema::{ImageRef, Location};
use std::fmt::Write as _;

const FORMAT: Format = Format::SpdxTagValue;

pub(crate) fn matches(text: &str) -> bool {
    text.lines()
        .map(str::trim_start)
        .any(|l| l.starts_with("SPDXVersion:"))
}

#[derive(Default)]
struct TagWriter {
    out: String,
}

impl TagWriter {
    /// A plain `Tag: value` line, or a text block when the value would not
    /// survive one.
    fn tag(&mut self, tag: &str, value: &str) -> Result<(), FormatError> {
        if is_line_safe(value) {
            let _ = writeln!(self.out, "{tag}: {value}");
            Ok(())
        } else {
            self.text(tag, value)
        }
    }

    /// A `<text>` block. There is no escape for the closing marker, and line
    /// reading folds `\r\n`, so values holding either are refused.
    fn text(&mut self, tag: &str, value: &str) -> Result<(), FormatError> {
        if value.contains("</text>") || value.contains('\r') {
            return Err(FormatError::encode(
                FORMAT,
                format!("{tag} value {value:?} cannot be written as a text block"),
            ));
        }
        let _ = writeln!(self.out, "{tag}: <text>{value}</text>");
        Ok(())
    }

    fn heading(&mut self, title: &str) {
        let _ = write!(self.out, "\n##### {title}\n\n");
    }
}

pub fn encode(sbom: &Sbom) -> Result<Vec<u8>, FormatError> {
    let mut w = TagWriter::default();
    w.tag("SPDXVersion", SPDX_VERSION)?;
    w.tag("DataLicense", DATA_LICENSE)?;
    w.tag("SPDXID", DOCUMENT_ID)?;
    w.tag("DocumentName", sbom.source.image_ref.as_str())?;
    w.tag("DocumentNamespace", &document_namespace(sbom))?;
    w.tag("LicenseListVersion", LICENSE_LIST_VERSION)?;
    w.tag("Creator", &format!("{TOOL_PREFIX}{}", sbom.creator))?;
    w.tag("Created", &sbom.created)?;
    w.text("DocumentComment", &document_comment(&sbom.source))?;

    for (i, pkg) in sbom.packages.iter().enumerate() {
        w.heading(&format!("Package: {}", line_value(&pkg.name)));
        w.tag("PackageName", &pkg.name)?;
        w.tag("SPDXID", &package_id(i))?;
        if !pkg.version.is_empty() {
            w.tag("PackageVersion", &pkg.version)?;
        }
        w.tag("PackageDownloadLocation", NOASSERTION)?;
        w.tag("FilesAnalyzed", "false")?;
        w.tag("PackageLicenseConcluded", NOASSERTION)?;
        w.tag("PackageLicenseDeclared", NOASSERTION)?;
        w.tag("PackageCopyrightText", NOASSERTION)?;
        if let Some(purl) = &pkg.purl {
            w.tag("ExternalRef", &format!("PACKAGE-MANAGER purl {purl}"))?;
        }
        if let Some(comment) = package_comment(&pkg.locations) {
            w.text("PackageComment", &comment)?;
        }
    }

    for (i, file) in sbom.files.iter().enumerate() {
        let name = line_value(&file.location.path);
        w.heading(&format!("File: {name}"));
        w.tag("FileName", &name)?;
        w.tag("SPDXID", &file_id(i))?;
        for (alg, value) in checksums(file) {
            w.tag("FileChecksum", &format!("{alg}: {value}"))?;
        }
        w.tag("LicenseConcluded", NOASSERTION)?;
        w.tag("CopyrightText", NOASSERTION)?;
        w.text("FileComment", &file_comment(file))?;
    }

    if !sbom.packages.is_empty() {
        w.heading("Relationships");
        for i in 0..sbom.packages.len() {
            w.tag("Relationship", &format!("{DOCUMENT_ID} DESCRIBES {}", package_id(i)))?;
        }
    }
    Ok(w.out.into_bytes())
}

/// Split a document into (tag, value) pairs, unwrapping `<text>` blocks that
/// may span lines. Blank lines and `#` comments are skipped. Text block
/// contents are kept exactly; plain values lose surrounding whitespace.
fn tokenize(text: &str) -> Result<Vec<(String, String)>, String> {
    let mut pairs = Vec::new();
    let mut lines = text.lines().enumerate();
    while let Some((n, raw)) = lines.next() {
        let line = raw.trim_start();
        if line.trim_end().is_empty() || line.starts_with('#') {
            continue;
        }
        let (tag, value) = line
            .split_once(':')
            .ok_or_else(|| format!("line {}: expected 'Tag: value'", n + 1))?;
        let value = value.trim_start();
        let value = match value.strip_prefix("<text>") {
            None => value.trim_end().to_owned(),
            Some(rest) => match rest.find("</text>") {
                Some(end) => rest[..end].to_owned(),
                None => {
                    let mut block = rest.to_owned();
                    loop {
                        let Some((_, next)) = lines.next() else {
                            return Err(format!("line {}: unterminated <text> block", n + 1));
                        };
                        block.push('\n');
                        if let Some(end) = next.find("</text>") {
                            block.push_str(&next[..end]);
                            break;
                        }
                        block.push_str(next);
                    }
                    block
                }
            },
        };
        pairs.push((tag.trim().to_owned(), value));
    }
    Ok(pairs)
}

#[derive(Default)]
struct RawFile {
    name: String,
    checksums: Vec<(String, String)>,
    comment: Option<String>,
}

#[derive(Default)]
struct RawPackage {
    name: String,
    version: String,
    purl: Option<String>,
    comment: Option<String>,
}

enum Section {
    Document,
    Package,
    File,
}

pub fn decode(bytes: &[u8]) -> Result<Sbom, FormatError> {
    decode_text(bytes).map_err(|reason| FormatError::decode(FORMAT, reason))
}

fn decode_text(bytes: &[u8]) -> Result<Sbom, String> {
    let text = std::str::from_utf8(bytes).map_err(|e| format!("not UTF-8: {e}"))?;
    let pairs = tokenize(text)?;

    let mut version = None;
    let mut name = None;
    let mut creators = Vec::new();
    let mut created = None;
    let mut doc_comment = None;
    let mut files: Vec<RawFile> = Vec::new();
    let mut packages: Vec<RawPackage> = Vec::new();
    let mut section = Section::Document;

    for (tag, value) in pairs {
        match tag.as_str() {
            "SPDXVersion" => version = Some(value),
            "DocumentName" => name = Some(value),
            "Creator" => creators.push(value),
            "Created" => created = Some(value),
            "DocumentComment" => doc_comment = Some(value),
            "PackageName" => {
                section = Section::Package;
                packages.push(RawPackage {
                    name: value,
                    ..RawPackage::default()
                });
            }
            "FileName" => {
                section = Section::File;
                files.push(RawFile {
                    name: value,
                    ..RawFile::default()
                });
            }
            "PackageVersion" => {
                if let (Section::Package, Some(p)) = (&section, packages.last_mut()) {
                    p.version = value;
                }
            }
            "ExternalRef" => {
                if let (Section::Package, Some(p)) = (&section, packages.last_mut()) {
                    let parts: Vec<&str> = value.split_whitespace().collect();
                    if let [_, "purl", locator] = parts.as_slice() {
                        p.purl = Some((*locator).to_owned());
                    }
                }
            }
            "PackageComment" => {
                if let (Section::Package, Some(p)) = (&section, packages.last_mut()) {
                    p.comment = Some(value);
                }
            }
            "FileChecksum" => {
                if let (Section::File, Some(f)) = (&section, files.last_mut()) {
                    let (alg, sum) = value
                        .split_once(':')
                        .ok_or_else(|| format!("malformed FileChecksum '{value}'"))?;
                    f.checksums.push((alg.to_owned(), sum.to_owned()));
                }
            }
            "FileComment" => {
                if let (Section::File, Some(f)) = (&section, files.last_mut()) {
                    f.comment = Some(value);
                }
            }
            _ => {}
        }
    }

    match version.as_deref() {
        Some(SPDX_VERSION) => {}
        Some(other) => return Err(format!("unsupported SPDX version '{other}'")),
        None => return Err("missing SPDXVersion".to_owned()),
    }
    let image = ImageRef::new(name.ok_or("missing DocumentName")?);
    let created = created.ok_or("missing Created")?;
    validate_created(&created)?;
    let (scope, layers) = parse_document_comment(doc_comment.as_deref())?;

    let files = files
        .into_iter()
        .map(|raw| {
            let mut comment = parse_file_comment(raw.comment.as_deref())?;
            let path = comment.path_or(raw.name);
            Ok(FileRecord {
                location: Location::new(path, comment.layer, image.clone()),
                metadata: comment.metadata,
                digests: raw
                    .checksums
                    .iter()
                    .filter_map(|(alg, sum)| parse_checksum(alg, sum))
                    .collect(),
            })
        })
        .collect::<Result<Vec<_>, String>>()?;
    let packages = packages
        .into_iter()
        .map(|raw| {
            Ok(Package {
                locations: parse_package_comment(raw.comment.as_deref(), &image)?,
                name: raw.name,
                version: raw.version,
                purl: raw.purl,
            })
        })
        .collect::<Result<Vec<_>, String>>()?;

    let source = SourceDescription {
        image_ref: image,
        scope,
        layers,
    };
    let mut sbom = Sbom::new(source)
        .with_files(files)
        .with_packages(packages)
        .with_created(created);
    if let Some(creator) = creator_from(&creators) {
        sbom.creator = creator;
    }
    Ok(sbom)
}
