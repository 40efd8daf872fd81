use super::{
    checksums, creator_from, document_comment, document_namespace, file_comment, file_id,
    package_comment, package_id, parse_checksum, parse_document_comment, parse_file_comment,
    parse_package_comment, validate_created, DATA_LICENSE, DOCUMENT_ID, LICENSE_LIST_VERSION,
    NOASSERTION, SPDX_VERSION, TOOL_PREFIX,
};
use crate::model::{FileRecord, Package, Sbom, SourceDescription};
use crate::{Format, FormatError};
use layerscope_schema::{ImageRef, Location};
use serde::{Deserialize, Serialize};

const FORMAT: Format = Format::SpdxJson;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    spdx_version: String,
    data_license: String,
    #[serde(rename = "SPDXID")]
    spdx_id: String,
    name: String,
    document_namespace: String,
    creation_info: CreationInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
    #[serde(default)]
    packages: Vec<SpdxPackage>,
    #[serde(default)]
    files: Vec<SpdxFile>,
    #[serde(default)]
    relationships: Vec<Relationship>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreationInfo {
    created: String,
    creators: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    license_list_version: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpdxPackage {
    name: String,
    #[serde(rename = "SPDXID")]
    spdx_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version_info: Option<String>,
    download_location: String,
    #[serde(default)]
    files_analyzed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    external_refs: Vec<ExternalRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExternalRef {
    reference_category: String,
    reference_type: String,
    reference_locator: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpdxFile {
    file_name: String,
    #[serde(rename = "SPDXID")]
    spdx_id: String,
    #[serde(default)]
    checksums: Vec<Checksum>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    license_concluded: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    copyright_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Checksum {
    algorithm: String,
    checksum_value: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Relationship {
    spdx_element_id: String,
    relationship_type: String,
    related_spdx_element: String,
}

pub(crate) fn matches(value: &serde_json::Value) -> bool {
    value.get("spdxVersion").is_some()
}

pub fn encode(sbom: &Sbom) -> Result<Vec<u8>, FormatError> {
    let packages = sbom
        .packages
        .iter()
        .enumerate()
        .map(|(i, pkg)| SpdxPackage {
            name: pkg.name.clone(),
            spdx_id: package_id(i),
            version_info: (!pkg.version.is_empty()).then(|| pkg.version.clone()),
            download_location: NOASSERTION.to_owned(),
            files_analyzed: false,
            external_refs: pkg
                .purl
                .iter()
                .map(|purl| ExternalRef {
                    reference_category: "PACKAGE-MANAGER".to_owned(),
                    reference_type: "purl".to_owned(),
                    reference_locator: purl.clone(),
                })
                .collect(),
            comment: package_comment(&pkg.locations),
        })
        .collect();

    let files = sbom
        .files
        .iter()
        .enumerate()
        .map(|(i, file)| SpdxFile {
            file_name: file.location.path.clone(),
            spdx_id: file_id(i),
            checksums: checksums(file)
                .into_iter()
                .map(|(algorithm, value)| Checksum {
                    algorithm: algorithm.to_owned(),
                    checksum_value: value,
                })
                .collect(),
            license_concluded: Some(NOASSERTION.to_owned()),
            copyright_text: Some(NOASSERTION.to_owned()),
            comment: Some(file_comment(file)),
        })
        .collect();

    let relationships = (0..sbom.packages.len())
        .map(|i| Relationship {
            spdx_element_id: DOCUMENT_ID.to_owned(),
            relationship_type: "DESCRIBES".to_owned(),
            related_spdx_element: package_id(i),
        })
        .collect();

    let doc = Document {
        spdx_version: SPDX_VERSION.to_owned(),
        data_license: DATA_LICENSE.to_owned(),
        spdx_id: DOCUMENT_ID.to_owned(),
        name: sbom.source.image_ref.to_string(),
        document_namespace: document_namespace(sbom),
        creation_info: CreationInfo {
            created: sbom.created.clone(),
            creators: vec![format!("{TOOL_PREFIX}{}", sbom.creator)],
            license_list_version: Some(LICENSE_LIST_VERSION.to_owned()),
        },
        comment: Some(document_comment(&sbom.source)),
        packages,
        files,
        relationships,
    };
    let mut out = serde_json::to_vec_pretty(&doc).map_err(|e| FormatError::encode(FORMAT, e))?;
    out.push(b'\n');
    Ok(out)
}

pub fn decode(bytes: &[u8]) -> Result<Sbom, FormatError> {
    decode_document(bytes).map_err(|reason| FormatError::decode(FORMAT, reason))
}

fn decode_document(bytes: &[u8]) -> Result<Sbom, String> {
    let doc: Document = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
    if doc.spdx_version != SPDX_VERSION {
        return Err(format!("unsupported SPDX version '{}'", doc.spdx_version));
    }
    validate_created(&doc.creation_info.created)?;
    let image = ImageRef::new(doc.name);
    let (scope, layers) = parse_document_comment(doc.comment.as_deref())?;

    let files = doc
        .files
        .into_iter()
        .map(|f| {
            let mut comment = parse_file_comment(f.comment.as_deref())?;
            let path = comment.path_or(f.file_name);
            Ok(FileRecord {
                location: Location::new(path, comment.layer, image.clone()),
                metadata: comment.metadata,
                digests: f
                    .checksums
                    .iter()
                    .filter_map(|c| parse_checksum(&c.algorithm, &c.checksum_value))
                    .collect(),
            })
        })
        .collect::<Result<Vec<_>, String>>()?;

    let packages = doc
        .packages
        .into_iter()
        .map(|p| {
            let purl = p
                .external_refs
                .into_iter()
                .find(|r| r.reference_type == "purl")
                .map(|r| r.reference_locator);
            Ok(Package {
                locations: parse_package_comment(p.comment.as_deref(), &image)?,
                name: p.name,
                version: p.version_info.unwrap_or_default(),
                purl,
            })
        })
        .collect::<Result<Vec<_>, String>>()?;

    let mut sbom = Sbom::new(SourceDescription {
        image_ref: image,
        scope,
        layers,
    })
    .with_files(files)
    .with_packages(packages)
    .with_created(doc.creation_info.created);
    if let Some(creator) = creator_from(&doc.creation_info.creators) {
        sbom.creator = creator;
    }
    Ok(sbom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_creation_info_rejected() {
        let doc = br#"{"spdxVersion":"SPDX-2.3","dataLicense":"CC0-1.0","SPDXID":"SPDXRef-DOCUMENT","name":"x","documentNamespace":"n"}"#;
        let err = decode(doc).unwrap_err();
        assert!(err.to_string().contains("creationInfo"));
    }

    #[test]
    fn relationships_describe_packages() {
        let sbom = Sbom::new(SourceDescription {
            image_ref: ImageRef::new("img"),
            scope: layerscope_schema::Scope::Squashed,
            layers: vec![],
        })
        .with_packages(vec![Package {
            name: "busybox".to_owned(),
            version: "1.36.1".to_owned(),
            purl: Some("pkg:apk/alpine/busybox@1.36.1".to_owned()),
            locations: vec![],
        }]);
        let value: serde_json::Value = serde_json::from_slice(&encode(&sbom).unwrap()).unwrap();
        assert_eq!(value["relationships"][0]["relationshipType"], "DESCRIBES");
        assert_eq!(value["packages"][0]["SPDXID"], "SPDXRef-Package-0");
        assert_eq!(
            value["packages"][0]["externalRefs"][0]["referenceLocator"],
            "pkg:apk/alpine/busybox@1.36.1"
        );
    }
}
