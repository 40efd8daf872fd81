//! CycloneDX 1.4 JSON.
//!
//! Packages become `library` components and files become `file` components.
//! Layer coordinates, scope, and POSIX metadata travel as `layerscope:*`
//! properties, which other CycloneDX consumers ignore.

use crate::model::{location_token, parse_location_token, FileRecord, Package, Sbom, SourceDescription};
use crate::{Format, FormatError};
use layerscope_schema::{FileDigest, FileMetadata, FileType, ImageRef, LayerId, Location, Scope};
use serde::{Deserialize, Serialize};

pub const SPEC_VERSION: &str = "1.4";
const BOM_FORMAT: &str = "CycloneDX";
const FORMAT: Format = Format::CycloneDxJson;

const PROP_SCOPE: &str = "layerscope:scope";
const PROP_LAYER: &str = "layerscope:layer";
const PROP_LOCATION: &str = "layerscope:location";
const PROP_LAYER_ID: &str = "layerscope:file:layerID";
const PROP_TYPE: &str = "layerscope:file:type";
const PROP_MODE: &str = "layerscope:file:mode";
const PROP_UID: &str = "layerscope:file:userID";
const PROP_GID: &str = "layerscope:file:groupID";
const PROP_SIZE: &str = "layerscope:file:size";
const PROP_LINK: &str = "layerscope:file:linkDestination";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Bom {
    bom_format: String,
    spec_version: String,
    #[serde(default = "one")]
    version: u32,
    metadata: Metadata,
    #[serde(default)]
    components: Vec<Component>,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Serialize, Deserialize)]
struct Metadata {
    timestamp: String,
    #[serde(default)]
    tools: Vec<Tool>,
    component: Component,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    properties: Vec<Property>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Tool {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    vendor: Option<String>,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Component {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "bom-ref", default, skip_serializing_if = "Option::is_none")]
    bom_ref: Option<String>,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    purl: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    hashes: Vec<Hash>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    properties: Vec<Property>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Hash {
    alg: String,
    content: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Property {
    name: String,
    value: String,
}

fn prop(name: &str, value: impl ToString) -> Property {
    Property {
        name: name.to_owned(),
        value: value.to_string(),
    }
}

pub(crate) fn matches(value: &serde_json::Value) -> bool {
    value.get("bomFormat").and_then(serde_json::Value::as_str) == Some(BOM_FORMAT)
}

fn file_component(index: usize, file: &FileRecord) -> Component {
    let mut properties = vec![prop(PROP_LAYER_ID, &file.location.layer_id)];
    if let Some(m) = &file.metadata {
        properties.push(prop(PROP_TYPE, m.file_type));
        properties.push(prop(PROP_MODE, format!("{:o}", m.mode)));
        properties.push(prop(PROP_UID, m.user_id));
        properties.push(prop(PROP_GID, m.group_id));
        properties.push(prop(PROP_SIZE, m.size));
        if let Some(dest) = &m.link_destination {
            properties.push(prop(PROP_LINK, dest));
        }
    }
    Component {
        kind: "file".to_owned(),
        bom_ref: Some(format!("file-{index}")),
        name: file.location.path.clone(),
        version: None,
        purl: None,
        hashes: file
            .digests
            .iter()
            .map(|d| Hash {
                alg: d.algorithm.cyclonedx_name().to_owned(),
                content: d.value.clone(),
            })
            .collect(),
        properties,
    }
}

fn package_component(index: usize, pkg: &Package) -> Component {
    Component {
        kind: "library".to_owned(),
        bom_ref: Some(format!("pkg-{index}")),
        name: pkg.name.clone(),
        version: (!pkg.version.is_empty()).then(|| pkg.version.clone()),
        purl: pkg.purl.clone(),
        hashes: Vec::new(),
        properties: pkg
            .locations
            .iter()
            .map(|l| prop(PROP_LOCATION, location_token(l)))
            .collect(),
    }
}

pub fn encode(sbom: &Sbom) -> Result<Vec<u8>, FormatError> {
    let mut properties = vec![prop(PROP_SCOPE, sbom.source.scope)];
    properties.extend(sbom.source.layers.iter().map(|l| prop(PROP_LAYER, l)));

    let components = sbom
        .packages
        .iter()
        .enumerate()
        .map(|(i, p)| package_component(i, p))
        .chain(
            sbom.files
                .iter()
                .enumerate()
                .map(|(i, f)| file_component(i, f)),
        )
        .collect();

    let (tool_name, tool_version) = match sbom.creator.rsplit_once('-') {
        Some((name, version)) => (name.to_owned(), Some(version.to_owned())),
        None => (sbom.creator.clone(), None),
    };
    let bom = Bom {
        bom_format: BOM_FORMAT.to_owned(),
        spec_version: SPEC_VERSION.to_owned(),
        version: 1,
        metadata: Metadata {
            timestamp: sbom.created.clone(),
            tools: vec![Tool {
                vendor: None,
                name: tool_name,
                version: tool_version,
            }],
            component: Component {
                kind: "container".to_owned(),
                bom_ref: None,
                name: sbom.source.image_ref.to_string(),
                version: None,
                purl: None,
                hashes: Vec::new(),
                properties: Vec::new(),
            },
            properties,
        },
        components,
    };
    let mut out = serde_json::to_vec_pretty(&bom).map_err(|e| FormatError::encode(FORMAT, e))?;
    out.push(b'\n');
    Ok(out)
}

fn properties<'a>(props: &'a [Property], name: &'static str) -> impl Iterator<Item = &'a str> + 'a {
    props
        .iter()
        .filter(move |p| p.name == name)
        .map(|p| p.value.as_str())
}

fn first<'a>(props: &'a [Property], name: &'static str) -> Option<&'a str> {
    properties(props, name).next()
}

fn file_metadata(props: &[Property]) -> Result<Option<FileMetadata>, String> {
    let Some(file_type) = first(props, PROP_TYPE) else {
        return Ok(None);
    };
    let required = |name: &'static str| {
        first(props, name).ok_or_else(|| format!("file component has a type but no {name}"))
    };
    let number = |name: &'static str| -> Result<u32, String> {
        let v = required(name)?;
        v.parse().map_err(|e| format!("invalid {name} '{v}': {e}"))
    };
    let mode = required(PROP_MODE)?;
    Ok(Some(FileMetadata {
        mode: u32::from_str_radix(mode, 8).map_err(|e| format!("invalid mode '{mode}': {e}"))?,
        file_type: file_type.parse::<FileType>()?,
        user_id: number(PROP_UID)?,
        group_id: number(PROP_GID)?,
        link_destination: first(props, PROP_LINK).map(str::to_owned),
        size: first(props, PROP_SIZE)
            .map(str::parse::<u64>)
            .transpose()
            .map_err(|e| format!("invalid size: {e}"))?
            .unwrap_or(0),
    }))
}

pub fn decode(bytes: &[u8]) -> Result<Sbom, FormatError> {
    decode_bom(bytes).map_err(|reason| FormatError::decode(FORMAT, reason))
}

fn decode_bom(bytes: &[u8]) -> Result<Sbom, String> {
    let bom: Bom = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
    if bom.bom_format != BOM_FORMAT {
        return Err(format!("bomFormat is '{}'", bom.bom_format));
    }
    if bom.spec_version != SPEC_VERSION {
        return Err(format!(
            "unsupported specVersion {} (expected {SPEC_VERSION})",
            bom.spec_version
        ));
    }
    chrono::DateTime::parse_from_rfc3339(&bom.metadata.timestamp)
        .map_err(|e| format!("invalid timestamp '{}': {e}", bom.metadata.timestamp))?;

    let image = ImageRef::new(bom.metadata.component.name);
    let scope = match first(&bom.metadata.properties, PROP_SCOPE) {
        Some(s) => s.parse::<Scope>()?,
        None => Scope::Squashed,
    };
    let layers = properties(&bom.metadata.properties, PROP_LAYER)
        .map(LayerId::new)
        .collect();

    let mut files = Vec::new();
    let mut packages = Vec::new();
    for c in bom.components {
        if c.kind == "file" {
            let layer = first(&c.properties, PROP_LAYER_ID).unwrap_or_default();
            files.push(FileRecord {
                location: Location::new(c.name.as_str(), LayerId::new(layer), image.clone()),
                metadata: file_metadata(&c.properties)?,
                digests: c
                    .hashes
                    .iter()
                    .filter_map(|h| {
                        let algorithm = h.alg.parse().ok()?;
                        Some(FileDigest::new(algorithm, h.content.as_str()))
                    })
                    .collect(),
            });
        } else {
            let locations = properties(&c.properties, PROP_LOCATION)
                .map(|t| parse_location_token(t, &image).ok_or_else(|| format!("invalid location '{t}'")))
                .collect::<Result<Vec<_>, String>>()?;
            packages.push(Package {
                name: c.name,
                version: c.version.unwrap_or_default(),
                purl: c.purl,
                locations,
            });
        }
    }

    let creator = bom.metadata.tools.first().map(|t| match &t.version {
        Some(v) => format!("{}-{v}", t.name),
        None => t.name.clone(),
    });
    let mut sbom = Sbom::new(SourceDescription {
        image_ref: image,
        scope,
        layers,
    })
    .with_files(files)
    .with_packages(packages)
    .with_created(bom.metadata.timestamp);
    if let Some(creator) = creator {
        sbom.creator = creator;
    }
    Ok(sbom)
}
