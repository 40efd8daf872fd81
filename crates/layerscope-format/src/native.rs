//! `layerscope-json`: the full model as JSON, with a schema header.

use crate::model::Sbom;
use crate::{Format, FormatError};
use serde::{Deserialize, Serialize};

pub const SCHEMA_NAME: &str = "layerscope-json";
pub const SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Serialize, Deserialize)]
struct Schema {
    name: String,
    version: String,
}

#[derive(Serialize)]
struct DocumentRef<'a> {
    schema: Schema,
    #[serde(flatten)]
    sbom: &'a Sbom,
}

#[derive(Deserialize)]
struct Document {
    schema: Schema,
    #[serde(flatten)]
    sbom: Sbom,
}

pub(crate) fn matches(value: &serde_json::Value) -> bool {
    value
        .pointer("/schema/name")
        .and_then(serde_json::Value::as_str)
        == Some(SCHEMA_NAME)
}

pub fn encode(sbom: &Sbom) -> Result<Vec<u8>, FormatError> {
    let doc = DocumentRef {
        schema: Schema {
            name: SCHEMA_NAME.to_owned(),
            version: SCHEMA_VERSION.to_owned(),
        },
        sbom,
    };
    let mut out = serde_json::to_vec_pretty(&doc)
        .map_err(|e| FormatError::encode(Format::LayerscopeJson, e))?;
    out.push(b'\n');
    Ok(out)
}

pub fn decode(bytes: &[u8]) -> Result<Sbom, FormatError> {
    let fail = |reason: String| FormatError::decode(Format::LayerscopeJson, reason);
    let doc: Document = serde_json::from_slice(bytes).map_err(|e| fail(e.to_string()))?;
    if doc.schema.name != SCHEMA_NAME {
        return Err(fail(format!("schema name is '{}'", doc.schema.name)));
    }
    if doc.schema.version != SCHEMA_VERSION {
        return Err(fail(format!(
            "unsupported schema version {} (expected {SCHEMA_VERSION})",
            doc.schema.version
        )));
    }
    chrono::DateTime::parse_from_rfc3339(&doc.sbom.created)
        .map_err(|e| fail(format!("invalid created timestamp: {e}")))?;
    let mut sbom = doc.sbom;
    sbom.normalize();
    Ok(sbom)
}
