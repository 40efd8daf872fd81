//! SBOM model and document codecs.
//!
//! Every format is an `encode`/`decode` pair pinned to one document version.
//! Decoding is all-or-nothing: a document either yields a complete [`Sbom`]
//! or a [`FormatError::Decode`] naming the format and the first problem found.

pub mod cyclonedx;
pub mod model;
pub mod native;
pub mod spdx;

pub use model::{FileRecord, Package, Sbom, SourceDescription, TOOL_NAME, TOOL_VERSION};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unable to decode {format}: {reason}")]
    Decode { format: Format, reason: String },
    #[error("unable to encode {format}: {reason}")]
    Encode { format: Format, reason: String },
    #[error("unrecognized document format")]
    Unrecognized,
    #[error("unknown format '{0}'")]
    UnknownFormat(String),
}

impl FormatError {
    pub(crate) fn decode(format: Format, reason: impl fmt::Display) -> Self {
        Self::Decode {
            format,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn encode(format: Format, reason: impl fmt::Display) -> Self {
        Self::Encode {
            format,
            reason: reason.to_string(),
        }
    }
}

/// Supported document formats, each at a single version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    #[default]
    #[serde(rename = "layerscope-json")]
    LayerscopeJson,
    #[serde(rename = "spdx-tag-value")]
    SpdxTagValue,
    #[serde(rename = "spdx-json")]
    SpdxJson,
    #[serde(rename = "cyclonedx-json")]
    CycloneDxJson,
}

impl Format {
    pub const ALL: [Format; 4] = [
        Format::LayerscopeJson,
        Format::SpdxTagValue,
        Format::SpdxJson,
        Format::CycloneDxJson,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::LayerscopeJson => "layerscope-json",
            Self::SpdxTagValue => "spdx-tag-value",
            Self::SpdxJson => "spdx-json",
            Self::CycloneDxJson => "cyclonedx-json",
        }
    }

    pub fn version(self) -> &'static str {
        match self {
            Self::LayerscopeJson => native::SCHEMA_VERSION,
            Self::SpdxTagValue | Self::SpdxJson => spdx::SPDX_VERSION_NUMBER,
            Self::CycloneDxJson => cyclonedx::SPEC_VERSION,
        }
    }

    /// Conventional file extension for written documents.
    pub fn extension(self) -> &'static str {
        match self {
            Self::SpdxTagValue => "spdx",
            Self::SpdxJson => "spdx.json",
            Self::CycloneDxJson => "cdx.json",
            Self::LayerscopeJson => "json",
        }
    }

    pub fn encode(self, sbom: &Sbom) -> Result<Vec<u8>, FormatError> {
        match self {
            Self::LayerscopeJson => native::encode(sbom),
            Self::SpdxTagValue => spdx::tag_value::encode(sbom),
            Self::SpdxJson => spdx::json::encode(sbom),
            Self::CycloneDxJson => cyclonedx::encode(sbom),
        }
    }

    pub fn decode(self, bytes: &[u8]) -> Result<Sbom, FormatError> {
        match self {
            Self::LayerscopeJson => native::decode(bytes),
            Self::SpdxTagValue => spdx::tag_value::decode(bytes),
            Self::SpdxJson => spdx::json::decode(bytes),
            Self::CycloneDxJson => cyclonedx::decode(bytes),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name(), self.version())
    }
}

impl FromStr for Format {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "layerscope-json" | "layerscope" | "json" => Ok(Self::LayerscopeJson),
            "spdx-tag-value" | "spdx-tv" | "spdx" => Ok(Self::SpdxTagValue),
            "spdx-json" => Ok(Self::SpdxJson),
            "cyclonedx-json" | "cyclonedx" | "cdx" => Ok(Self::CycloneDxJson),
            _ => Err(FormatError::UnknownFormat(s.to_owned())),
        }
    }
}

/// Identify a document's format from its bytes.
pub fn detect(bytes: &[u8]) -> Option<Format> {
    let text = std::str::from_utf8(bytes).ok()?;
    let trimmed = text.trim_start();
    if trimmed.starts_with('{') {
        let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
        if native::matches(&value) {
            return Some(Format::LayerscopeJson);
        }
        if cyclonedx::matches(&value) {
            return Some(Format::CycloneDxJson);
        }
        if spdx::json::matches(&value) {
            return Some(Format::SpdxJson);
        }
        return None;
    }
    if spdx::tag_value::matches(text) {
        return Some(Format::SpdxTagValue);
    }
    None
}

/// Detect the format and decode in one step.
pub fn decode_any(bytes: &[u8]) -> Result<(Format, Sbom), FormatError> {
    let format = detect(bytes).ok_or(FormatError::Unrecognized)?;
    debug!("detected {format} document ({} bytes)", bytes.len());
    Ok((format, format.decode(bytes)?))
}
