use crate::types::{ImageRef, LayerId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one file occurrence: a path as seen in one layer of one image.
///
/// Equality and hashing cover all three fields, so the same path in two layers
/// yields two distinct locations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub path: String,
    #[serde(rename = "layerID")]
    pub layer_id: LayerId,
    pub image_ref: ImageRef,
}

impl Location {
    pub fn new(path: impl Into<String>, layer_id: LayerId, image_ref: ImageRef) -> Self {
        Self {
            path: path.into(),
            layer_id,
            image_ref,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.path, self.layer_id.short())
    }
}
