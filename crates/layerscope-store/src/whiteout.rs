//! Overlay whiteout naming.
//!
//! A file named `.wh.<name>` deletes the sibling `<name>` (and everything
//! beneath it) from lower layers. A file named `.wh..wh..opq` inside a
//! directory hides every lower-layer entry of that directory; entries the
//! same layer adds to it stay visible.

use layerscope_schema::path;

pub const WHITEOUT_PREFIX: &str = ".wh.";
pub const OPAQUE_MARKER: &str = ".wh..wh..opq";

/// What a normalized archive path means to the layer that carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    /// An ordinary entry at this path.
    Entry,
    /// Deletes the given path from lower layers.
    Whiteout(String),
    /// Hides all lower-layer contents of the given directory.
    Opaque(String),
}

/// Interpret a normalized path as an entry or a whiteout marker.
pub fn classify(normalized: &str) -> Marker {
    let name = path::file_name(normalized);
    let parent = path::parent(normalized).unwrap_or("/");
    if name == OPAQUE_MARKER {
        return Marker::Opaque(parent.to_owned());
    }
    match name.strip_prefix(WHITEOUT_PREFIX) {
        Some(target) if !target.is_empty() => Marker::Whiteout(path::join(parent, target)),
        _ => Marker::Entry,
    }
}
