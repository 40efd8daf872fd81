//! Normalization and traversal helpers for absolute, `/`-separated image paths.

use crate::PathError;

/// Normalize a raw path from an archive or a caller into the canonical form
/// used as a tree key: absolute, no empty or `.` components, no trailing slash.
///
/// `..` components are rejected rather than resolved, so an archive entry can
/// never address a path outside its own tree.
pub fn normalize_path(raw: &str) -> Result<String, PathError> {
    if raw.contains('\0') {
        return Err(PathError::Nul(raw.to_owned()));
    }
    let mut out = String::with_capacity(raw.len() + 1);
    for component in raw.split('/') {
        match component {
            "" | "." => {}
            ".." => return Err(PathError::Traversal(raw.to_owned())),
            name => {
                out.push('/');
                out.push_str(name);
            }
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

/// Parent directory of a normalized path. The root has no parent.
pub fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Final component of a normalized path (`""` for the root).
pub fn file_name(path: &str) -> &str {
    path.rfind('/').map_or(path, |idx| &path[idx + 1..])
}

/// Join a normalized directory and a single component.
pub fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Strict ancestors of a normalized path, nearest first, ending at `/`.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    let mut current = parent(path);
    std::iter::from_fn(move || {
        let next = current?;
        current = parent(next);
        Some(next)
    })
}
