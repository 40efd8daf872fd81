use super::{describe, EXIT_SUCCESS};
use layerscope_core::{Engine, FileResolver, Scope};
use layerscope_schema::LayerId;
use layerscope_store::LayerStore;
use std::io::Write;

/// Resolve `wanted` to a layer of `store` by full id, short id, or unique prefix.
fn find_layer(store: &LayerStore, wanted: &str) -> Result<LayerId, String> {
    let matches: Vec<&LayerId> = store
        .layers()
        .iter()
        .map(|l| l.id())
        .filter(|id| {
            let full = id.as_str();
            let bare = full.split_once(':').map_or(full, |(_, rest)| rest);
            full.starts_with(wanted) || bare.starts_with(wanted)
        })
        .collect();
    match matches.as_slice() {
        [] => Err(format!("no layer matching '{wanted}' in {}", store.image())),
        [one] => Ok((*one).clone()),
        [first, rest @ ..] if rest.iter().all(|id| id == first) => Ok((*first).clone()),
        _ => Err(format!(
            "ambiguous layer '{wanted}': {} layers match",
            matches.len()
        )),
    }
}

pub fn run(engine: &Engine, source: &str, path: &str, layer: Option<&str>) -> Result<u8, String> {
    let store = engine.open_ref(source).map_err(|e| describe(&e))?;
    let wanted = layer.map(|w| find_layer(&store, w)).transpose()?;
    let scope = if wanted.is_some() {
        Scope::AllLayers
    } else {
        Scope::Squashed
    };
    let resolver = engine.resolver(store, scope);

    let candidates = resolver.files_by_path(path).map_err(|e| e.to_string())?;
    let location = match &wanted {
        None => candidates.into_iter().next(),
        Some(id) => candidates.into_iter().find(|loc| &loc.layer_id == id),
    };
    let location = location.ok_or_else(|| match &wanted {
        None => format!("not found: {path}"),
        Some(id) => format!("not found: {path} in layer {}", id.short()),
    })?;

    let mut reader = resolver
        .file_contents(&location)
        .map_err(|e| e.to_string())?;
    let mut out = std::io::stdout().lock();
    std::io::copy(&mut reader, &mut out)
        .and_then(|_| out.flush())
        .map_err(|e| format!("failed to write output: {e}"))?;
    Ok(EXIT_SUCCESS)
}
