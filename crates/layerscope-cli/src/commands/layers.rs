use super::{describe, json_pretty, EXIT_SUCCESS};
use layerscope_core::Engine;

pub fn run(engine: &Engine, source: &str, json: bool) -> Result<u8, String> {
    let store = engine.open_ref(source).map_err(|e| describe(&e))?;

    if json {
        let layers: Vec<_> = store
            .layers()
            .iter()
            .enumerate()
            .map(|(index, layer)| {
                serde_json::json!({
                    "index": index,
                    "id": layer.id(),
                    "entries": layer.len(),
                    "whiteouts": layer.whiteouts(),
                    "opaque_dirs": layer.opaque_dirs(),
                })
            })
            .collect();
        let payload = serde_json::json!({
            "image": store.image(),
            "layers": layers,
        });
        println!("{}", json_pretty(&payload)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("{}", store.image());
    if store.is_empty() {
        println!("  (no layers)");
        return Ok(EXIT_SUCCESS);
    }
    println!(
        "  {:<5} {:<13} {:>8} {:>10} {:>7}",
        "INDEX", "LAYER", "ENTRIES", "WHITEOUTS", "OPAQUE"
    );
    for (index, layer) in store.layers().iter().enumerate() {
        println!(
            "  {:<5} {:<13} {:>8} {:>10} {:>7}",
            index,
            layer.id().short(),
            layer.len(),
            layer.whiteouts().len(),
            layer.opaque_dirs().len()
        );
    }
    Ok(EXIT_SUCCESS)
}
