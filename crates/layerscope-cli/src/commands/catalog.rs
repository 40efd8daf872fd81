use super::{
    describe, json_pretty, maybe_spinner, spin_fail, spin_ok, warn_skipped, write_output,
    EXIT_CANCELLED, EXIT_PARTIAL, EXIT_SUCCESS,
};
use layerscope_core::{CancelToken, CoreError, Engine};
use std::path::Path;

pub fn run(
    engine: &Engine,
    source: &str,
    file: Option<&Path>,
    cancel: &CancelToken,
    json: bool,
) -> Result<u8, String> {
    let config = engine.config();
    let pb = maybe_spinner(json, &format!("cataloging {source} ({})...", config.scope));

    let result = engine
        .open_ref(source)
        .and_then(|store| engine.scan(&store, config.scope, cancel));
    let result = match result {
        Ok(r) => r,
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "catalog failed");
            }
            return Err(describe(&e));
        }
    };
    if let Some(ref pb) = pb {
        spin_ok(
            pb,
            &format!("cataloged {} files", result.sbom.files.len()),
        );
    }
    for skipped in &result.skipped {
        warn_skipped(&skipped.location, &skipped.reason);
    }

    let bytes = config
        .format
        .encode(&result.sbom)
        .map_err(|e| describe(&CoreError::from(e)))?;
    write_output(file, &bytes)?;

    if let Some(path) = file {
        if json {
            let payload = serde_json::json!({
                "source": source,
                "scope": config.scope,
                "format": config.format,
                "files": result.sbom.files.len(),
                "skipped": result.skipped,
                "cancelled": result.cancelled,
                "output": path,
            });
            println!("{}", json_pretty(&payload)?);
        } else {
            println!("wrote {} to {}", config.format, path.display());
        }
    }

    if result.cancelled {
        Ok(EXIT_CANCELLED)
    } else if !result.skipped.is_empty() {
        Ok(EXIT_PARTIAL)
    } else {
        Ok(EXIT_SUCCESS)
    }
}
