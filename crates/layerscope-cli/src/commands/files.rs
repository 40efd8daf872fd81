use super::{
    colorize_type, describe, json_pretty, maybe_spinner, spin_fail, spin_ok, warn_skipped,
    EXIT_CANCELLED, EXIT_PARTIAL, EXIT_SUCCESS,
};
use layerscope_core::{CancelToken, Engine, FileResolver, Scope};
use layerscope_schema::mode;
use std::collections::HashSet;

pub fn run(
    engine: &Engine,
    source: &str,
    scope: Scope,
    glob: Option<&str>,
    cancel: &CancelToken,
    json: bool,
) -> Result<u8, String> {
    let pb = maybe_spinner(json, &format!("reading {source}..."));
    let resolver = match engine.open_ref(source) {
        Ok(store) => engine.resolver(store, scope),
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "cannot open source");
            }
            return Err(describe(&e));
        }
    };
    let wanted = match glob {
        Some(pattern) => Some(
            resolver
                .files_by_glob(pattern)
                .map_err(|e| e.to_string())?
                .into_iter()
                .collect::<HashSet<_>>(),
        ),
        None => None,
    };
    let report = engine.catalog(&resolver, cancel).map_err(|e| describe(&e))?;
    if let Some(ref pb) = pb {
        spin_ok(pb, &format!("{} locations ({scope})", report.metadata.len()));
    }
    for skipped in &report.skipped {
        warn_skipped(&skipped.location, &skipped.reason);
    }

    let rows: Vec<_> = report
        .sorted()
        .into_iter()
        .filter(|(location, _)| wanted.as_ref().map_or(true, |w| w.contains(*location)))
        .collect();

    if json {
        let payload: Vec<_> = rows
            .iter()
            .map(|(location, metadata)| {
                serde_json::json!({ "location": location, "metadata": metadata })
            })
            .collect();
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "{:<16} {:<10} {:<11} {:<13} PATH",
            "TYPE", "MODE", "OWNER", "LAYER"
        );
        for (location, m) in &rows {
            let owner = format!("{}:{}", m.user_id, m.group_id);
            let link = m
                .link_destination
                .as_deref()
                .map(|d| format!(" -> {d}"))
                .unwrap_or_default();
            // pad the plain name, then colorize
            let kind = format!("{:<16}", m.file_type.as_str());
            println!(
                "{} {} {:<11} {:<13} {}{link}",
                kind.replace(m.file_type.as_str(), &colorize_type(m.file_type)),
                mode::render(m.mode),
                owner,
                location.layer_id.short(),
                location.path,
            );
        }
    }

    if report.cancelled {
        Ok(EXIT_CANCELLED)
    } else if !report.skipped.is_empty() {
        Ok(EXIT_PARTIAL)
    } else {
        Ok(EXIT_SUCCESS)
    }
}
