use super::{json_pretty, EXIT_CACHE_ERROR, EXIT_SUCCESS};
use layerscope_core::Engine;

pub fn run(engine: &Engine, json: bool) -> Result<u8, String> {
    let report = engine
        .verify_cache()
        .map_err(|e| format!("cache error: {e}"))?;

    if json {
        let payload = serde_json::json!({
            "cache": engine.layout().root(),
            "checked": report.checked,
            "passed": report.passed,
            "failed": &report.failed,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "cache integrity: {}/{} objects passed ({})",
            report.passed,
            report.checked,
            engine.layout().root().display()
        );
        for f in &report.failed {
            println!("  FAIL {}: {}", f.path.display(), f.problem);
        }
    }

    if report.failed.is_empty() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_CACHE_ERROR)
    }
}
