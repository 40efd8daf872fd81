use super::{json_pretty, write_output, EXIT_SUCCESS};
use layerscope_format::{decode_any, Format};
use std::io::Read;
use std::path::Path;

fn read_input(input: &Path) -> Result<Vec<u8>, String> {
    if input.as_os_str() == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .lock()
            .read_to_end(&mut buf)
            .map_err(|e| format!("failed to read stdin: {e}"))?;
        Ok(buf)
    } else {
        std::fs::read(input).map_err(|e| format!("failed to read {}: {e}", input.display()))
    }
}

pub fn run(input: &Path, output: Format, file: Option<&Path>, json: bool) -> Result<u8, String> {
    let bytes = read_input(input)?;
    let (detected, sbom) = decode_any(&bytes).map_err(|e| format!("document error: {e}"))?;
    let encoded = output
        .encode(&sbom)
        .map_err(|e| format!("document error: {e}"))?;
    write_output(file, &encoded)?;

    if let Some(path) = file {
        if json {
            let payload = serde_json::json!({
                "input": input,
                "from": detected,
                "to": output,
                "files": sbom.files.len(),
                "packages": sbom.packages.len(),
                "output": path,
            });
            println!("{}", json_pretty(&payload)?);
        } else {
            println!(
                "converted {detected} to {output}: {} files, {} packages -> {}",
                sbom.files.len(),
                sbom.packages.len(),
                path.display()
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
