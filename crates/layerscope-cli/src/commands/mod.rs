pub mod cat;
pub mod catalog;
pub mod completions;
pub mod convert;
pub mod files;
pub mod layers;
pub mod man_pages;
pub mod verify_cache;

use indicatif::{ProgressBar, ProgressStyle};
use layerscope_core::CoreError;
use layerscope_schema::FileType;
use layerscope_store::StoreError;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_SOURCE_ERROR: u8 = 2;
pub const EXIT_CACHE_ERROR: u8 = 3;
pub const EXIT_DECODE_ERROR: u8 = 4;
pub const EXIT_PARTIAL: u8 = 5;
pub const EXIT_CANCELLED: u8 = 130;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

/// Error text for `e`, prefixed so `main` can pick the exit code.
pub fn describe(e: &CoreError) -> String {
    match e {
        CoreError::Construction(StoreError::VersionMismatch { .. }) => format!("cache error: {e}"),
        CoreError::Format(f) => format!("document error: {f}"),
        other => other.to_string(),
    }
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Spinner unless output is machine-readable.
pub fn maybe_spinner(json: bool, msg: &str) -> Option<ProgressBar> {
    if json {
        None
    } else {
        Some(spinner(msg))
    }
}

pub fn colorize_type(file_type: FileType) -> String {
    use console::Style;
    let name = file_type.as_str();
    match file_type {
        FileType::Directory => Style::new().blue().bold().apply_to(name).to_string(),
        FileType::SymbolicLink => Style::new().cyan().apply_to(name).to_string(),
        FileType::HardLink => Style::new().magenta().apply_to(name).to_string(),
        FileType::CharacterDevice | FileType::BlockDevice => {
            Style::new().yellow().apply_to(name).to_string()
        }
        FileType::FifoNode | FileType::Socket => Style::new().green().apply_to(name).to_string(),
        FileType::Irregular => Style::new().red().apply_to(name).to_string(),
        FileType::RegularFile => name.to_owned(),
    }
}

pub fn warn_skipped(location: &impl std::fmt::Display, reason: &str) {
    let label = console::Style::new().yellow().apply_to("warning:");
    eprintln!("{label} skipped {location}: {reason}");
}

/// Write `bytes` to `file`, or to stdout when none is given.
pub fn write_output(file: Option<&Path>, bytes: &[u8]) -> Result<(), String> {
    match file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
            }
            std::fs::write(path, bytes)
                .map_err(|e| format!("failed to write {}: {e}", path.display()))
        }
        None => {
            let mut out = std::io::stdout().lock();
            out.write_all(bytes)
                .and_then(|()| out.flush())
                .map_err(|e| format!("failed to write output: {e}"))
        }
    }
}
