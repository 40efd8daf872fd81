//! CLI subprocess integration tests.
//!
//! These tests invoke the `layerscope` binary as a subprocess and verify
//! exit codes, stdout content, and JSON output stability.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

struct Sandbox {
    dir: tempfile::TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    /// The binary with an isolated HOME and cache, so no user config leaks in.
    fn cmd(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_layerscope"));
        cmd.env("HOME", self.path())
            .env_remove("XDG_CACHE_HOME")
            .env_remove("LAYERSCOPE_LOG")
            .arg("--cache")
            .arg(self.path().join("cache"));
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.cmd().args(args).output().unwrap()
    }
}

fn append_file(ar: &mut tar::Builder<Vec<u8>>, path: &str, mode: u32, data: &[u8]) {
    let mut h = tar::Header::new_gnu();
    h.set_entry_type(tar::EntryType::Regular);
    h.set_mode(mode);
    h.set_uid(0);
    h.set_gid(0);
    h.set_mtime(0);
    h.set_size(data.len() as u64);
    h.set_cksum();
    ar.append_data(&mut h, path, data).unwrap();
}

fn append_dir(ar: &mut tar::Builder<Vec<u8>>, path: &str) {
    let mut h = tar::Header::new_gnu();
    h.set_entry_type(tar::EntryType::Directory);
    h.set_mode(0o755);
    h.set_mtime(0);
    h.set_size(0);
    h.set_cksum();
    ar.append_data(&mut h, path, &[] as &[u8]).unwrap();
}

fn write_tar(dir: &Path, name: &str, build: impl FnOnce(&mut tar::Builder<Vec<u8>>)) -> PathBuf {
    let mut ar = tar::Builder::new(Vec::new());
    build(&mut ar);
    let path = dir.join(name);
    fs::write(&path, ar.into_inner().unwrap()).unwrap();
    path
}

/// Two layers: the upper one rewrites `/etc/motd` and whiteouts `/tmp/scratch`.
fn image(sb: &Sandbox) -> String {
    let base = write_tar(sb.path(), "base.tar", |ar| {
        append_dir(ar, "etc/");
        append_file(ar, "etc/motd", 0o644, b"hello from base\n");
        append_dir(ar, "tmp/");
        append_file(ar, "tmp/scratch", 0o600, b"scratch");
    });
    let upper = write_tar(sb.path(), "upper.tar", |ar| {
        append_file(ar, "etc/motd", 0o644, b"hello from upper\n");
        append_file(ar, "tmp/.wh.scratch", 0o644, b"");
        append_file(ar, "usr/bin/tool", 0o755, b"#!/bin/sh\n");
    });
    format!("tar:{},{}", base.display(), upper.display())
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn cli_version_exits_zero() {
    let sb = Sandbox::new();
    let output = sb.run(&["--version"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("layerscope"));
}

#[test]
fn cli_help_lists_commands() {
    let sb = Sandbox::new();
    let output = sb.run(&["--help"]);
    assert!(output.status.success());
    let text = stdout(&output);
    for command in ["catalog", "files", "layers", "cat", "convert", "verify-cache"] {
        assert!(text.contains(command), "help must list '{command}': {text}");
    }
}

#[test]
fn catalog_writes_every_format() {
    let sb = Sandbox::new();
    let source = image(&sb);
    for format in ["layerscope-json", "spdx-tag-value", "spdx-json", "cyclonedx-json"] {
        let out = sb.path().join("out").join(format!("sbom.{format}"));
        let output = sb.run(&[
            "catalog",
            &source,
            "-o",
            format,
            "--file",
            out.to_str().unwrap(),
        ]);
        assert_eq!(output.status.code(), Some(0), "{format}: {}", stderr(&output));
        let doc = fs::read_to_string(&out).unwrap();
        assert!(doc.contains("/etc/motd"), "{format} must mention /etc/motd");
        assert!(!doc.contains("/tmp/scratch"), "{format} must drop whiteouts");
        assert!(stdout(&output).contains("wrote"));
    }
}

#[test]
fn catalog_to_stdout_is_native_json() {
    let sb = Sandbox::new();
    let output = sb.run(&["catalog", &image(&sb), "--scope", "all-layers"]);
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    let doc: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(doc["source"]["scope"], "all-layers");
    let motd = doc["files"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|f| f["location"]["path"] == "/etc/motd")
        .count();
    assert_eq!(motd, 2, "both versions of /etc/motd are visible in all-layers");
}

#[test]
fn catalog_json_summary_when_writing_file() {
    let sb = Sandbox::new();
    let out = sb.path().join("sbom.json");
    let output = sb.run(&[
        "--json",
        "catalog",
        &image(&sb),
        "--file",
        out.to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["scope"], "squashed");
    assert_eq!(summary["format"], "layerscope-json");
    assert_eq!(summary["cancelled"], false);
    assert!(summary["skipped"].as_array().unwrap().is_empty());
}

#[test]
fn files_json_lists_squashed_view() {
    let sb = Sandbox::new();
    let output = sb.run(&["--json", "files", &image(&sb)]);
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let paths: Vec<&str> = rows
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["location"]["path"].as_str().unwrap())
        .collect();
    assert!(paths.contains(&"/etc/motd"));
    assert!(paths.contains(&"/usr/bin/tool"));
    assert!(!paths.contains(&"/tmp/scratch"));
    let mut sorted = paths.clone();
    sorted.sort_unstable();
    assert_eq!(paths, sorted);
}

#[test]
fn files_table_shows_ls_style_modes() {
    let sb = Sandbox::new();
    let output = sb.run(&["files", &image(&sb)]);
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    let text = stdout(&output);
    let tool = text
        .lines()
        .find(|l| l.ends_with("/usr/bin/tool"))
        .unwrap_or_else(|| panic!("no row for /usr/bin/tool: {text}"));
    assert!(tool.contains("-rwxr-xr-x"), "{tool}");
}

#[test]
fn files_glob_filters_rows() {
    let sb = Sandbox::new();
    let output = sb.run(&["--json", "files", &image(&sb), "--glob", "/etc/*"]);
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["location"]["path"], "/etc/motd");
    assert_eq!(rows[0]["metadata"]["type"], "regularFile");
}

#[test]
fn layers_reports_whiteouts() {
    let sb = Sandbox::new();
    let output = sb.run(&["--json", "layers", &image(&sb)]);
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    let doc: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let layers = doc["layers"].as_array().unwrap();
    assert_eq!(layers.len(), 2);
    assert!(layers[0]["whiteouts"].as_array().unwrap().is_empty());
    assert_eq!(layers[1]["whiteouts"][0], "/tmp/scratch");
}

#[test]
fn cat_prints_squashed_and_layer_versions() {
    let sb = Sandbox::new();
    let source = image(&sb);
    let output = sb.run(&["cat", &source, "/etc/motd"]);
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    assert_eq!(stdout(&output), "hello from upper\n");

    let layers = sb.run(&["--json", "layers", &source]);
    let doc: serde_json::Value = serde_json::from_slice(&layers.stdout).unwrap();
    let base_id = doc["layers"][0]["id"].as_str().unwrap().to_owned();

    let output = sb.run(&["cat", &source, "/etc/motd", "--layer", &base_id]);
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    assert_eq!(stdout(&output), "hello from base\n");
}

#[test]
fn cat_missing_path_fails() {
    let sb = Sandbox::new();
    let output = sb.run(&["cat", &image(&sb), "/tmp/scratch"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("not found"));
}

#[test]
fn convert_round_trips_between_formats() {
    let sb = Sandbox::new();
    let native = sb.path().join("sbom.json");
    let output = sb.run(&["catalog", &image(&sb), "--file", native.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));

    let spdx = sb.path().join("sbom.spdx");
    let output = sb.run(&[
        "convert",
        native.to_str().unwrap(),
        "-o",
        "spdx-tag-value",
        "--file",
        spdx.to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    assert!(fs::read_to_string(&spdx).unwrap().contains("SPDXVersion:"));

    let output = sb.run(&["--json", "convert", spdx.to_str().unwrap(), "-o", "layerscope-json"]);
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    let doc: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(doc["files"]
        .as_array()
        .unwrap()
        .iter()
        .any(|f| f["location"]["path"] == "/usr/bin/tool"));
}

#[test]
fn missing_source_exits_with_source_error() {
    let sb = Sandbox::new();
    let missing = sb.path().join("nope.tar");
    let output = sb.run(&["catalog", &format!("tar:{}", missing.display())]);
    assert_eq!(output.status.code(), Some(2), "{}", stderr(&output));
    assert!(stderr(&output).contains("error:"));
}

#[test]
fn unrecognized_document_exits_with_decode_error() {
    let sb = Sandbox::new();
    let junk = sb.path().join("junk.txt");
    fs::write(&junk, "just some text\n").unwrap();
    let output = sb.run(&["convert", junk.to_str().unwrap(), "-o", "spdx-json"]);
    assert_eq!(output.status.code(), Some(4));
    assert!(stderr(&output).contains("document error:"));
}

#[test]
fn unencodable_document_exits_with_document_error() {
    let sb = Sandbox::new();
    let tar = write_tar(sb.path(), "odd\rname.tar", |ar| {
        append_file(ar, "etc/motd", 0o644, b"hi\n");
    });
    let output = sb.run(&[
        "catalog",
        &format!("tar:{}", tar.display()),
        "-o",
        "spdx-tag-value",
    ]);
    assert_eq!(output.status.code(), Some(4), "{}", stderr(&output));
    assert!(stderr(&output).contains("document error:"));
}

#[test]
fn verify_cache_after_catalog_is_clean() {
    let sb = Sandbox::new();
    let output = sb.run(&["catalog", &image(&sb), "--file", "/dev/null"]);
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));

    let output = sb.run(&["--json", "verify-cache"]);
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(report["checked"].as_u64().unwrap() > 0);
    assert_eq!(report["checked"], report["passed"]);
    assert!(report["failed"].as_array().unwrap().is_empty());
}

#[test]
fn verify_cache_reports_corrupt_object_path() {
    let sb = Sandbox::new();
    let output = sb.run(&["catalog", &image(&sb), "--file", "/dev/null"]);
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));

    let objects = sb.path().join("cache").join("store").join("objects");
    let victim = fs::read_dir(&objects)
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| !p.file_name().unwrap().to_string_lossy().starts_with('.'))
        .unwrap();
    fs::write(&victim, b"tampered").unwrap();

    let output = sb.run(&["--json", "verify-cache"]);
    assert_eq!(output.status.code(), Some(3), "{}", stderr(&output));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let failed = report["failed"].as_array().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["path"], victim.to_str().unwrap());
    assert_eq!(failed[0]["problem"]["kind"], "mismatch");
}

#[test]
fn completions_and_man_pages_generate() {
    let sb = Sandbox::new();
    let output = sb.run(&["completions", "bash"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("layerscope"));

    let man = sb.path().join("man");
    let output = sb.run(&["man-pages", man.to_str().unwrap()]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(man.join("layerscope.1").is_file());
    assert!(man.join("layerscope-catalog.1").is_file());
}
