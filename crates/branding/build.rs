//! Reads `[workspace.metadata.ftpfs]` from the workspace root manifest,
//! validates it, and renders `OUT_DIR/workspace_generated.rs` as a flat set
//! of `pub const` declarations that `src/generated.rs` includes.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, serde::Deserialize)]
struct WorkspaceMetadata {
    brand: String,
    client_bin: String,
    client_version: String,
    source: String,
}

#[derive(Debug, serde::Deserialize)]
struct Metadata {
    ftpfs: WorkspaceMetadata,
}

#[derive(Debug, serde::Deserialize)]
struct WorkspaceTable {
    metadata: Metadata,
}

#[derive(Debug, serde::Deserialize)]
struct RootManifest {
    workspace: WorkspaceTable,
}

fn expect_non_empty(field: &str, value: &str) {
    if value.trim().is_empty() {
        panic!("workspace.metadata.ftpfs.{field} must not be empty");
    }
}

fn validate(metadata: &WorkspaceMetadata) {
    expect_non_empty("brand", &metadata.brand);
    expect_non_empty("client_bin", &metadata.client_bin);
    expect_non_empty("client_version", &metadata.client_version);
    expect_non_empty("source", &metadata.source);

    if metadata.client_bin.contains('/') || metadata.client_bin.contains('\\') {
        panic!("workspace.metadata.ftpfs.client_bin must be a bare binary name, not a path");
    }
    if !metadata.source.starts_with("https://") && !metadata.source.starts_with("http://") {
        panic!("workspace.metadata.ftpfs.source must be an http(s) URL");
    }
}

fn sanitize_revision(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return "unknown".to_string();
    }
    trimmed.to_string()
}

fn build_revision(workspace_root: &Path) -> String {
    if let Ok(overridden) = env::var("FTPFS_BUILD_OVERRIDE") {
        return sanitize_revision(&overridden);
    }

    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .current_dir(workspace_root)
        .output();

    match output {
        Ok(output) if output.status.success() => {
            sanitize_revision(&String::from_utf8_lossy(&output.stdout))
        }
        _ => "unknown".to_string(),
    }
}

fn render(metadata: &WorkspaceMetadata, revision: &str) -> String {
    let mut out = String::new();
    out.push_str("// Generated by crates/branding/build.rs. Do not edit.\n\n");
    out.push_str(&format!("pub const BRAND: &str = {:?};\n", metadata.brand));
    out.push_str(&format!(
        "pub const CLIENT_BIN: &str = {:?};\n",
        metadata.client_bin
    ));
    out.push_str(&format!(
        "pub const CLIENT_VERSION: &str = {:?};\n",
        metadata.client_version
    ));
    out.push_str(&format!("pub const SOURCE: &str = {:?};\n", metadata.source));
    out.push_str(&format!("pub const BUILD_REVISION: &str = {revision:?};\n"));
    out.push_str("pub const BUILD_TOOLCHAIN: &str = \"Built in Rust 2021\";\n");
    out
}

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR"));
    let workspace_root = manifest_dir
        .parent()
        .and_then(Path::parent)
        .expect("crates/branding is two levels below the workspace root")
        .to_path_buf();

    let manifest_path = workspace_root.join("Cargo.toml");
    println!("cargo:rerun-if-changed={}", manifest_path.display());

    let raw = fs::read_to_string(&manifest_path)
        .unwrap_or_else(|err| panic!("reading {}: {err}", manifest_path.display()));
    let parsed: RootManifest =
        toml::from_str(&raw).unwrap_or_else(|err| panic!("parsing {}: {err}", manifest_path.display()));
    validate(&parsed.workspace.metadata.ftpfs);

    let revision = build_revision(&workspace_root);
    let rendered = render(&parsed.workspace.metadata.ftpfs, &revision);

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));
    fs::write(out_dir.join("workspace_generated.rs"), rendered).expect("writing generated constants");
}
