//! Compile-time branding constants for the mount binary: the name and
//! version reported in `--version` output, the mount banner, and the FTP
//! `CLNT` command sent to the server at login.
//!
//! Every constant here is generated by `build.rs` from
//! `[workspace.metadata.ftpfs]` in the workspace root manifest, so the
//! binary name and version live in exactly one place.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod generated;
mod manifest;

pub use generated::{BUILD_REVISION, BUILD_TOOLCHAIN};
pub use generated::{BRAND, CLIENT_BIN, CLIENT_VERSION, SOURCE};
pub use manifest::BrandManifest;

/// The configured brand name, e.g. `"ftpfs-mount"`.
#[must_use]
pub const fn brand() -> &'static str {
    BRAND
}

/// The binary name as installed, e.g. `"ftpfs-mount"`.
#[must_use]
pub const fn client_bin() -> &'static str {
    CLIENT_BIN
}

/// The crate version baked in at build time.
#[must_use]
pub const fn client_version() -> &'static str {
    CLIENT_VERSION
}

/// Where this build's source lives, surfaced in `--version` output.
#[must_use]
pub const fn source() -> &'static str {
    SOURCE
}

/// The short git commit this binary was built from, or `"unknown"` outside
/// a git checkout.
#[must_use]
pub const fn build_revision() -> &'static str {
    BUILD_REVISION
}

/// A human-readable toolchain tag, e.g. `"Built in Rust 2021"`.
#[must_use]
pub const fn build_toolchain() -> &'static str {
    BUILD_TOOLCHAIN
}

/// Renders the one-line `--version` string:
/// `ftpfs-mount 0.1.0 (rev a1b2c3d, Built in Rust 2021)`.
#[must_use]
pub fn version_line() -> String {
    format!(
        "{} {} (rev {}, {})",
        client_bin(),
        client_version(),
        build_revision(),
        build_toolchain()
    )
}

/// Renders the `CLNT` command argument sent at login, e.g.
/// `ftpfs-mount/0.1.0`.
#[must_use]
pub fn client_agent() -> String {
    format!("{}/{}", client_bin(), client_version())
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn version_line_includes_bin_and_version() {
        let line = version_line();
        assert!(line.starts_with(client_bin()));
        assert!(line.contains(client_version()));
    }

    #[test]
    fn client_agent_is_bin_slash_version() {
        assert_eq!(client_agent(), format!("{}/{}", client_bin(), client_version()));
    }
}
