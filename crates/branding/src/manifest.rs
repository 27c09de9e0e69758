//! Machine-readable form of the branding constants, for `--version --json`
//! style output.

use serde::Serialize;

/// A serializable snapshot of the constants in this crate.
#[derive(Debug, Clone, Serialize)]
pub struct BrandManifest {
    /// See [`crate::brand`].
    pub brand: &'static str,
    /// See [`crate::client_bin`].
    pub client_bin: &'static str,
    /// See [`crate::client_version`].
    pub client_version: &'static str,
    /// See [`crate::source`].
    pub source: &'static str,
    /// See [`crate::build_revision`].
    pub build_revision: &'static str,
    /// See [`crate::build_toolchain`].
    pub build_toolchain: &'static str,
}

impl BrandManifest {
    /// Snapshots the current build's constants.
    #[must_use]
    pub fn current() -> Self {
        Self {
            brand: crate::brand(),
            client_bin: crate::client_bin(),
            client_version: crate::client_version(),
            source: crate::source(),
            build_revision: crate::build_revision(),
            build_toolchain: crate::build_toolchain(),
        }
    }

    /// Serializes this manifest as compact JSON.
    ///
    /// # Panics
    ///
    /// Panics if serialization fails, which cannot happen for this type:
    /// every field is a plain string.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("BrandManifest fields are all plain strings")
    }

    /// Serializes this manifest as pretty-printed JSON.
    ///
    /// # Panics
    ///
    /// See [`BrandManifest::to_json`].
    #[must_use]
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).expect("BrandManifest fields are all plain strings")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_round_trips_through_json() {
        let manifest = BrandManifest::current();
        let json = manifest.to_json();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["brand"], manifest.brand);
        assert_eq!(parsed["client_version"], manifest.client_version);
    }
}
