//! The resolved external-dependency manifest.
//!
//! The dependency downloader collaborator resolves a `{name: version}`
//! request into a manifest: the flattened file contents of every external
//! package, keyed by absolute `/node_modules/...` path. Manifest files carry
//! precomputed `requires` lists so they skip the transformer pipeline.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::module::Module;

/// One file inside a resolved external package.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ManifestModule {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<Vec<String>>,
}

impl ManifestModule {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            requires: None,
        }
    }

    pub fn with_requires(code: impl Into<String>, requires: Vec<String>) -> Self {
        Self {
            code: code.into(),
            requires: Some(requires),
        }
    }

    pub fn to_module(&self, path: &str) -> Module {
        Module {
            path: path.to_string(),
            code: self.code.clone(),
            requires: self.requires.clone(),
        }
    }
}

/// The full resolved mapping from external package specifiers to module
/// records, as produced by the dependency downloader.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// Flattened package contents, keyed by absolute path
    /// (`/node_modules/<pkg>/...`).
    #[serde(default)]
    pub contents: FxHashMap<String, ManifestModule>,
    /// Direct dependencies: name to resolved version.
    #[serde(default)]
    pub dependencies: FxHashMap<String, String>,
    /// Transitive dependency pins.
    #[serde(default)]
    pub dependency_dependencies: FxHashMap<String, String>,
}

impl Manifest {
    pub fn is_empty(&self) -> bool {
        self.contents.is_empty() && self.dependencies.is_empty()
    }

    /// Merge a partial manifest (e.g. a lazily downloaded package) into this
    /// one. Existing entries are overwritten by the incoming ones.
    pub fn merge(&mut self, other: Manifest) {
        self.contents.extend(other.contents);
        self.dependencies.extend(other.dependencies);
        self.dependency_dependencies
            .extend(other.dependency_dependencies);
    }

    /// Whether the manifest pins a DOM reconciliation library. Used to decide
    /// if root containers need an unmount pass before the document resets.
    pub fn has_dom_reconciler(&self) -> bool {
        const RECONCILERS: &[&str] = &["react-dom", "preact", "vue"];
        RECONCILERS
            .iter()
            .any(|name| self.dependencies.contains_key(*name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overwrites_and_extends() {
        let mut base = Manifest::default();
        base.contents.insert(
            "/node_modules/left-pad/index.js".into(),
            ManifestModule::new("module.exports = 1"),
        );

        let mut incoming = Manifest::default();
        incoming.contents.insert(
            "/node_modules/left-pad/index.js".into(),
            ManifestModule::new("module.exports = 2"),
        );
        incoming
            .dependencies
            .insert("left-pad".into(), "1.3.0".into());

        base.merge(incoming);
        assert_eq!(
            base.contents["/node_modules/left-pad/index.js"].code,
            "module.exports = 2"
        );
        assert_eq!(base.dependencies["left-pad"], "1.3.0");
    }

    #[test]
    fn reconciler_detection() {
        let mut manifest = Manifest::default();
        assert!(!manifest.has_dom_reconciler());
        manifest
            .dependencies
            .insert("react-dom".into(), "18.2.0".into());
        assert!(manifest.has_dom_reconciler());
    }
}
