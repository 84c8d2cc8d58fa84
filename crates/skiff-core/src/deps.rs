//! The dependency downloader collaborator.
//!
//! Resolves a `{name: version}` dependency request into a [`Manifest`] up
//! front, and serves per-package downloads for dependencies discovered only
//! during transpilation (an import of a package the manifest doesn't cover).

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::manifest::Manifest;
use crate::{Error, Result};

/// Result of resolving the full dependency request.
#[derive(Debug, Clone)]
pub struct LoadedDependencies {
    pub manifest: Manifest,
    /// True when this name/version combination differs from the previous
    /// request; a new combination invalidates the whole manager.
    pub is_new_combination: bool,
}

#[async_trait(?Send)]
pub trait DependencyDownloader {
    /// Resolve the dependency map of a compile request into a manifest.
    async fn load_dependencies(
        &self,
        dependencies: &FxHashMap<String, String>,
    ) -> Result<LoadedDependencies>;

    /// Fetch a single package discovered during transpilation. Returns a
    /// partial manifest to merge into the current one.
    async fn download(&self, specifier: &str, from_path: &str) -> Result<Manifest>;
}

/// A downloader backed by pre-fetched package contents.
///
/// `load_dependencies` always serves the base manifest; `download` serves
/// whole packages out of the registry. Combination tracking compares the
/// sorted `name@version` signature against the previous request.
#[derive(Default)]
pub struct ManifestDownloader {
    base: Manifest,
    registry: FxHashMap<String, Manifest>,
    last_combination: Mutex<Option<String>>,
}

impl ManifestDownloader {
    pub fn new(base: Manifest) -> Self {
        Self {
            base,
            registry: FxHashMap::default(),
            last_combination: Mutex::new(None),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Make a package available for on-demand download.
    pub fn register_package(&mut self, name: impl Into<String>, contents: Manifest) -> &mut Self {
        self.registry.insert(name.into(), contents);
        self
    }
}

fn combination_signature(dependencies: &FxHashMap<String, String>) -> String {
    let mut pins: Vec<String> = dependencies
        .iter()
        .map(|(name, version)| format!("{name}@{version}"))
        .collect();
    pins.sort();
    pins.join(",")
}

/// Package segment of a specifier: `pkg/sub` -> `pkg`, `@s/pkg/x` -> `@s/pkg`.
fn package_name(specifier: &str) -> &str {
    let mut segments = specifier.splitn(3, '/');
    match specifier.strip_prefix('@') {
        Some(_) => {
            let scope = segments.next().unwrap_or(specifier);
            match segments.next() {
                Some(name) => &specifier[..scope.len() + 1 + name.len()],
                None => specifier,
            }
        }
        None => segments.next().unwrap_or(specifier),
    }
}

#[async_trait(?Send)]
impl DependencyDownloader for ManifestDownloader {
    async fn load_dependencies(
        &self,
        dependencies: &FxHashMap<String, String>,
    ) -> Result<LoadedDependencies> {
        let signature = combination_signature(dependencies);
        let mut last = self.last_combination.lock();
        let is_new_combination = last.as_deref() != Some(signature.as_str());
        *last = Some(signature);

        Ok(LoadedDependencies {
            manifest: self.base.clone(),
            is_new_combination,
        })
    }

    async fn download(&self, specifier: &str, from_path: &str) -> Result<Manifest> {
        let package = package_name(specifier);
        self.registry
            .get(package)
            .cloned()
            .ok_or_else(|| Error::Download {
                specifier: specifier.to_string(),
                reason: format!("package '{package}' not available (required by {from_path})"),
            })
    }
}
