//! Path resolution: import specifiers to source modules.
//!
//! Resolution order:
//! 1. a `!` splits the specifier into a loader-chain prefix (the query) and
//!    the final path component,
//! 2. preset aliases rewrite the path component,
//! 3. bare specifiers (`^(\w|@\w)`, no `!`) consult the externals map first
//!    and the dependency manifest second,
//! 4. anything else joins against the importing file's directory and falls
//!    back through the standard extension and `/index` candidates.
//!
//! A bare specifier whose package is unknown fails with a `module-not-found`
//! error carrying the `is_dependency` marker, signalling the caller to
//! attempt an async download.

use path_clean::clean;
use rustc_hash::FxHashMap;
use serde_json::Value as JsonValue;
use std::path::Path;

use crate::manifest::Manifest;
use crate::module::Module;
use crate::preset::Preset;
use crate::{Error, Result};

/// Read-only view over everything resolution consults.
pub(crate) struct ResolveContext<'a> {
    pub files: &'a FxHashMap<String, Module>,
    pub manifest: &'a Manifest,
    pub externals: &'a FxHashMap<String, JsonValue>,
    pub preset: &'a Preset,
}

/// A successful resolution.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Resolved {
    /// A source module plus the loader query carried by the specifier.
    Source { module: Module, query: String },
    /// A dependency whose exports are injected by the host.
    External(String),
}

pub(crate) fn resolve(
    ctx: &ResolveContext<'_>,
    specifier: &str,
    from_path: &str,
    force_absolute: bool,
) -> Result<Resolved> {
    let (query, path_part) = split_loader_query(specifier);
    let aliased = ctx.preset.get_aliased_path(path_part);

    if query.is_empty() && is_bare_specifier(&aliased) {
        if ctx.externals.contains_key(&aliased) {
            return Ok(Resolved::External(aliased));
        }
        if let Some(module) = resolve_as_path(ctx, &format!("/node_modules/{aliased}")) {
            return Ok(Resolved::Source {
                module,
                query: query.to_string(),
            });
        }
        return Err(Error::ModuleNotFound {
            specifier: aliased,
            from_path: from_path.to_string(),
            is_dependency: true,
        });
    }

    let base = if force_absolute || aliased.starts_with('/') {
        "/"
    } else {
        dirname(from_path)
    };
    let joined = join_path(base, &aliased);
    match resolve_as_path(ctx, &joined) {
        Some(module) => Ok(Resolved::Source {
            module,
            query: query.to_string(),
        }),
        None => Err(Error::ModuleNotFound {
            specifier: specifier.to_string(),
            from_path: from_path.to_string(),
            is_dependency: false,
        }),
    }
}

/// Split a `loader!loader!path` specifier at the last `!`.
pub(crate) fn split_loader_query(specifier: &str) -> (&str, &str) {
    match specifier.rsplit_once('!') {
        Some((prefix, path)) => (prefix, path),
        None => ("", specifier),
    }
}

/// True for package-style specifiers: `lodash`, `@scope/pkg/file`.
pub(crate) fn is_bare_specifier(specifier: &str) -> bool {
    if specifier.contains('!') {
        return false;
    }
    let mut chars = specifier.chars();
    match chars.next() {
        Some('@') => chars
            .next()
            .map(|c| c.is_alphanumeric() || c == '_')
            .unwrap_or(false),
        Some(c) => c.is_alphanumeric() || c == '_',
        None => false,
    }
}

/// Directory of a slash-separated path, without a trailing slash.
pub(crate) fn dirname(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((dir, _)) => dir,
    }
}

pub(crate) fn join_path(base: &str, specifier: &str) -> String {
    let joined = Path::new(base).join(specifier);
    clean(joined).to_string_lossy().into_owned()
}

/// Look a path up in the project file set, falling back to the manifest.
fn lookup(ctx: &ResolveContext<'_>, path: &str) -> Option<Module> {
    if let Some(module) = ctx.files.get(path) {
        return Some(module.clone());
    }
    ctx.manifest
        .contents
        .get(path)
        .map(|entry| entry.to_module(path))
}

/// Exact path, then path + extensions.
fn try_file(ctx: &ResolveContext<'_>, path: &str) -> Option<Module> {
    if let Some(module) = lookup(ctx, path) {
        return Some(module);
    }
    for ext in ctx.preset.resolve_extensions() {
        if let Some(module) = lookup(ctx, &format!("{path}.{ext}")) {
            return Some(module);
        }
    }
    None
}

/// Full candidate walk for an absolute path: file, `package.json` main,
/// directory index.
fn resolve_as_path(ctx: &ResolveContext<'_>, path: &str) -> Option<Module> {
    if let Some(module) = try_file(ctx, path) {
        return Some(module);
    }
    if let Some(module) = try_package_main(ctx, path) {
        return Some(module);
    }
    for ext in ctx.preset.resolve_extensions() {
        if let Some(module) = lookup(ctx, &format!("{path}/index.{ext}")) {
            return Some(module);
        }
    }
    None
}

/// Follow a directory's `package.json` `browser`/`main` field.
fn try_package_main(ctx: &ResolveContext<'_>, dir: &str) -> Option<Module> {
    let pkg = lookup(ctx, &format!("{dir}/package.json"))?;
    let parsed: JsonValue = serde_json::from_str(&pkg.code).ok()?;
    let main = parsed
        .get("browser")
        .and_then(JsonValue::as_str)
        .or_else(|| parsed.get("main").and_then(JsonValue::as_str))?;
    let target = join_path(dir, main);
    try_file(ctx, &target).or_else(|| {
        ctx.preset
            .resolve_extensions()
            .iter()
            .find_map(|ext| lookup(ctx, &format!("{target}/index.{ext}")))
    })
}
