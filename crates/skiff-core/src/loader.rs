//! The loader context and chain runner.
//!
//! A loader context is the capability set a transformer gets over the node
//! being transpiled: diagnostics, dynamic dependency registration, child
//! module synthesis and auxiliary file emission. A fresh context is built
//! per transformer invocation, bound to `(node, manager)`; nothing in here
//! is global state.

use std::rc::Rc;

use serde_json::Value as JsonValue;

use crate::diagnostics::TranspileDiagnostic;
use crate::graph::Manager;
use crate::host::Host;
use crate::module::Module;
use crate::module_id::ModuleId;
use crate::resolver::{self, Resolved};
use crate::transpiler::Transpiler;
use crate::{Error, Result};

/// Options for dependency registration.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyOptions {
    /// Resolve the specifier against `/` instead of the importing file's
    /// directory.
    pub is_absolute: bool,
}

/// Capability surface handed to [`Transpiler::transpile`](crate::Transpiler).
pub struct LoaderContext<'a> {
    manager: &'a mut Manager,
    module_id: ModuleId,

    /// Path of the module being transpiled.
    pub path: String,
    /// Loader options from the preset or the loader query, with the
    /// `context` entry merged in.
    pub options: JsonValue,
    /// Loader-facing statics: the stable contract transformers read.
    pub target: &'static str,
    pub source_map: bool,
    pub webpack: bool,
}

impl<'a> LoaderContext<'a> {
    pub(crate) fn new(manager: &'a mut Manager, module_id: ModuleId, options: JsonValue) -> Self {
        let path = module_id.path.clone();
        let mut options = match options {
            JsonValue::Object(map) => JsonValue::Object(map),
            _ => JsonValue::Object(serde_json::Map::new()),
        };
        if let JsonValue::Object(map) = &mut options {
            map.entry("context".to_string())
                .or_insert_with(|| JsonValue::String("/".to_string()));
        }
        Self {
            manager,
            module_id,
            path,
            options,
            target: "web",
            source_map: true,
            webpack: true,
        }
    }

    /// Record a warning against the node. Warnings are flushed to the
    /// diagnostics sink after the transformer returns and never abort.
    pub fn emit_warning(&mut self, mut diagnostic: TranspileDiagnostic) {
        if diagnostic.file_name.is_none() {
            diagnostic.file_name = Some(self.path.clone());
        }
        if let Ok(node) = self.manager.node_mut(&self.module_id) {
            node.warnings.push(diagnostic);
        }
    }

    /// Record an error against the node. The first emitted error aborts the
    /// chain once the current transformer returns.
    pub fn emit_error(&mut self, mut diagnostic: TranspileDiagnostic) {
        if diagnostic.file_name.is_none() {
            diagnostic.file_name = Some(self.path.clone());
        }
        if let Ok(node) = self.manager.node_mut(&self.module_id) {
            node.errors.push(diagnostic);
        }
    }

    /// Synthesise a child source module under the current directory (or an
    /// explicit one), register it as a child and a dependency, and return
    /// its transpiled-module handle.
    pub fn emit_module(
        &mut self,
        path: &str,
        code: &str,
        dir_path: Option<&str>,
    ) -> Result<ModuleId> {
        let base = dir_path
            .map(str::to_string)
            .unwrap_or_else(|| resolver::dirname(&self.path).to_string());
        let abs_path = resolver::join_path(&base, path);
        let module = Module::new(abs_path, code);

        self.manager.insert_module(module.clone());
        let child = self.manager.add_transpiled_module(module, "");
        self.manager.link_dependency(&self.module_id, &child);
        if let Ok(node) = self.manager.node_mut(&self.module_id) {
            if !node.child_modules.contains(&child) {
                node.child_modules.push(child.clone());
            }
        }
        Ok(child)
    }

    /// Add an auxiliary output asset.
    pub fn emit_file(&mut self, name: &str, content: &str, source_map: Option<String>) {
        let source = crate::module::ModuleSource::new(name, content, source_map);
        if let Ok(node) = self.manager.node_mut(&self.module_id) {
            node.assets.insert(name.to_string(), source.clone());
            node.emitted_assets.push(source);
        }
    }

    /// Resolve and link a runtime dependency.
    ///
    /// Returns `None` without linking for runtime helpers, host APIs and
    /// externals. An unknown bare package is queued for async download; any
    /// other resolution failure is swallowed here and surfaces at
    /// evaluation.
    pub fn add_dependency(
        &mut self,
        specifier: &str,
        options: DependencyOptions,
    ) -> Result<Option<ModuleId>> {
        if self.manager.preset().is_runtime_specifier(specifier) {
            return Ok(None);
        }
        match self.manager.resolve(specifier, &self.path, options.is_absolute) {
            Ok(Resolved::Source { module, query }) => {
                let dep = self.manager.add_transpiled_module(module, &query);
                self.manager.link_dependency(&self.module_id, &dep);
                Ok(Some(dep))
            }
            Ok(Resolved::External(_)) => Ok(None),
            Err(Error::ModuleNotFound {
                is_dependency: true,
                ..
            }) => {
                if let Ok(node) = self.manager.node_mut(&self.module_id) {
                    node.pending_downloads.push(specifier.to_string());
                }
                Ok(None)
            }
            Err(error) => {
                tracing::debug!(
                    specifier,
                    from = %self.path,
                    %error,
                    "dependency resolution deferred to evaluation"
                );
                Ok(None)
            }
        }
    }

    /// Link a compile-time dependency: this node is re-transpiled when the
    /// target re-transpiles.
    pub fn add_transpilation_dependency(
        &mut self,
        specifier: &str,
        options: DependencyOptions,
    ) -> Result<Option<ModuleId>> {
        match self.manager.resolve(specifier, &self.path, options.is_absolute) {
            Ok(Resolved::Source { module, query }) => {
                let dep = self.manager.add_transpiled_module(module, &query);
                self.manager.link_transpilation_dependency(&self.module_id, &dep);
                Ok(Some(dep))
            }
            Ok(Resolved::External(_)) => Ok(None),
            Err(error) => {
                tracing::debug!(
                    specifier,
                    from = %self.path,
                    %error,
                    "transpilation dependency did not resolve"
                );
                Ok(None)
            }
        }
    }

    /// Bulk-link every module whose path lies under `dir_path`.
    pub fn add_dependencies_in_directory(
        &mut self,
        dir_path: &str,
        options: DependencyOptions,
    ) -> Result<Vec<ModuleId>> {
        let base = if options.is_absolute {
            resolver::join_path("/", dir_path)
        } else {
            resolver::join_path(resolver::dirname(&self.path), dir_path)
        };
        let matches = self.manager.modules_in_directory(&base);
        let mut linked = Vec::with_capacity(matches.len());
        for module in matches {
            let dep = self.manager.add_transpiled_module(module, "");
            self.manager.link_dependency(&self.module_id, &dep);
            linked.push(dep);
        }
        Ok(linked)
    }

    /// Read the full current file set.
    pub fn get_modules(&self) -> Vec<Module> {
        self.manager.modules().cloned().collect()
    }

    /// The host document collaborator (style injection, etc.).
    pub fn host(&self) -> Rc<dyn Host> {
        self.manager.host()
    }
}

/// Run the ordered transformer chain for a node and return the final code
/// plus source map.
///
/// A module with a precomputed `requires` list skips transformation: its
/// code is final and each listed specifier is registered as a dependency.
pub(crate) async fn run_loader_chain(
    manager: &mut Manager,
    id: &ModuleId,
) -> Result<(String, Option<String>)> {
    let (module, query) = {
        let node = manager.node(id)?;
        (node.module.clone(), node.query.clone())
    };

    let chain = match manager.preset().get_loaders(&module, &query) {
        Ok(chain) => chain,
        Err(error) => {
            let diagnostic = TranspileDiagnostic::error(error.to_string());
            return abort_transpile(manager, id, &module.path, diagnostic);
        }
    };

    if let Some(requires) = &module.requires {
        let mut ctx = LoaderContext::new(manager, id.clone(), JsonValue::Null);
        for specifier in requires {
            ctx.add_dependency(specifier, DependencyOptions::default())?;
        }
        return Ok((module.code.clone(), None));
    }

    let mut code = module.code.clone();
    let mut source_map = None;
    let mut flushed = 0usize;

    for entry in &chain {
        let transpiler = Rc::clone(&entry.transpiler);
        let result = {
            let mut ctx = LoaderContext::new(manager, id.clone(), entry.options.clone());
            transpiler.transpile(code, &mut ctx).await
        };

        flush_warnings(manager, id, &mut flushed)?;

        match result {
            Ok(output) => {
                if let Some(first) = manager.node(id)?.errors.first().cloned() {
                    return abort_transpile(manager, id, &module.path, first);
                }
                code = output.transpiled_code;
                source_map = output.source_map;
            }
            Err(diagnostic) => {
                return abort_transpile(manager, id, &module.path, diagnostic);
            }
        }
    }

    Ok((code, source_map))
}

fn flush_warnings(manager: &mut Manager, id: &ModuleId, flushed: &mut usize) -> Result<()> {
    let pending: Vec<TranspileDiagnostic> = {
        let node = manager.node(id)?;
        node.warnings[*flushed..].to_vec()
    };
    *flushed += pending.len();
    let host = manager.host();
    for warning in &pending {
        host.show_correction(warning);
    }
    Ok(())
}

fn abort_transpile(
    manager: &mut Manager,
    id: &ModuleId,
    path: &str,
    mut diagnostic: TranspileDiagnostic,
) -> Result<(String, Option<String>)> {
    if diagnostic.file_name.is_none() {
        diagnostic.file_name = Some(path.to_string());
    }
    manager.reset_transpilation(id);
    Err(Error::Transpilation {
        module: id.clone(),
        file_name: path.to_string(),
        diagnostic,
    })
}
