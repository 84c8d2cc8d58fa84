//! The compile orchestrator: one edit-driven request end to end.
//!
//! A request adopts the latest dependency manifest (invalidating the whole
//! manager on a new combination), reconciles the file set, transpiles the
//! entry's transitive closure, resets the host document when HMR is
//! inactive, evaluates the entry, reports success or failure over the host
//! channel, and persists the graph blob.
//!
//! Request coalescing (at most one pending slot, newest wins) is the job of
//! the external command queue; this module assumes requests arrive one at a
//! time.

use rustc_hash::FxHashMap;

use crate::Result;
use crate::deps::DependencyDownloader;
use crate::evaluator::Value;
use crate::graph::Manager;
use crate::host::{Host, SandboxMessage};
use crate::module::Module;

/// Fallback markup when the file set carries no `/index.html`.
const DEFAULT_HTML: &str = "<div id=\"root\"></div>";

/// One compile request, as delivered by the request pipeline.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub sandbox_id: String,
    pub modules: Vec<Module>,
    pub entry: String,
    pub external_resources: Vec<String>,
    pub dependencies: FxHashMap<String, String>,
    pub has_actions: bool,
    pub is_module_view: bool,
    pub template: String,
}

impl CompileRequest {
    pub fn new(sandbox_id: impl Into<String>, modules: Vec<Module>, entry: impl Into<String>) -> Self {
        Self {
            sandbox_id: sandbox_id.into(),
            modules,
            entry: entry.into(),
            external_resources: Vec::new(),
            dependencies: FxHashMap::default(),
            has_actions: false,
            is_module_view: false,
            template: String::new(),
        }
    }

    pub fn with_dependencies(mut self, dependencies: FxHashMap<String, String>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// Run one compile request against the manager. Emits `success` (plus a
/// resize report) or an `error` event; a failed request also drops the
/// graph cache blob.
pub async fn compile(manager: &mut Manager, request: CompileRequest) -> Result<Value> {
    let entry = request.entry.clone();
    match compile_inner(manager, request).await {
        Ok(exports) => {
            let host = manager.host();
            host.dispatch(SandboxMessage::Success);
            host.dispatch(SandboxMessage::Resize {
                height: host.document_height(),
            });
            if let Err(error) = manager.save().await {
                tracing::warn!(%error, "graph cache save failed");
            }
            Ok(exports)
        }
        Err(error) => {
            if let Err(clear_error) = manager.clear_cache().await {
                tracing::warn!(error = %clear_error, "graph cache clear failed");
            }
            let host = manager.host();
            host.dispatch(SandboxMessage::Error {
                module: error.module_id().map(|id| id.id_string()),
                file_name: error.file_name().unwrap_or(entry.as_str()).to_string(),
                message: error.to_string(),
            });
            Err(error)
        }
    }
}

async fn compile_inner(manager: &mut Manager, request: CompileRequest) -> Result<Value> {
    tracing::debug!(
        sandbox = %request.sandbox_id,
        entry = %request.entry,
        modules = request.modules.len(),
        template = %request.template,
        "compile request"
    );

    let downloader = manager.downloader();
    let loaded = downloader.load_dependencies(&request.dependencies).await?;
    let previous_had_reconciler = manager.manifest().has_dom_reconciler();
    if loaded.is_new_combination {
        tracing::debug!("new dependency combination; invalidating graph");
        manager.invalidate_all();
    }
    manager.set_manifest(loaded.manifest);

    manager.update_data(request.modules);

    let entry = manager.resolve_transpiled_module(&request.entry, "/")?;
    manager.transpile_modules(&entry).await?;

    if !manager.webpack_hmr() {
        let host = manager.host();
        if previous_had_reconciler {
            host.unmount_roots();
        }
        let html = manager
            .modules()
            .find(|module| module.path == "/index.html")
            .map(|module| module.code.clone())
            .unwrap_or_else(|| DEFAULT_HTML.to_string());
        host.reset_document(&html);
    }

    manager.evaluate_module(&entry)
}
