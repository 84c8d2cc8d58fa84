//! The graph vertex: one source module tied to one loader-chain query.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::diagnostics::TranspileDiagnostic;
use crate::evaluator::{Compilation, HmrMode};
use crate::module::{Module, ModuleSource};
use crate::module_id::ModuleId;

/// A transpiled module: cached transpile output, cached evaluation, and the
/// four bidirectional edge sets linking it into the graph.
///
/// Edge symmetry is maintained by the manager: B sits in A's dependencies
/// exactly when A sits in B's initiators, and likewise for the
/// transpilation pair.
pub struct TranspiledModule {
    pub module: Module,
    pub query: String,

    /// Last transpile output; `None` while untranspiled or invalidated.
    pub source: Option<ModuleSource>,
    /// Last evaluation record; never cached without `source` except when
    /// `changed` marks an HMR-short-circuited reset.
    pub compilation: Option<Compilation>,
    /// Entries are roots of the live graph and survive pruning with no
    /// initiators.
    pub is_entry: bool,
    /// Set when an HMR-accepting node skipped its compilation reset; tells
    /// the next evaluation to rerun the unit.
    pub changed: bool,
    pub hmr: HmrMode,

    pub errors: Vec<TranspileDiagnostic>,
    pub warnings: Vec<TranspileDiagnostic>,

    /// Auxiliary outputs emitted via `emit_file`.
    pub assets: FxHashMap<String, ModuleSource>,
    pub emitted_assets: Vec<ModuleSource>,
    /// Synthetic modules produced by loaders; owned by this node and reset
    /// with it.
    pub child_modules: Vec<ModuleId>,

    /// Runtime imports this node makes.
    pub dependencies: FxHashSet<ModuleId>,
    /// Inverse of `dependencies`.
    pub initiators: FxHashSet<ModuleId>,
    /// Compile-time-only deps: rebuild this node when the target rebuilds.
    pub transpilation_dependencies: FxHashSet<ModuleId>,
    /// Inverse of `transpilation_dependencies`.
    pub transpilation_initiators: FxHashSet<ModuleId>,
    /// Runtime edges that were recovered through an async download.
    pub async_dependencies: FxHashSet<ModuleId>,
    /// Specifiers awaiting download; drained at the end of each transpile.
    pub pending_downloads: Vec<String>,
}

impl TranspiledModule {
    pub fn new(module: Module, query: impl Into<String>) -> Self {
        Self {
            module,
            query: query.into(),
            source: None,
            compilation: None,
            is_entry: false,
            changed: false,
            hmr: HmrMode::Off,
            errors: Vec::new(),
            warnings: Vec::new(),
            assets: FxHashMap::default(),
            emitted_assets: Vec::new(),
            child_modules: Vec::new(),
            dependencies: FxHashSet::default(),
            initiators: FxHashSet::default(),
            transpilation_dependencies: FxHashSet::default(),
            transpilation_initiators: FxHashSet::default(),
            async_dependencies: FxHashSet::default(),
            pending_downloads: Vec::new(),
        }
    }

    pub fn id(&self) -> ModuleId {
        ModuleId::new(self.module.path.clone(), self.query.clone())
    }

    pub fn is_hot(&self) -> bool {
        self.hmr.is_hot()
    }

    /// Clear the node-local transpilation state. Edge unlinking is the
    /// manager's job; this only touches fields owned by the node itself.
    pub(crate) fn clear_transpilation_state(&mut self) {
        self.source = None;
        self.errors.clear();
        self.warnings.clear();
        self.async_dependencies.clear();
        self.pending_downloads.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_node_has_empty_state() {
        let node = TranspiledModule::new(Module::new("/a.js", "code"), "");
        assert!(node.source.is_none());
        assert!(node.compilation.is_none());
        assert!(!node.is_entry);
        assert!(!node.is_hot());
        assert!(node.assets.is_empty());
        assert_eq!(node.id(), ModuleId::plain("/a.js"));
    }
}
