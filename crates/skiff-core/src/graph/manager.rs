//! The graph manager: owns every transpiled-module node, orchestrates the
//! transpile walk, drives evaluation through the require-linker, mediates
//! invalidation, and handles graph persistence.
//!
//! The manager is single-owner: the active transpile/evaluate walk for the
//! current compile request is the only mutator, and the whole walk runs on
//! one task runner. Suspension points are the transpiler invocations,
//! dependency downloads and storage calls.

use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value as JsonValue;

use super::node::TranspiledModule;
use super::serialize;
use crate::deps::{DependencyDownloader, ManifestDownloader};
use crate::evaluator::{self, Compilation, EvalError, EvalHost, HmrMode, Value};
use crate::host::{Host, NullHost};
use crate::loader;
use crate::manifest::Manifest;
use crate::module::{Module, ModuleSource};
use crate::module_id::ModuleId;
use crate::preset::Preset;
use crate::resolver::{self, ResolveContext, Resolved};
use crate::storage::{CacheStorage, MemoryStorage};
use crate::transpiler::Transpiler;
use crate::{Error, Result};

/// The collaborator bundle a manager is constructed over.
pub struct Services {
    pub host: Rc<dyn Host>,
    pub storage: Rc<dyn CacheStorage>,
    pub downloader: Rc<dyn DependencyDownloader>,
}

impl Services {
    pub fn new(
        host: Rc<dyn Host>,
        storage: Rc<dyn CacheStorage>,
        downloader: Rc<dyn DependencyDownloader>,
    ) -> Self {
        Self {
            host,
            storage,
            downloader,
        }
    }

    /// Headless defaults: null host, in-memory storage, empty downloader.
    pub fn in_memory() -> Self {
        Self {
            host: Rc::new(NullHost),
            storage: Rc::new(MemoryStorage::new()),
            downloader: Rc::new(ManifestDownloader::empty()),
        }
    }
}

/// Owner of the transpiled-module graph for one sandbox.
pub struct Manager {
    id: String,
    preset: Preset,
    pub(crate) modules: FxHashMap<String, Module>,
    pub(crate) transpiled_modules: FxHashMap<ModuleId, TranspiledModule>,
    manifest: Manifest,
    externals: FxHashMap<String, JsonValue>,
    env_variables: FxHashMap<String, String>,
    webpack_hmr: bool,
    origin: String,
    host: Rc<dyn Host>,
    storage: Rc<dyn CacheStorage>,
    downloader: Rc<dyn DependencyDownloader>,
}

impl Manager {
    pub fn new(id: impl Into<String>, preset: Preset, services: Services) -> Self {
        Self {
            id: id.into(),
            preset,
            modules: FxHashMap::default(),
            transpiled_modules: FxHashMap::default(),
            manifest: Manifest::default(),
            externals: FxHashMap::default(),
            env_variables: FxHashMap::default(),
            webpack_hmr: false,
            origin: String::new(),
            host: services.host,
            storage: services.storage,
            downloader: services.downloader,
        }
    }

    // ---- configuration ----

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn preset(&self) -> &Preset {
        &self.preset
    }

    pub fn host(&self) -> Rc<dyn Host> {
        Rc::clone(&self.host)
    }

    pub fn downloader(&self) -> Rc<dyn DependencyDownloader> {
        Rc::clone(&self.downloader)
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Adopt the latest external-dependency manifest.
    pub fn set_manifest(&mut self, manifest: Manifest) {
        self.manifest = manifest;
    }

    /// Dependencies whose exports are injected by the host.
    pub fn set_externals(&mut self, externals: FxHashMap<String, JsonValue>) {
        self.externals = externals;
    }

    pub fn set_env_variables(&mut self, env_variables: FxHashMap<String, String>) {
        self.env_variables = env_variables;
    }

    /// Origin prefixed onto `sourceURL` trailers.
    pub fn set_origin(&mut self, origin: impl Into<String>) {
        self.origin = origin.into();
    }

    /// True once any module registered a hot-update acceptance.
    pub fn webpack_hmr(&self) -> bool {
        self.webpack_hmr
    }

    // ---- file set and node table ----

    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.values()
    }

    pub(crate) fn insert_module(&mut self, module: Module) {
        self.modules.insert(module.path.clone(), module);
    }

    pub(crate) fn modules_in_directory(&self, dir: &str) -> Vec<Module> {
        let prefix = if dir.ends_with('/') {
            dir.to_string()
        } else {
            format!("{dir}/")
        };
        self.modules
            .values()
            .filter(|module| module.path.starts_with(&prefix))
            .cloned()
            .collect()
    }

    pub fn node(&self, id: &ModuleId) -> Result<&TranspiledModule> {
        self.transpiled_modules
            .get(id)
            .ok_or_else(|| Error::UnknownModule { id: id.clone() })
    }

    pub(crate) fn node_mut(&mut self, id: &ModuleId) -> Result<&mut TranspiledModule> {
        self.transpiled_modules
            .get_mut(id)
            .ok_or_else(|| Error::UnknownModule { id: id.clone() })
    }

    pub fn transpiled_module_ids(&self) -> Vec<ModuleId> {
        self.transpiled_modules.keys().cloned().collect()
    }

    /// Create or look up the node for `(module.path, query)`.
    pub fn add_transpiled_module(&mut self, module: Module, query: &str) -> ModuleId {
        let id = ModuleId::new(module.path.clone(), query);
        self.transpiled_modules
            .entry(id.clone())
            .or_insert_with(|| TranspiledModule::new(module, query));
        id
    }

    // ---- resolution ----

    pub(crate) fn resolve(
        &self,
        specifier: &str,
        from_path: &str,
        force_absolute: bool,
    ) -> Result<Resolved> {
        let ctx = ResolveContext {
            files: &self.modules,
            manifest: &self.manifest,
            externals: &self.externals,
            preset: &self.preset,
        };
        resolver::resolve(&ctx, specifier, from_path, force_absolute)
    }

    /// Resolve a specifier and return (creating on first reference) its
    /// transpiled module.
    pub fn resolve_transpiled_module(&mut self, specifier: &str, from_path: &str) -> Result<ModuleId> {
        match self.resolve(specifier, from_path, false)? {
            Resolved::Source { module, query } => Ok(self.add_transpiled_module(module, &query)),
            // Externals are injected by the host and own no graph node.
            Resolved::External(name) => Err(Error::ModuleNotFound {
                specifier: name,
                from_path: from_path.to_string(),
                is_dependency: false,
            }),
        }
    }

    /// All nodes whose source path lies under `dir` (resolved against
    /// `from_path`).
    pub fn resolve_transpiled_modules_in_directory(
        &mut self,
        dir: &str,
        from_path: &str,
    ) -> Result<Vec<ModuleId>> {
        let base = if dir.starts_with('/') {
            dir.to_string()
        } else {
            resolver::join_path(resolver::dirname(from_path), dir)
        };
        let matches = self.modules_in_directory(&base);
        Ok(matches
            .into_iter()
            .map(|module| self.add_transpiled_module(module, ""))
            .collect())
    }

    // ---- edge pairs ----

    pub(crate) fn link_dependency(&mut self, from: &ModuleId, to: &ModuleId) {
        if let Some(node) = self.transpiled_modules.get_mut(from) {
            node.dependencies.insert(to.clone());
        }
        if let Some(node) = self.transpiled_modules.get_mut(to) {
            node.initiators.insert(from.clone());
        }
    }

    pub(crate) fn link_transpilation_dependency(&mut self, from: &ModuleId, to: &ModuleId) {
        if let Some(node) = self.transpiled_modules.get_mut(from) {
            node.transpilation_dependencies.insert(to.clone());
        }
        if let Some(node) = self.transpiled_modules.get_mut(to) {
            node.transpilation_initiators.insert(from.clone());
        }
    }

    // ---- file-set reconciliation ----

    /// Reconcile the node set with a new file set: create nodes for unseen
    /// paths, reset nodes whose code changed, and prune nodes whose source
    /// disappeared and that nothing retains.
    pub fn update_data(&mut self, modules: Vec<Module>) {
        let new_paths: FxHashSet<String> =
            modules.iter().map(|module| module.path.clone()).collect();

        // Prune to a fixpoint: removing one orphan can orphan another.
        loop {
            let removable: Vec<ModuleId> = self
                .transpiled_modules
                .values()
                .filter(|node| {
                    !new_paths.contains(&node.module.path)
                        && node.initiators.is_empty()
                        && !node.is_entry
                })
                .map(TranspiledModule::id)
                .collect();
            if removable.is_empty() {
                break;
            }
            for id in removable {
                self.remove_transpiled_module(&id);
            }
        }

        for module in modules {
            match self.modules.get(&module.path) {
                None => {
                    self.insert_module(module.clone());
                    self.add_transpiled_module(module, "");
                }
                Some(existing)
                    if existing.code != module.code || existing.requires != module.requires =>
                {
                    self.insert_module(module.clone());
                    let affected: Vec<ModuleId> = self
                        .transpiled_modules
                        .values()
                        .filter(|node| node.module.path == module.path)
                        .map(TranspiledModule::id)
                        .collect();
                    for id in affected {
                        self.update_module(&id, module.clone());
                    }
                }
                Some(_) => {}
            }
        }

        // Drop file records that left the set; loader-emitted children are
        // re-synthesised on the next transpile of their parent.
        self.modules
            .retain(|path, _| new_paths.contains(path) || path.starts_with("/node_modules/"));
    }

    /// Swap the underlying source module and reset the node; edges to
    /// unaffected nodes are rebuilt on the next transpile.
    pub(crate) fn update_module(&mut self, id: &ModuleId, module: Module) {
        if let Some(node) = self.transpiled_modules.get_mut(id) {
            node.module = module;
        }
        self.reset_module(id);
    }

    /// Remove a node from the graph, unlinking every remaining edge.
    fn remove_transpiled_module(&mut self, id: &ModuleId) {
        self.reset_module(id);
        let Some(node) = self.transpiled_modules.get(id) else {
            return;
        };
        let initiators: Vec<ModuleId> = node.initiators.iter().cloned().collect();
        let t_deps: Vec<ModuleId> = node.transpilation_dependencies.iter().cloned().collect();
        let t_inits: Vec<ModuleId> = node.transpilation_initiators.iter().cloned().collect();

        for initiator in initiators {
            if let Some(other) = self.transpiled_modules.get_mut(&initiator) {
                other.dependencies.remove(id);
                other.async_dependencies.remove(id);
            }
        }
        for dep in t_deps {
            if let Some(other) = self.transpiled_modules.get_mut(&dep) {
                other.transpilation_initiators.remove(id);
            }
        }
        for initiator in t_inits {
            if let Some(other) = self.transpiled_modules.get_mut(&initiator) {
                other.transpilation_dependencies.remove(id);
            }
        }
        self.transpiled_modules.remove(id);
    }

    /// Drop the whole graph; used when a new dependency combination
    /// invalidates everything.
    pub fn invalidate_all(&mut self) {
        self.transpiled_modules.clear();
        self.modules.clear();
        self.webpack_hmr = false;
    }

    // ---- resets ----

    /// Full node reset: children first, emitted assets, compilation,
    /// transpilation; the node stops being an entry.
    pub(crate) fn reset_module(&mut self, id: &ModuleId) {
        let mut visited = FxHashSet::default();
        self.reset_module_inner(id, &mut visited);
    }

    fn reset_module_inner(&mut self, id: &ModuleId, visited: &mut FxHashSet<ModuleId>) {
        if !visited.insert(id.clone()) {
            return;
        }
        let children: Vec<ModuleId> = match self.transpiled_modules.get_mut(id) {
            Some(node) => {
                node.emitted_assets.clear();
                std::mem::take(&mut node.child_modules)
            }
            None => return,
        };
        for child in children {
            self.reset_module_inner(&child, visited);
        }
        self.reset_compilation(id);
        self.reset_transpilation(id);
        if let Some(node) = self.transpiled_modules.get_mut(id) {
            node.is_entry = false;
        }
    }

    /// Invalidate cached evaluations, cascading through initiators.
    ///
    /// An HMR-accepting node short-circuits: it keeps its compilation and is
    /// marked `changed` so the next evaluation reruns the unit; the cascade
    /// stops there.
    pub(crate) fn reset_compilation(&mut self, id: &ModuleId) {
        let mut visited = FxHashSet::default();
        self.reset_compilation_inner(id, &mut visited);
    }

    fn reset_compilation_inner(&mut self, id: &ModuleId, visited: &mut FxHashSet<ModuleId>) {
        if !visited.insert(id.clone()) {
            return;
        }
        let Some(node) = self.transpiled_modules.get_mut(id) else {
            return;
        };
        if node.compilation.is_none() {
            return;
        }
        if node.is_hot() {
            node.changed = true;
            return;
        }
        node.compilation = None;
        node.changed = false;
        let initiators: Vec<ModuleId> = node
            .initiators
            .iter()
            .chain(node.transpilation_initiators.iter())
            .cloned()
            .collect();
        for initiator in initiators {
            if self
                .transpiled_modules
                .get(&initiator)
                .is_some_and(|n| n.compilation.is_some())
            {
                self.reset_compilation_inner(&initiator, visited);
            }
        }
    }

    /// Invalidate transpile output. Unless the node itself is HMR-accepting,
    /// the reset recurses into transpilation initiators (compile-time
    /// consumers must rebuild). Outgoing runtime edges are unlinked.
    pub(crate) fn reset_transpilation(&mut self, id: &ModuleId) {
        let mut visited = FxHashSet::default();
        self.reset_transpilation_inner(id, &mut visited);
    }

    fn reset_transpilation_inner(&mut self, id: &ModuleId, visited: &mut FxHashSet<ModuleId>) {
        if !visited.insert(id.clone()) {
            return;
        }
        let (hot, t_initiators) = match self.transpiled_modules.get(id) {
            Some(node) => (
                node.is_hot(),
                node.transpilation_initiators
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>(),
            ),
            None => return,
        };
        if !hot {
            for initiator in t_initiators {
                if self
                    .transpiled_modules
                    .get(&initiator)
                    .is_some_and(|n| n.source.is_some())
                {
                    self.reset_transpilation_inner(&initiator, visited);
                }
            }
        }
        let dependencies: Vec<ModuleId> = match self.transpiled_modules.get_mut(id) {
            Some(node) => node.dependencies.drain().collect(),
            None => return,
        };
        for dep in &dependencies {
            if let Some(dep_node) = self.transpiled_modules.get_mut(dep) {
                dep_node.initiators.remove(id);
            }
        }
        if let Some(node) = self.transpiled_modules.get_mut(id) {
            node.clear_transpilation_state();
        }
        // A cleared transpile must not leave a cached evaluation behind.
        let stale_compilation = self
            .transpiled_modules
            .get(id)
            .is_some_and(|node| node.compilation.is_some() && !node.changed);
        if stale_compilation {
            self.reset_compilation(id);
        }
    }

    /// Equivalent to a full reset; the manager prunes the node separately
    /// when nothing retains it.
    pub fn dispose(&mut self, id: &ModuleId) {
        self.reset_module(id);
    }

    // ---- transpilation walk ----

    /// Mark the entry and transpile it plus its transitive closure.
    pub async fn transpile_modules(&mut self, entry: &ModuleId) -> Result<()> {
        self.node_mut(entry)?.is_entry = true;
        let mut visited = FxHashSet::default();
        self.transpile_tree(entry.clone(), &mut visited).await
    }

    /// Memoised traversal over dependencies and transpilation initiators,
    /// transpiling every node that lacks a source.
    fn transpile_tree<'a>(
        &'a mut self,
        id: ModuleId,
        visited: &'a mut FxHashSet<ModuleId>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + 'a>> {
        Box::pin(async move {
            if !visited.insert(id.clone()) {
                return Ok(());
            }
            self.transpile_node(&id).await?;
            let neighbours: Vec<ModuleId> = {
                let node = self.node(&id)?;
                node.dependencies
                    .iter()
                    .chain(node.transpilation_initiators.iter())
                    .cloned()
                    .collect()
            };
            for neighbour in neighbours {
                self.transpile_tree(neighbour, visited).await?;
            }
            Ok(())
        })
    }

    /// Transpile one node: run its loader chain, store the output, then
    /// settle any async dependencies. Idempotent while `source` is cached.
    async fn transpile_node(&mut self, id: &ModuleId) -> Result<()> {
        if self.node(id)?.source.is_some() {
            return Ok(());
        }
        tracing::debug!(module = %id, "transpiling");

        // Clear old outgoing runtime edges before the chain rediscovers them.
        let old_deps: Vec<ModuleId> = {
            let node = self.node_mut(id)?;
            node.errors.clear();
            node.warnings.clear();
            node.async_dependencies.clear();
            node.dependencies.drain().collect()
        };
        for dep in &old_deps {
            if let Some(dep_node) = self.transpiled_modules.get_mut(dep) {
                dep_node.initiators.remove(id);
            }
        }

        let (code, source_map) = loader::run_loader_chain(self, id).await?;
        let source =
            ModuleSource::new(id.path.clone(), code, source_map).with_source_url(&self.origin);
        self.node_mut(id)?.source = Some(source);

        // Settle pending downloads; rejections are deferred to evaluation.
        let pending: Vec<String> = {
            let node = self.node_mut(id)?;
            std::mem::take(&mut node.pending_downloads)
        };
        for specifier in pending {
            match self.download_dependency(&specifier, &id.path).await {
                Ok(dep) => {
                    self.link_dependency(id, &dep);
                    self.node_mut(id)?.async_dependencies.insert(dep);
                }
                Err(error) => {
                    tracing::debug!(
                        specifier,
                        module = %id,
                        %error,
                        "async dependency failed; surfacing at evaluation"
                    );
                }
            }
        }
        Ok(())
    }

    /// Fetch a package through the downloader collaborator, merge it into
    /// the manifest, and resolve the specifier against the merged result.
    pub async fn download_dependency(
        &mut self,
        specifier: &str,
        from_path: &str,
    ) -> Result<ModuleId> {
        let downloader = Rc::clone(&self.downloader);
        let partial = downloader.download(specifier, from_path).await?;
        self.manifest.merge(partial);
        self.resolve_transpiled_module(specifier, from_path)
    }

    // ---- evaluation ----

    /// Evaluate the entry transitively, then run the post-evaluation pass
    /// over every node.
    pub fn evaluate_module(&mut self, entry: &ModuleId) -> Result<Value> {
        let exports = self.evaluate_transpiled_module(entry, Vec::new())?;
        for id in self.transpiled_module_ids() {
            self.post_evaluate(&id);
        }
        Ok(exports)
    }

    /// The recursive evaluation entry point used by `require`.
    pub fn evaluate_transpiled_module(
        &mut self,
        id: &ModuleId,
        parents: Vec<ModuleId>,
    ) -> Result<Value> {
        let (has_source, has_compilation, changed, is_entry, is_hot) = {
            let node = self.node(id)?;
            (
                node.source.is_some(),
                node.compilation.is_some(),
                node.changed,
                node.is_entry,
                node.is_hot(),
            )
        };
        if !has_source {
            return Err(Error::NotTranspiled { id: id.clone() });
        }

        // An entry that lost its compilation under HMR and accepts nothing
        // cannot be patched; ask for a full reload.
        if self.webpack_hmr && is_entry && !has_compilation && !is_hot {
            self.host.request_reload();
            return Ok(Value::object());
        }

        if has_compilation && !changed {
            if let Some(compilation) = &self.node(id)?.compilation {
                return Ok(compilation.exports.clone());
            }
        }

        let (code, exports) = {
            let node = self.node_mut(id)?;
            let code = match &node.source {
                Some(source) => source.compiled_code.clone(),
                None => return Err(Error::NotTranspiled { id: id.clone() }),
            };
            let compilation = node.compilation.get_or_insert_with(Compilation::new);
            let exports = compilation.exports.clone();
            node.changed = false;
            (code, exports)
        };

        let module_object = evaluator::make_module_object(&id.path, exports);
        let env = self.env_variables.clone();
        let mut frame_parents = parents;
        frame_parents.push(id.clone());

        let result = {
            let mut linker = RequireHost {
                manager: self,
                current: id.clone(),
                parents: frame_parents,
            };
            evaluator::run_module(&code, &module_object, &env, &mut linker)
        };

        match result {
            Ok(final_exports) => {
                if let Some(compilation) = self.node_mut(id)?.compilation.as_mut() {
                    compilation.exports = final_exports.clone();
                }
                let hot = self.node(id)?.hmr.clone();
                if let HmrMode::Accept(callback) = hot {
                    let mut linker = RequireHost {
                        manager: self,
                        current: id.clone(),
                        parents: vec![id.clone()],
                    };
                    if let Err(error) = evaluator::call_function(&callback, Vec::new(), &mut linker)
                    {
                        tracing::warn!(module = %id, %error, "hmr accept callback failed");
                    }
                }
                Ok(final_exports)
            }
            // Already attributed deeper in the require chain.
            Err(EvalError::Module(inner)) => Err(*inner),
            Err(error) => Err(Error::Evaluation {
                module: id.clone(),
                file_name: id.path.clone(),
                source: error,
            }),
        }
    }

    /// Post-evaluation pass: drop compilations produced by non-cacheable
    /// chains, and give transformers of orphaned nodes their cleanup hook.
    fn post_evaluate(&mut self, id: &ModuleId) {
        let (module, query, orphaned) = match self.transpiled_modules.get(id) {
            Some(node) => (
                node.module.clone(),
                node.query.clone(),
                node.initiators.is_empty() && !node.is_entry,
            ),
            None => return,
        };
        let Ok(chain) = self.preset.get_loaders(&module, &query) else {
            return;
        };
        if chain.iter().any(|entry| !entry.transpiler.cacheable()) {
            if let Some(node) = self.transpiled_modules.get_mut(id) {
                node.compilation = None;
            }
        }
        if orphaned {
            for entry in &chain {
                let transpiler = Rc::clone(&entry.transpiler);
                let mut ctx =
                    loader::LoaderContext::new(self, id.clone(), entry.options.clone());
                transpiler.clean_module(&mut ctx);
            }
        }
    }

    // ---- persistence ----

    /// Restore the graph from the storage blob keyed by this sandbox id.
    /// Best-effort: any failure leaves the manager empty.
    pub async fn load(&mut self) {
        let storage = Rc::clone(&self.storage);
        match storage.load(&self.id).await {
            Ok(Some(blob)) => match serialize::restore(self, &blob) {
                Ok(count) => {
                    tracing::debug!(sandbox = %self.id, modules = count, "restored graph from cache");
                }
                Err(error) => {
                    tracing::warn!(sandbox = %self.id, %error, "discarding unreadable graph cache");
                    self.transpiled_modules.clear();
                }
            },
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(sandbox = %self.id, %error, "graph cache load failed");
            }
        }
    }

    /// Serialize the graph and hand the blob to the storage collaborator.
    pub async fn save(&self) -> Result<()> {
        let blob = serialize::to_bytes(self)?;
        let storage = Rc::clone(&self.storage);
        storage.save(&self.id, blob).await
    }

    /// Drop the serialized blob associated with this sandbox.
    pub async fn clear_cache(&self) -> Result<()> {
        let storage = Rc::clone(&self.storage);
        storage.remove(&self.id).await
    }

    // ---- verification ----

    /// Validate the structural invariants of the graph; used by tests after
    /// public operations.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        for (id, node) in &self.transpiled_modules {
            if *id != node.id() {
                return Err(format!("node keyed {id} reports identity {}", node.id()));
            }
            for dep in &node.dependencies {
                let Some(target) = self.transpiled_modules.get(dep) else {
                    return Err(format!("{id} depends on missing node {dep}"));
                };
                if !target.initiators.contains(id) {
                    return Err(format!("dependency {id} -> {dep} missing initiator backlink"));
                }
            }
            for initiator in &node.initiators {
                let Some(source) = self.transpiled_modules.get(initiator) else {
                    return Err(format!("{id} has missing initiator {initiator}"));
                };
                if !source.dependencies.contains(id) {
                    return Err(format!("initiator {initiator} -> {id} missing dependency edge"));
                }
            }
            for dep in &node.transpilation_dependencies {
                let Some(target) = self.transpiled_modules.get(dep) else {
                    return Err(format!("{id} transpilation-depends on missing node {dep}"));
                };
                if !target.transpilation_initiators.contains(id) {
                    return Err(format!(
                        "transpilation dependency {id} -> {dep} missing backlink"
                    ));
                }
            }
            for initiator in &node.transpilation_initiators {
                let Some(source) = self.transpiled_modules.get(initiator) else {
                    return Err(format!("{id} has missing transpilation initiator {initiator}"));
                };
                if !source.transpilation_dependencies.contains(id) {
                    return Err(format!(
                        "transpilation initiator {initiator} -> {id} missing forward edge"
                    ));
                }
            }
            // `changed` records the HMR-short-circuited reset exception.
            if node.source.is_none() && node.compilation.is_some() && !node.changed {
                return Err(format!("{id} caches a compilation without a source"));
            }
        }
        Ok(())
    }
}

/// The require-linker: serves `require` and `module.hot.accept` for one
/// evaluation frame. Captures the manager, the current module and the
/// parent stack.
struct RequireHost<'m> {
    manager: &'m mut Manager,
    current: ModuleId,
    parents: Vec<ModuleId>,
}

impl RequireHost<'_> {
    fn require_value(&mut self, specifier: &str) -> Result<Value> {
        let aliased = self.manager.preset.get_aliased_path(specifier);

        if resolver::is_bare_specifier(&aliased) {
            if let Some(injected) = self.manager.externals.get(&aliased) {
                return Ok(Value::from_json(injected));
            }
            if self.manager.preset.is_runtime_specifier(&aliased) {
                // Runtime helpers without an injected record resolve empty.
                return Ok(Value::object());
            }
        }

        let required = self
            .manager
            .resolve_transpiled_module(&aliased, &self.current.path)
            .map_err(|error| match error {
                Error::ModuleNotFound {
                    specifier,
                    is_dependency,
                    ..
                } => Error::ModuleNotFound {
                    specifier,
                    from_path: self.current.path.clone(),
                    is_dependency,
                },
                other => other,
            })?;

        if required.path == self.current.path {
            return Err(Error::SelfImport {
                path: self.current.path.clone(),
            });
        }

        self.manager
            .evaluate_transpiled_module(&required, self.parents.clone())
    }
}

impl EvalHost for RequireHost<'_> {
    fn require(&mut self, specifier: &str) -> std::result::Result<Value, EvalError> {
        self.require_value(specifier)
            .map_err(|error| EvalError::Module(Box::new(error)))
    }

    fn hot_accept(
        &mut self,
        path: Option<String>,
        callback: Option<Value>,
    ) -> std::result::Result<(), EvalError> {
        let outcome: Result<()> = match path {
            None => {
                // Self-accepting module; any registered callback is its own.
                self.manager
                    .node_mut(&self.current)
                    .map(|node| node.hmr = HmrMode::SelfAccept)
            }
            Some(dep_path) => self
                .manager
                .resolve_transpiled_module(&dep_path, &self.current.path)
                .and_then(|target| {
                    let mode = match callback {
                        Some(cb) => HmrMode::Accept(cb),
                        None => HmrMode::SelfAccept,
                    };
                    self.manager.node_mut(&target).map(|node| node.hmr = mode)
                }),
        };
        match outcome {
            Ok(()) => {
                self.manager.webpack_hmr = true;
                Ok(())
            }
            Err(error) => Err(EvalError::Module(Box::new(error))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::TranspileDiagnostic;
    use crate::loader::{DependencyOptions, LoaderContext};
    use crate::manifest::ManifestModule;
    use crate::preset::LoaderEntry;
    use crate::transpiler::TranspileOutput;
    use async_trait::async_trait;
    use std::cell::RefCell;

    /// Naive require() scanner; the real one lives in the loaders crate.
    fn scan_requires(code: &str) -> Vec<String> {
        let mut found = Vec::new();
        let mut rest = code;
        while let Some(idx) = rest.find("require(") {
            let after = &rest[idx + 8..];
            let quote = after.chars().next();
            if let Some(q) = quote.filter(|c| *c == '\'' || *c == '"') {
                if let Some(end) = after[1..].find(q) {
                    found.push(after[1..1 + end].to_string());
                    rest = &after[1 + end..];
                    continue;
                }
            }
            rest = after;
        }
        found
    }

    struct ScanTranspiler {
        invocations: Rc<RefCell<usize>>,
    }

    #[async_trait(?Send)]
    impl Transpiler for ScanTranspiler {
        fn name(&self) -> &'static str {
            "scan-loader"
        }

        async fn transpile(
            &self,
            code: String,
            ctx: &mut LoaderContext<'_>,
        ) -> std::result::Result<TranspileOutput, TranspileDiagnostic> {
            *self.invocations.borrow_mut() += 1;
            for specifier in scan_requires(&code) {
                ctx.add_dependency(&specifier, DependencyOptions::default())
                    .map_err(|e| TranspileDiagnostic::error(e.to_string()))?;
            }
            Ok(TranspileOutput::code(code))
        }
    }

    /// Emits an inline child module and rewrites the parent to require it.
    struct EmittingTranspiler;

    #[async_trait(?Send)]
    impl Transpiler for EmittingTranspiler {
        fn name(&self) -> &'static str {
            "emit-loader"
        }

        async fn transpile(
            &self,
            code: String,
            ctx: &mut LoaderContext<'_>,
        ) -> std::result::Result<TranspileOutput, TranspileDiagnostic> {
            ctx.emit_module("inline.child.js", &code, None)
                .map_err(|e| TranspileDiagnostic::error(e.to_string()))?;
            let dir = crate::resolver::dirname(&ctx.path).trim_end_matches('/').to_string();
            Ok(TranspileOutput::code(format!(
                "module.exports = require('{dir}/inline.child.js')"
            )))
        }
    }

    /// Reads `/config.js` at compile time and bakes its code into the
    /// output, linking it as a transpilation dependency.
    struct InlineConfigTranspiler;

    #[async_trait(?Send)]
    impl Transpiler for InlineConfigTranspiler {
        fn name(&self) -> &'static str {
            "inline-config-loader"
        }

        async fn transpile(
            &self,
            _code: String,
            ctx: &mut LoaderContext<'_>,
        ) -> std::result::Result<TranspileOutput, TranspileDiagnostic> {
            ctx.add_transpilation_dependency("/config.js", DependencyOptions::default())
                .map_err(|e| TranspileDiagnostic::error(e.to_string()))?;
            let config = ctx
                .get_modules()
                .into_iter()
                .find(|module| module.path == "/config.js")
                .ok_or_else(|| TranspileDiagnostic::error("missing /config.js"))?;
            Ok(TranspileOutput::code(config.code))
        }
    }

    fn test_preset(counter: Rc<RefCell<usize>>) -> Preset {
        let mut preset = Preset::new("test");
        let scan: Rc<dyn Transpiler> = Rc::new(ScanTranspiler {
            invocations: counter,
        });
        preset.add_extension_rule(&["js"], vec![LoaderEntry::new(scan)]);
        let emit: Rc<dyn Transpiler> = Rc::new(EmittingTranspiler);
        preset.add_extension_rule(&["vx"], vec![LoaderEntry::new(emit)]);
        let inline: Rc<dyn Transpiler> = Rc::new(InlineConfigTranspiler);
        preset.add_extension_rule(&["tpl"], vec![LoaderEntry::new(inline)]);
        preset
    }

    struct TestBench {
        manager: Manager,
        host: Rc<crate::host::RecordingHost>,
        invocations: Rc<RefCell<usize>>,
    }

    fn bench_with_downloader(
        files: &[(&str, &str)],
        downloader: Rc<dyn DependencyDownloader>,
    ) -> TestBench {
        let invocations = Rc::new(RefCell::new(0usize));
        let host = Rc::new(crate::host::RecordingHost::new());
        let host_dyn: Rc<dyn Host> = host.clone();
        let services = Services::new(host_dyn, Rc::new(MemoryStorage::new()), downloader);
        let mut manager = Manager::new(
            "test-sandbox",
            test_preset(Rc::clone(&invocations)),
            services,
        );
        manager.update_data(
            files
                .iter()
                .map(|(path, code)| Module::new(*path, *code))
                .collect(),
        );
        TestBench {
            manager,
            host,
            invocations,
        }
    }

    fn bench(files: &[(&str, &str)]) -> TestBench {
        bench_with_downloader(files, Rc::new(ManifestDownloader::empty()))
    }

    #[test]
    fn edge_pairs_stay_symmetric() {
        let mut bench = bench(&[("/a.js", ""), ("/b.js", "")]);
        let a = ModuleId::plain("/a.js");
        let b = ModuleId::plain("/b.js");
        bench.manager.link_dependency(&a, &b);
        bench.manager.link_transpilation_dependency(&b, &a);
        bench.manager.check_invariants().unwrap();

        assert!(bench.manager.node(&b).unwrap().initiators.contains(&a));
        assert!(
            bench
                .manager
                .node(&a)
                .unwrap()
                .transpilation_initiators
                .contains(&b)
        );

        bench.manager.reset_transpilation(&a);
        assert!(!bench.manager.node(&b).unwrap().initiators.contains(&a));
        bench.manager.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn transpile_links_and_evaluate_resolves() {
        let mut bench = bench(&[
            ("/a.js", "module.exports = require('./b').x * 2"),
            ("/b.js", "exports.x = 21"),
        ]);
        let entry = bench
            .manager
            .resolve_transpiled_module("/a.js", "/")
            .unwrap();
        bench.manager.transpile_modules(&entry).await.unwrap();
        bench.manager.check_invariants().unwrap();

        let b = ModuleId::plain("/b.js");
        assert!(bench.manager.node(&entry).unwrap().dependencies.contains(&b));
        assert!(bench.manager.node(&b).unwrap().initiators.contains(&entry));
        assert!(bench.manager.node(&b).unwrap().source.is_some());

        let exports = bench.manager.evaluate_module(&entry).unwrap();
        assert_eq!(exports.as_number(), Some(42.0));
        assert!(bench.manager.node(&entry).unwrap().compilation.is_some());
        bench.manager.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn transpile_is_idempotent_until_invalidated() {
        let mut bench = bench(&[
            ("/a.js", "module.exports = require('./b').x"),
            ("/b.js", "exports.x = 1"),
        ]);
        let entry = bench
            .manager
            .resolve_transpiled_module("/a.js", "/")
            .unwrap();
        bench.manager.transpile_modules(&entry).await.unwrap();
        let after_first = *bench.invocations.borrow();
        assert_eq!(after_first, 2);

        bench.manager.transpile_modules(&entry).await.unwrap();
        assert_eq!(*bench.invocations.borrow(), after_first);
    }

    #[tokio::test]
    async fn edit_invalidation_cascades_to_initiators() {
        let mut bench = bench(&[
            ("/a.js", "module.exports = require('./b').x * 2"),
            ("/b.js", "exports.x = 21"),
        ]);
        let entry = bench
            .manager
            .resolve_transpiled_module("/a.js", "/")
            .unwrap();
        bench.manager.transpile_modules(&entry).await.unwrap();
        assert_eq!(
            bench
                .manager
                .evaluate_module(&entry)
                .unwrap()
                .as_number(),
            Some(42.0)
        );

        bench.manager.update_data(vec![
            Module::new("/a.js", "module.exports = require('./b').x * 2"),
            Module::new("/b.js", "exports.x = 50"),
        ]);
        let b = ModuleId::plain("/b.js");
        assert!(bench.manager.node(&b).unwrap().source.is_none());
        assert!(bench.manager.node(&b).unwrap().compilation.is_none());
        assert!(bench.manager.node(&entry).unwrap().compilation.is_none());
        assert!(bench.manager.node(&entry).unwrap().source.is_some());
        bench.manager.check_invariants().unwrap();

        bench.manager.transpile_modules(&entry).await.unwrap();
        assert_eq!(
            bench
                .manager
                .evaluate_module(&entry)
                .unwrap()
                .as_number(),
            Some(100.0)
        );
    }

    #[tokio::test]
    async fn hot_node_short_circuits_the_compilation_reset() {
        let mut bench = bench(&[
            ("/a.js", "module.hot.accept(); module.exports = require('./b').x"),
            ("/b.js", "exports.x = 1"),
        ]);
        let entry = bench
            .manager
            .resolve_transpiled_module("/a.js", "/")
            .unwrap();
        bench.manager.transpile_modules(&entry).await.unwrap();
        bench.manager.evaluate_module(&entry).unwrap();
        assert!(bench.manager.webpack_hmr());
        assert!(bench.manager.node(&entry).unwrap().is_hot());

        bench.manager.update_data(vec![
            Module::new(
                "/a.js",
                "module.hot.accept(); module.exports = require('./b').x",
            ),
            Module::new("/b.js", "exports.x = 2"),
        ]);

        let b = ModuleId::plain("/b.js");
        assert!(bench.manager.node(&b).unwrap().source.is_none());
        let entry_node = bench.manager.node(&entry).unwrap();
        assert!(entry_node.changed);
        assert!(entry_node.compilation.is_some());
        assert!(entry_node.source.is_some());
        bench.manager.check_invariants().unwrap();

        // Only the edited dependency is re-transpiled.
        let before = *bench.invocations.borrow();
        bench.manager.transpile_modules(&entry).await.unwrap();
        assert_eq!(*bench.invocations.borrow(), before + 1);

        let exports = bench.manager.evaluate_module(&entry).unwrap();
        assert_eq!(exports.as_number(), Some(2.0));
        assert!(!bench.manager.node(&entry).unwrap().changed);
        assert!(!bench.host.reload_requested());
    }

    #[tokio::test]
    async fn unpatchable_entry_requests_a_full_reload() {
        let mut bench = bench(&[
            (
                "/a.js",
                "module.hot.accept('./dep'); module.exports = require('./dep')",
            ),
            ("/dep.js", "module.exports = 2"),
        ]);
        let entry = bench
            .manager
            .resolve_transpiled_module("/a.js", "/")
            .unwrap();
        bench.manager.transpile_modules(&entry).await.unwrap();
        bench.manager.evaluate_module(&entry).unwrap();
        assert!(bench.manager.webpack_hmr());

        // Editing the entry itself cannot be hot-patched: the entry is not
        // accepting its own updates.
        bench.manager.update_data(vec![
            Module::new(
                "/a.js",
                "module.hot.accept('./dep'); module.exports = require('./dep') + 1",
            ),
            Module::new("/dep.js", "module.exports = 2"),
        ]);
        bench.manager.transpile_modules(&entry).await.unwrap();
        let exports = bench.manager.evaluate_module(&entry).unwrap();

        assert!(bench.host.reload_requested());
        assert_eq!(exports.to_json(), serde_json::json!({}));
    }

    #[tokio::test]
    async fn cycles_terminate_with_partial_exports() {
        let mut bench = bench(&[
            ("/a.js", "exports.a = 1; exports.b = require('./b').b"),
            ("/b.js", "exports.b = 2; exports.a = require('./a').a"),
        ]);
        let entry = bench
            .manager
            .resolve_transpiled_module("/a.js", "/")
            .unwrap();
        bench.manager.transpile_modules(&entry).await.unwrap();
        let exports = bench.manager.evaluate_module(&entry).unwrap();
        assert_eq!(exports.get("b").unwrap().as_number(), Some(2.0));
        bench.manager.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn self_import_is_rejected() {
        let mut bench = bench(&[("/a.js", "module.exports = require('./a')")]);
        let entry = bench
            .manager
            .resolve_transpiled_module("/a.js", "/")
            .unwrap();
        bench.manager.transpile_modules(&entry).await.unwrap();
        let error = bench.manager.evaluate_module(&entry).unwrap_err();
        assert!(matches!(error, Error::SelfImport { .. }));
    }

    #[tokio::test]
    async fn async_dependency_recovery_links_downloaded_package() {
        let mut downloader = ManifestDownloader::empty();
        let mut pkg = Manifest::default();
        pkg.contents.insert(
            "/node_modules/missing-pkg/index.js".into(),
            ManifestModule::with_requires("module.exports = 4", Vec::new()),
        );
        downloader.register_package("missing-pkg", pkg);

        let mut bench = bench_with_downloader(
            &[("/a.js", "module.exports = require('missing-pkg')")],
            Rc::new(downloader),
        );
        let entry = bench
            .manager
            .resolve_transpiled_module("/a.js", "/")
            .unwrap();
        bench.manager.transpile_modules(&entry).await.unwrap();

        let pkg_id = ModuleId::plain("/node_modules/missing-pkg/index.js");
        let entry_node = bench.manager.node(&entry).unwrap();
        assert!(entry_node.dependencies.contains(&pkg_id));
        assert!(entry_node.async_dependencies.contains(&pkg_id));
        assert!(entry_node.pending_downloads.is_empty());
        bench.manager.check_invariants().unwrap();

        let exports = bench.manager.evaluate_module(&entry).unwrap();
        assert_eq!(exports.as_number(), Some(4.0));
    }

    #[tokio::test]
    async fn failed_download_surfaces_at_evaluation_with_importer_file() {
        let mut bench = bench(&[("/a.js", "module.exports = require('missing-pkg')")]);
        let entry = bench
            .manager
            .resolve_transpiled_module("/a.js", "/")
            .unwrap();
        // Transpile succeeds; the unresolved dependency is deferred.
        bench.manager.transpile_modules(&entry).await.unwrap();

        let error = bench.manager.evaluate_module(&entry).unwrap_err();
        assert_eq!(error.file_name(), Some("/a.js"));
    }

    #[tokio::test]
    async fn loader_emitted_children_are_owned_and_linked() {
        let mut bench = bench(&[("/widget.vx", "module.exports = 5")]);
        let entry = bench
            .manager
            .resolve_transpiled_module("/widget.vx", "/")
            .unwrap();
        bench.manager.transpile_modules(&entry).await.unwrap();

        let child = ModuleId::plain("/inline.child.js");
        let parent = bench.manager.node(&entry).unwrap();
        assert!(parent.child_modules.contains(&child));
        assert!(parent.dependencies.contains(&child));
        bench.manager.check_invariants().unwrap();

        let exports = bench.manager.evaluate_module(&entry).unwrap();
        assert_eq!(exports.as_number(), Some(5.0));
    }

    #[tokio::test]
    async fn transpilation_dependency_rebuilds_its_consumers() {
        let mut bench = bench(&[
            ("/page.tpl", "placeholder"),
            ("/config.js", "module.exports = 'v1'"),
        ]);
        let entry = bench
            .manager
            .resolve_transpiled_module("/page.tpl", "/")
            .unwrap();
        bench.manager.transpile_modules(&entry).await.unwrap();
        let exports = bench.manager.evaluate_module(&entry).unwrap();
        assert_eq!(exports.as_str().as_deref(), Some("v1"));

        let config = ModuleId::plain("/config.js");
        assert!(
            bench
                .manager
                .node(&entry)
                .unwrap()
                .transpilation_dependencies
                .contains(&config)
        );
        bench.manager.check_invariants().unwrap();

        // Editing the compile-time input rebuilds the consumer, cached
        // evaluation included.
        bench.manager.update_data(vec![
            Module::new("/page.tpl", "placeholder"),
            Module::new("/config.js", "module.exports = 'v2'"),
        ]);
        let page = bench.manager.node(&entry).unwrap();
        assert!(page.source.is_none());
        assert!(page.compilation.is_none());
        bench.manager.check_invariants().unwrap();

        bench.manager.transpile_modules(&entry).await.unwrap();
        let exports = bench.manager.evaluate_module(&entry).unwrap();
        assert_eq!(exports.as_str().as_deref(), Some("v2"));
    }

    #[test]
    fn directory_resolution_covers_every_node_under_the_prefix() {
        let mut bench = bench(&[("/pages/a.js", ""), ("/pages/b.js", ""), ("/x.js", "")]);
        let mut ids = bench
            .manager
            .resolve_transpiled_modules_in_directory("./pages", "/x.js")
            .unwrap();
        ids.sort();
        assert_eq!(
            ids,
            vec![ModuleId::plain("/pages/a.js"), ModuleId::plain("/pages/b.js")]
        );
    }

    #[test]
    fn update_data_prunes_unretained_nodes() {
        let mut bench = bench(&[("/a.js", ""), ("/gone.js", "")]);
        assert!(bench.manager.node(&ModuleId::plain("/gone.js")).is_ok());

        bench.manager.update_data(vec![Module::new("/a.js", "")]);
        assert!(bench.manager.node(&ModuleId::plain("/gone.js")).is_err());
        assert!(bench.manager.node(&ModuleId::plain("/a.js")).is_ok());
        bench.manager.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn graph_survives_save_and_load() {
        let mut bench = bench(&[
            ("/a.js", "module.exports = require('./b').x"),
            ("/b.js", "exports.x = 9"),
        ]);
        let entry = bench
            .manager
            .resolve_transpiled_module("/a.js", "/")
            .unwrap();
        bench.manager.transpile_modules(&entry).await.unwrap();
        bench.manager.save().await.unwrap();

        // A fresh walk over the restored graph needs no transpiler runs.
        let before = *bench.invocations.borrow();
        bench.manager.load().await;
        bench.manager.check_invariants().unwrap();
        bench.manager.transpile_modules(&entry).await.unwrap();
        assert_eq!(*bench.invocations.borrow(), before);

        let exports = bench.manager.evaluate_module(&entry).unwrap();
        assert_eq!(exports.as_number(), Some(9.0));
    }
}
