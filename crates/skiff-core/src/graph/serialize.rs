//! Graph blob serialization.
//!
//! The graph is flattened into an id-referenced plain record: one entry per
//! node keyed by its `path:query` identity, with every edge set stored as an
//! array of ids. The blob is bincode with a leading format version; its
//! shape is private to the core.
//!
//! Compilations are never serialized (evaluation reruns after a restore),
//! and unresolved async lookups are dropped: they are rediscovered by the
//! next transpile.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::manager::Manager;
use super::node::TranspiledModule;
use crate::module::{Module, ModuleSource};
use crate::module_id::ModuleId;
use crate::{Error, Result};

/// Current blob format version. Increment when the shape changes.
const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SerializedGraph {
    version: u32,
    by_id: FxHashMap<String, SerializedNode>,
}

#[derive(Serialize, Deserialize)]
struct SerializedNode {
    module: Module,
    query: String,
    source: Option<ModuleSource>,
    assets: FxHashMap<String, ModuleSource>,
    emitted_assets: Vec<ModuleSource>,
    is_entry: bool,
    child_modules: Vec<String>,
    dependencies: Vec<String>,
    initiators: Vec<String>,
    transpilation_dependencies: Vec<String>,
    transpilation_initiators: Vec<String>,
    async_dependencies: Vec<String>,
}

fn id_strings(ids: &rustc_hash::FxHashSet<ModuleId>) -> Vec<String> {
    ids.iter().map(ModuleId::id_string).collect()
}

impl SerializedNode {
    fn from_node(node: &TranspiledModule) -> Self {
        Self {
            module: node.module.clone(),
            query: node.query.clone(),
            source: node.source.clone(),
            assets: node.assets.clone(),
            emitted_assets: node.emitted_assets.clone(),
            is_entry: node.is_entry,
            child_modules: node.child_modules.iter().map(ModuleId::id_string).collect(),
            dependencies: id_strings(&node.dependencies),
            initiators: id_strings(&node.initiators),
            transpilation_dependencies: id_strings(&node.transpilation_dependencies),
            transpilation_initiators: id_strings(&node.transpilation_initiators),
            async_dependencies: id_strings(&node.async_dependencies),
        }
    }
}

/// Serialize the whole graph into a blob.
pub(crate) fn to_bytes(manager: &Manager) -> Result<Vec<u8>> {
    let by_id = manager
        .transpiled_modules
        .iter()
        .map(|(id, node)| (id.id_string(), SerializedNode::from_node(node)))
        .collect();
    let graph = SerializedGraph {
        version: FORMAT_VERSION,
        by_id,
    };
    bincode::serde::encode_to_vec(&graph, bincode::config::standard())
        .map_err(|e| Error::Serialization(e.to_string()))
}

/// Restore a serialized graph into the manager, replacing its node table.
/// Returns the number of restored nodes. Edge targets missing from the blob
/// are silently skipped.
pub(crate) fn restore(manager: &mut Manager, bytes: &[u8]) -> Result<usize> {
    let (graph, _): (SerializedGraph, usize) =
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| Error::Serialization(e.to_string()))?;

    if graph.version != FORMAT_VERSION {
        return Err(Error::Serialization(format!(
            "incompatible graph format version: expected {FORMAT_VERSION}, got {}",
            graph.version
        )));
    }

    manager.transpiled_modules.clear();

    // First pass: create every node with its payload.
    for (key, serialized) in &graph.by_id {
        let id = ModuleId::from_id_string(key);
        let mut node = TranspiledModule::new(serialized.module.clone(), serialized.query.clone());
        node.source = serialized.source.clone();
        node.assets = serialized.assets.clone();
        node.emitted_assets = serialized.emitted_assets.clone();
        node.is_entry = serialized.is_entry;
        manager.transpiled_modules.insert(id, node);
    }

    // Second pass: populate edges by id lookup.
    for (key, serialized) in &graph.by_id {
        let id = ModuleId::from_id_string(key);
        let known = |raw: &String| {
            let target = ModuleId::from_id_string(raw);
            manager
                .transpiled_modules
                .contains_key(&target)
                .then_some(target)
        };

        let child_modules: Vec<ModuleId> =
            serialized.child_modules.iter().filter_map(known).collect();
        let dependencies: Vec<ModuleId> = serialized.dependencies.iter().filter_map(known).collect();
        let initiators: Vec<ModuleId> = serialized.initiators.iter().filter_map(known).collect();
        let t_deps: Vec<ModuleId> = serialized
            .transpilation_dependencies
            .iter()
            .filter_map(known)
            .collect();
        let t_inits: Vec<ModuleId> = serialized
            .transpilation_initiators
            .iter()
            .filter_map(known)
            .collect();
        let async_deps: Vec<ModuleId> = serialized
            .async_dependencies
            .iter()
            .filter_map(known)
            .collect();

        if let Some(node) = manager.transpiled_modules.get_mut(&id) {
            node.child_modules = child_modules;
            node.dependencies = dependencies.into_iter().collect();
            node.initiators = initiators.into_iter().collect();
            node.transpilation_dependencies = t_deps.into_iter().collect();
            node.transpilation_initiators = t_inits.into_iter().collect();
            node.async_dependencies = async_deps.into_iter().collect();
        }
    }

    Ok(graph.by_id.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Services;
    use crate::preset::Preset;

    fn seeded_manager() -> Manager {
        let mut manager = Manager::new("serde-test", Preset::new("test"), Services::in_memory());
        let a = manager.add_transpiled_module(Module::new("/a.js", "require('./b')"), "");
        let b = manager.add_transpiled_module(Module::new("/b.js", "exports.x = 21"), "");
        manager.link_dependency(&a, &b);
        manager.node_mut(&a).unwrap().is_entry = true;
        manager.node_mut(&a).unwrap().source = Some(ModuleSource::new(
            "/a.js",
            "require('./b')\n//# sourceURL=/a.js",
            None,
        ));
        manager
    }

    #[test]
    fn roundtrip_preserves_nodes_edges_and_payloads() {
        let manager = seeded_manager();
        let blob = to_bytes(&manager).unwrap();

        let mut restored = Manager::new("serde-test", Preset::new("test"), Services::in_memory());
        let count = restore(&mut restored, &blob).unwrap();
        assert_eq!(count, 2);

        let a = ModuleId::plain("/a.js");
        let b = ModuleId::plain("/b.js");
        let node_a = restored.node(&a).unwrap();
        assert!(node_a.is_entry);
        assert!(node_a.dependencies.contains(&b));
        assert!(node_a.source.is_some());
        assert!(node_a.compilation.is_none());
        let node_b = restored.node(&b).unwrap();
        assert!(node_b.initiators.contains(&a));
        assert_eq!(node_b.module.code, "exports.x = 21");

        restored.check_invariants().unwrap();
    }

    #[test]
    fn corrupt_blob_is_an_error() {
        let mut manager = Manager::new("serde-test", Preset::new("test"), Services::in_memory());
        assert!(restore(&mut manager, b"not a graph blob").is_err());
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let graph = SerializedGraph {
            version: FORMAT_VERSION + 1,
            by_id: FxHashMap::default(),
        };
        let blob =
            bincode::serde::encode_to_vec(&graph, bincode::config::standard()).unwrap();
        let mut manager = Manager::new("serde-test", Preset::new("test"), Services::in_memory());
        assert!(matches!(
            restore(&mut manager, &blob),
            Err(Error::Serialization(_))
        ));
    }
}
