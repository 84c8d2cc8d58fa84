//! End-to-end scenarios over the vanilla preset: compile requests in,
//! evaluated exports and host events out.

use std::cell::RefCell;
use std::rc::Rc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use skiff_core::compile::{CompileRequest, compile};
use skiff_core::loader::LoaderContext;
use skiff_core::preset::{LoaderEntry, Preset};
use skiff_core::{
    Manager, Manifest, ManifestDownloader, ManifestModule, MemoryStorage, Module, ModuleId,
    RecordingHost, SandboxMessage, Services, TranspileDiagnostic, TranspileOutput, Transpiler,
};
use skiff_loaders::{CommonJsTranspiler, vanilla_preset};

const SANDBOX_ID: &str = "scenario-sandbox";

struct Sandbox {
    manager: Manager,
    host: Rc<RecordingHost>,
    storage: Rc<MemoryStorage>,
}

fn sandbox_with(preset: Preset, downloader: Rc<ManifestDownloader>) -> Sandbox {
    let host = Rc::new(RecordingHost::new());
    let storage = Rc::new(MemoryStorage::new());
    let host_dyn: Rc<dyn skiff_core::Host> = host.clone();
    let storage_dyn: Rc<dyn skiff_core::CacheStorage> = storage.clone();
    let services = Services::new(host_dyn, storage_dyn, downloader);
    Sandbox {
        manager: Manager::new(SANDBOX_ID, preset, services),
        host,
        storage,
    }
}

fn sandbox() -> Sandbox {
    sandbox_with(vanilla_preset(), Rc::new(ManifestDownloader::empty()))
}

fn request(files: &[(&str, &str)], entry: &str) -> CompileRequest {
    let modules = files
        .iter()
        .map(|(path, code)| Module::new(*path, *code))
        .collect();
    CompileRequest::new(SANDBOX_ID, modules, entry)
}

/// Wraps the CommonJS transpiler with an invocation counter so scenarios can
/// assert how much re-transpilation an edit caused.
struct CountingJs {
    inner: CommonJsTranspiler,
    invocations: Rc<RefCell<usize>>,
}

#[async_trait(?Send)]
impl Transpiler for CountingJs {
    fn name(&self) -> &'static str {
        "commonjs-loader"
    }

    async fn transpile(
        &self,
        code: String,
        ctx: &mut LoaderContext<'_>,
    ) -> Result<TranspileOutput, TranspileDiagnostic> {
        *self.invocations.borrow_mut() += 1;
        self.inner.transpile(code, ctx).await
    }
}

fn counting_preset() -> (Preset, Rc<RefCell<usize>>) {
    let invocations = Rc::new(RefCell::new(0usize));
    let mut preset = Preset::new("vanilla-counting");
    let counting: Rc<dyn Transpiler> = Rc::new(CountingJs {
        inner: CommonJsTranspiler::new(),
        invocations: Rc::clone(&invocations),
    });
    preset.add_extension_rule(&["js"], vec![LoaderEntry::new(counting)]);
    (preset, invocations)
}

// The smallest useful sandbox: one file, one export.
#[tokio::test]
async fn single_file_entry_evaluates_and_reports_success() {
    let mut sandbox = sandbox();
    let exports = compile(
        &mut sandbox.manager,
        request(&[("/index.js", "module.exports = 1 + 2")], "/index.js"),
    )
    .await
    .unwrap();

    assert_eq!(exports.as_number(), Some(3.0));
    assert!(sandbox.host.messages().contains(&SandboxMessage::Success));
}

// Runtime imports build symmetric dependency/initiator edges.
#[tokio::test]
async fn two_file_linkage_builds_symmetric_edges() {
    let mut sandbox = sandbox();
    let exports = compile(
        &mut sandbox.manager,
        request(
            &[
                ("/a.js", "module.exports = require('./b').x * 2"),
                ("/b.js", "exports.x = 21"),
            ],
            "/a.js",
        ),
    )
    .await
    .unwrap();
    assert_eq!(exports.as_number(), Some(42.0));

    let a = ModuleId::plain("/a.js");
    let b = ModuleId::plain("/b.js");
    let node_a = sandbox.manager.node(&a).unwrap();
    let node_b = sandbox.manager.node(&b).unwrap();
    assert!(node_a.dependencies.contains(&b));
    assert!(node_b.initiators.contains(&a));
    assert!(node_a.source.is_some() && node_a.compilation.is_some());
    assert!(node_b.source.is_some() && node_b.compilation.is_some());
    sandbox.manager.check_invariants().unwrap();
}

// Mutually-importing modules settle on partial exports.
#[tokio::test]
async fn cyclic_imports_terminate() {
    let mut sandbox = sandbox();
    let exports = compile(
        &mut sandbox.manager,
        request(
            &[
                ("/a.js", "exports.a = 1; exports.b = require('./b').b"),
                ("/b.js", "exports.b = 2; exports.a = require('./a').a"),
            ],
            "/a.js",
        ),
    )
    .await
    .unwrap();
    assert_eq!(exports.get("b").unwrap().as_number(), Some(2.0));
}

// An edit clears the edited transpile and every cached importer evaluation.
#[tokio::test]
async fn editing_a_dependency_invalidates_its_importers() {
    let mut sandbox = sandbox();
    let first = compile(
        &mut sandbox.manager,
        request(
            &[
                ("/a.js", "module.exports = require('./b').x * 2"),
                ("/b.js", "exports.x = 21"),
            ],
            "/a.js",
        ),
    )
    .await
    .unwrap();
    assert_eq!(first.as_number(), Some(42.0));

    // Reconcile the edited file set directly to observe the reset state.
    sandbox.manager.update_data(vec![
        Module::new("/a.js", "module.exports = require('./b').x * 2"),
        Module::new("/b.js", "exports.x = 50"),
    ]);
    let a = ModuleId::plain("/a.js");
    let b = ModuleId::plain("/b.js");
    assert!(sandbox.manager.node(&b).unwrap().source.is_none());
    assert!(sandbox.manager.node(&a).unwrap().compilation.is_none());
    sandbox.manager.check_invariants().unwrap();

    let entry = sandbox
        .manager
        .resolve_transpiled_module("/a.js", "/")
        .unwrap();
    sandbox.manager.transpile_modules(&entry).await.unwrap();
    let second = sandbox.manager.evaluate_module(&entry).unwrap();
    assert_eq!(second.as_number(), Some(100.0));
}

// A self-accepting entry absorbs dependency edits without a page reload.
#[tokio::test]
async fn hot_accepting_entry_updates_without_a_reload() {
    let (preset, invocations) = counting_preset();
    let mut sandbox = sandbox_with(preset, Rc::new(ManifestDownloader::empty()));

    let first = compile(
        &mut sandbox.manager,
        request(
            &[
                (
                    "/index.js",
                    "module.hot.accept(); module.exports = require('./dep').value",
                ),
                ("/dep.js", "exports.value = 2"),
            ],
            "/index.js",
        ),
    )
    .await
    .unwrap();
    assert_eq!(first.as_number(), Some(2.0));
    assert!(sandbox.manager.webpack_hmr());
    let documents_after_first = sandbox.host.document_resets.lock().len();

    let before_edit = *invocations.borrow();
    let second = compile(
        &mut sandbox.manager,
        request(
            &[
                (
                    "/index.js",
                    "module.hot.accept(); module.exports = require('./dep').value",
                ),
                ("/dep.js", "exports.value = 7"),
            ],
            "/index.js",
        ),
    )
    .await
    .unwrap();

    assert_eq!(second.as_number(), Some(7.0));
    // Only the edited dependency went through the transformer again.
    assert_eq!(*invocations.borrow(), before_edit + 1);
    let entry = ModuleId::plain("/index.js");
    assert!(!sandbox.manager.node(&entry).unwrap().changed);
    assert!(!sandbox.host.reload_requested());
    // HMR-active compiles leave the document alone.
    assert_eq!(
        sandbox.host.document_resets.lock().len(),
        documents_after_first
    );
}

// A package unknown at transpile time is fetched and linked on the fly.
#[tokio::test]
async fn unknown_package_is_downloaded_and_linked() {
    let mut downloader = ManifestDownloader::empty();
    let mut package = Manifest::default();
    package.contents.insert(
        "/node_modules/missing-pkg/index.js".into(),
        ManifestModule::with_requires("module.exports = 4", Vec::new()),
    );
    downloader.register_package("missing-pkg", package);

    let mut sandbox = sandbox_with(vanilla_preset(), Rc::new(downloader));
    let exports = compile(
        &mut sandbox.manager,
        request(
            &[("/a.js", "module.exports = require('missing-pkg') * 10")],
            "/a.js",
        ),
    )
    .await
    .unwrap();
    assert_eq!(exports.as_number(), Some(40.0));

    let a = ModuleId::plain("/a.js");
    let pkg = ModuleId::plain("/node_modules/missing-pkg/index.js");
    assert!(sandbox.manager.node(&a).unwrap().dependencies.contains(&pkg));
    assert!(
        sandbox
            .manager
            .node(&a)
            .unwrap()
            .async_dependencies
            .contains(&pkg)
    );
}

// When the download fails, the failure lands on the importing file.
#[tokio::test]
async fn failed_download_fails_the_request_with_the_importer_file() {
    let mut sandbox = sandbox();
    let error = compile(
        &mut sandbox.manager,
        request(
            &[("/a.js", "module.exports = require('missing-pkg')")],
            "/a.js",
        ),
    )
    .await
    .unwrap_err();
    assert_eq!(error.file_name(), Some("/a.js"));

    let reported = sandbox
        .host
        .messages()
        .into_iter()
        .find_map(|message| match message {
            SandboxMessage::Error { file_name, .. } => Some(file_name),
            _ => None,
        });
    assert_eq!(reported.as_deref(), Some("/a.js"));
}

#[tokio::test]
async fn transpile_failure_clears_the_cache_blob_and_reports() {
    let mut sandbox = sandbox();
    // Prime the cache with a good compile.
    compile(
        &mut sandbox.manager,
        request(&[("/index.js", "module.exports = 1")], "/index.js"),
    )
    .await
    .unwrap();
    assert!(sandbox.storage.contains(SANDBOX_ID));

    let error = compile(
        &mut sandbox.manager,
        request(&[("/index.js", "module.exports = 1"), ("/broken.json", "{")], "/broken.json"),
    )
    .await
    .unwrap_err();
    assert!(error.file_name().is_some());
    assert!(!sandbox.storage.contains(SANDBOX_ID));
}

#[tokio::test]
async fn json_modules_export_their_value() {
    let mut sandbox = sandbox();
    let exports = compile(
        &mut sandbox.manager,
        request(
            &[
                ("/index.js", "module.exports = require('./config.json').port"),
                ("/config.json", "{\"port\": 8080, \"tags\": [\"a\", \"b\"]}"),
            ],
            "/index.js",
        ),
    )
    .await
    .unwrap();
    assert_eq!(exports.as_number(), Some(8080.0));
}

#[tokio::test]
async fn url_loader_query_produces_a_data_url() {
    let mut sandbox = sandbox();
    let exports = compile(
        &mut sandbox.manager,
        request(
            &[
                (
                    "/index.js",
                    "module.exports = require('url-loader?mimetype=image/png!./logo.png')",
                ),
                ("/logo.png", "PNG"),
            ],
            "/index.js",
        ),
    )
    .await
    .unwrap();
    assert_eq!(
        exports.as_str().as_deref(),
        Some("data:image/png;base64,UE5H")
    );
}

#[tokio::test]
async fn styles_inject_and_detach_when_orphaned() {
    let mut sandbox = sandbox();
    compile(
        &mut sandbox.manager,
        request(
            &[
                ("/index.js", "require('./app.css'); module.exports = 1"),
                ("/app.css", "body { margin: 0 }"),
            ],
            "/index.js",
        ),
    )
    .await
    .unwrap();
    assert_eq!(sandbox.host.styles.lock().len(), 1);

    // Style evaluations are never cached across requests.
    let css = ModuleId::plain("/app.css");
    assert!(sandbox.manager.node(&css).unwrap().compilation.is_none());

    // Dropping the import orphans the stylesheet; cleanup detaches it.
    compile(
        &mut sandbox.manager,
        request(
            &[
                ("/index.js", "module.exports = 2"),
                ("/app.css", "body { margin: 0 }"),
            ],
            "/index.js",
        ),
    )
    .await
    .unwrap();
    assert!(sandbox.host.styles.lock().is_empty());
}

#[tokio::test]
async fn externals_resolve_through_the_injected_record() {
    let mut sandbox = sandbox();
    let mut externals = FxHashMap::default();
    externals.insert(
        "host-api".to_string(),
        serde_json::json!({"version": "2.1.0"}),
    );
    sandbox.manager.set_externals(externals);

    let exports = compile(
        &mut sandbox.manager,
        request(
            &[("/index.js", "module.exports = require('host-api').version")],
            "/index.js",
        ),
    )
    .await
    .unwrap();
    assert_eq!(exports.as_str().as_deref(), Some("2.1.0"));
}

#[tokio::test]
async fn restored_graph_serves_a_fresh_manager() {
    let mut sandbox = sandbox();
    compile(
        &mut sandbox.manager,
        request(
            &[
                ("/a.js", "module.exports = require('./b').x"),
                ("/b.js", "exports.x = 5"),
            ],
            "/a.js",
        ),
    )
    .await
    .unwrap();
    assert!(sandbox.storage.contains(SANDBOX_ID));

    let host_dyn: Rc<dyn skiff_core::Host> = sandbox.host.clone();
    let storage_dyn: Rc<dyn skiff_core::CacheStorage> = sandbox.storage.clone();
    let services = Services::new(host_dyn, storage_dyn, Rc::new(ManifestDownloader::empty()));
    let mut restored = Manager::new(SANDBOX_ID, vanilla_preset(), services);
    restored.load().await;
    restored.check_invariants().unwrap();

    let a = ModuleId::plain("/a.js");
    let b = ModuleId::plain("/b.js");
    assert!(restored.node(&a).unwrap().source.is_some());
    assert!(restored.node(&a).unwrap().dependencies.contains(&b));

    // An unchanged file set leaves the restored sources warm, so evaluation
    // runs without any transpiler work.
    restored.update_data(vec![
        Module::new("/a.js", "module.exports = require('./b').x"),
        Module::new("/b.js", "exports.x = 5"),
    ]);
    assert!(restored.node(&a).unwrap().source.is_some());
    let exports = restored.evaluate_module(&a).unwrap();
    assert_eq!(exports.as_number(), Some(5.0));
}
