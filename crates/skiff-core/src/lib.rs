//! # skiff-core
//!
//! In-memory module bundler and evaluator for sandboxed programs.
//!
//! Given a set of source files, an entry path, a preset describing which
//! transformers apply to which file kinds, and a resolved dependency
//! manifest, skiff transpiles the files, links their dependency graph, and
//! evaluates the entry against a host document.
//!
//! The centre of the crate is the [`Manager`](graph::Manager): it owns the
//! bidirectional graph of transpiled modules, drives the transpile walk
//! (with dynamic edge discovery by the transformers), evaluates entries
//! through a custom require-linker, mediates invalidation on source edits
//! (including the hot-module-replacement override), and serializes the
//! graph into an opaque blob for the storage collaborator.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use skiff_core::{Manager, Module, Preset, Services};
//!
//! # async fn example() -> skiff_core::Result<()> {
//! let preset = Preset::new("vanilla"); // usually built by skiff-loaders
//! let mut manager = Manager::new("sandbox-1", preset, Services::in_memory());
//!
//! manager.update_data(vec![Module::new("/index.js", "module.exports = 1 + 2")]);
//! let entry = manager.resolve_transpiled_module("/index.js", "/")?;
//! manager.transpile_modules(&entry).await?;
//! let exports = manager.evaluate_module(&entry)?;
//! assert_eq!(exports.as_number(), Some(3.0));
//! # Ok(())
//! # }
//! ```
//!
//! ## Collaborators
//!
//! The out-of-scope surfaces are traits the embedder supplies: the
//! [`Host`](host::Host) document/event channel, [`CacheStorage`] for the
//! graph blob, and the [`DependencyDownloader`] for external packages.
//! In-memory defaults for all three ship with the crate.

pub mod compile;
pub mod deps;
pub mod diagnostics;
pub mod evaluator;
pub mod graph;
pub mod host;
pub mod loader;
pub mod manifest;
pub mod module;
pub mod module_id;
pub mod preset;
pub(crate) mod resolver;
pub mod storage;
pub mod transpiler;

#[cfg(feature = "logging")]
pub mod logging;

pub use deps::{DependencyDownloader, LoadedDependencies, ManifestDownloader};
pub use diagnostics::{DiagnosticSeverity, TranspileDiagnostic};
pub use evaluator::{Compilation, EvalError, HmrMode, Value};
pub use graph::{Manager, Services, TranspiledModule};
pub use host::{Host, NullHost, RecordingHost, SandboxMessage};
pub use loader::LoaderContext;
pub use manifest::{Manifest, ManifestModule};
pub use module::{Module, ModuleSource};
pub use module_id::ModuleId;
pub use preset::{LoaderEntry, Preset};
pub use storage::{CacheStorage, MemoryStorage};
pub use transpiler::{TranspileOutput, Transpiler};

/// Error type for skiff-core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A specifier did not resolve to any module. `is_dependency` marks a
    /// bare package specifier the downloader may be able to recover.
    #[error("cannot find module '{specifier}' from '{from_path}'")]
    ModuleNotFound {
        specifier: String,
        from_path: String,
        is_dependency: bool,
    },

    /// A module required its own source path.
    #[error("module '{path}' requires itself; remove the self-import to break the loop")]
    SelfImport { path: String },

    /// A transformer failed; the node's transpilation state was reset.
    #[error("transpilation of {file_name} failed: {diagnostic}")]
    Transpilation {
        module: ModuleId,
        file_name: String,
        diagnostic: TranspileDiagnostic,
    },

    /// The evaluator threw while running a unit.
    #[error("evaluation of {file_name} failed: {source}")]
    Evaluation {
        module: ModuleId,
        file_name: String,
        #[source]
        source: EvalError,
    },

    /// Evaluation was requested for a node with no transpile output.
    #[error("module {id} has not been transpiled")]
    NotTranspiled { id: ModuleId },

    /// An id was used that the graph does not contain.
    #[error("unknown transpiled module {id}")]
    UnknownModule { id: ModuleId },

    /// A loader query named an unregistered transpiler.
    #[error("unknown transpiler '{name}' in loader query")]
    UnknownTranspiler { name: String },

    /// Graph blob encode/decode failure.
    #[error("graph serialization failed: {0}")]
    Serialization(String),

    /// Storage collaborator failure.
    #[error("cache storage failure: {0}")]
    Storage(String),

    /// The dependency downloader could not fetch a package.
    #[error("dependency download failed for '{specifier}': {reason}")]
    Download { specifier: String, reason: String },
}

/// Result type alias for skiff-core operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The transpiled module an error is attributed to, when known.
    pub fn module_id(&self) -> Option<&ModuleId> {
        match self {
            Error::Transpilation { module, .. } | Error::Evaluation { module, .. } => Some(module),
            Error::NotTranspiled { id } | Error::UnknownModule { id } => Some(id),
            _ => None,
        }
    }

    /// The file a user-facing error report should point at.
    pub fn file_name(&self) -> Option<&str> {
        match self {
            Error::Transpilation { file_name, .. } | Error::Evaluation { file_name, .. } => {
                Some(file_name)
            }
            Error::ModuleNotFound { from_path, .. } => Some(from_path),
            Error::SelfImport { path } => Some(path),
            _ => None,
        }
    }
}

impl miette::Diagnostic for Error {
    fn code(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        Some(Box::new(match self {
            Error::ModuleNotFound { .. } => "MODULE_NOT_FOUND",
            Error::SelfImport { .. } => "SELF_IMPORT",
            Error::Transpilation { .. } => "TRANSPILATION_ERROR",
            Error::Evaluation { .. } => "EVALUATION_ERROR",
            Error::NotTranspiled { .. } => "NOT_TRANSPILED",
            Error::UnknownModule { .. } => "UNKNOWN_MODULE",
            Error::UnknownTranspiler { .. } => "UNKNOWN_TRANSPILER",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Download { .. } => "DOWNLOAD_ERROR",
        }))
    }

    fn severity(&self) -> Option<miette::Severity> {
        Some(miette::Severity::Error)
    }

    fn help(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        match self {
            Error::ModuleNotFound {
                specifier,
                is_dependency: true,
                ..
            } => Some(Box::new(format!(
                "'{specifier}' looks like an external package; add it to the sandbox dependencies."
            ))),
            Error::ModuleNotFound { specifier, .. } => Some(Box::new(format!(
                "check that '{specifier}' exists in the sandbox files (extensions and /index fallbacks were tried)."
            ))),
            Error::UnknownTranspiler { name } => Some(Box::new(format!(
                "register a transpiler named '{name}' on the preset before referencing it from a loader query."
            ))),
            _ => None,
        }
    }
}
