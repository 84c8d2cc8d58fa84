//! The transformer contract.
//!
//! A transpiler is one stage of a loader chain: it receives the previous
//! stage's code plus a [`LoaderContext`](crate::loader::LoaderContext) scoped
//! to the module being transpiled, and returns transformed code. Transpilers
//! discover dependencies dynamically by registering them on the context.

use async_trait::async_trait;

use crate::diagnostics::TranspileDiagnostic;
use crate::loader::LoaderContext;

/// Output of one transformer invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct TranspileOutput {
    pub transpiled_code: String,
    pub source_map: Option<String>,
}

impl TranspileOutput {
    pub fn code(transpiled_code: impl Into<String>) -> Self {
        Self {
            transpiled_code: transpiled_code.into(),
            source_map: None,
        }
    }
}

/// A single transformer. Implementations live in `skiff-loaders` (and in
/// embedder code for template-specific stages).
///
/// Transpilers run inside the single-owner graph walk, so their futures are
/// not required to be `Send`.
#[async_trait(?Send)]
pub trait Transpiler {
    /// Name used to select this transpiler from a loader query
    /// (e.g. `"url-loader"` in `url-loader?mimetype=image/png!./logo.png`).
    fn name(&self) -> &'static str;

    /// Whether the evaluation of modules produced by this transpiler may be
    /// cached across compile requests. Non-cacheable transpilers (e.g. style
    /// injection) have their modules re-evaluated every run.
    fn cacheable(&self) -> bool {
        true
    }

    /// Transform `code`, registering any discovered dependencies, children,
    /// assets or diagnostics on the context.
    async fn transpile(
        &self,
        code: String,
        ctx: &mut LoaderContext<'_>,
    ) -> Result<TranspileOutput, TranspileDiagnostic>;

    /// Cleanup hook invoked when the module leaves the live graph (no
    /// initiators and not an entry), e.g. to detach injected styles.
    fn clean_module(&self, _ctx: &mut LoaderContext<'_>) {}
}
