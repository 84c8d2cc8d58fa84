//! Style transpiler: injects a stylesheet into the host document.
//!
//! Styles are evaluation side effects on the shared document, so the
//! transpiler is non-cacheable (the module re-evaluates every compile) and
//! its cleanup hook detaches the injected tag when the module leaves the
//! live graph.

use async_trait::async_trait;

use skiff_core::loader::LoaderContext;
use skiff_core::{Host, TranspileDiagnostic, TranspileOutput, Transpiler};

#[derive(Debug, Default)]
pub struct StyleTranspiler;

impl StyleTranspiler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait(?Send)]
impl Transpiler for StyleTranspiler {
    fn name(&self) -> &'static str {
        "style-loader"
    }

    fn cacheable(&self) -> bool {
        false
    }

    async fn transpile(
        &self,
        code: String,
        ctx: &mut LoaderContext<'_>,
    ) -> Result<TranspileOutput, TranspileDiagnostic> {
        ctx.host().insert_style(&ctx.path, &code);
        let encoded = serde_json::to_string(&code)
            .map_err(|error| TranspileDiagnostic::error(error.to_string()))?;
        Ok(TranspileOutput::code(format!("module.exports = {encoded}")))
    }

    fn clean_module(&self, ctx: &mut LoaderContext<'_>) {
        tracing::debug!(path = %ctx.path, "detaching injected style");
        ctx.host().remove_style(&ctx.path);
    }
}
