//! Raw transpiler: exports the file content as a string.

use async_trait::async_trait;

use skiff_core::loader::LoaderContext;
use skiff_core::{TranspileDiagnostic, TranspileOutput, Transpiler};

#[derive(Debug, Default)]
pub struct RawTranspiler;

impl RawTranspiler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait(?Send)]
impl Transpiler for RawTranspiler {
    fn name(&self) -> &'static str {
        "raw-loader"
    }

    async fn transpile(
        &self,
        code: String,
        _ctx: &mut LoaderContext<'_>,
    ) -> Result<TranspileOutput, TranspileDiagnostic> {
        let encoded = serde_json::to_string(&code)
            .map_err(|error| TranspileDiagnostic::error(error.to_string()))?;
        Ok(TranspileOutput::code(format!("module.exports = {encoded}")))
    }
}
