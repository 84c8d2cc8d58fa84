//! JSON transpiler: a `.json` file becomes a module exporting its value.

use async_trait::async_trait;

use skiff_core::loader::LoaderContext;
use skiff_core::{TranspileDiagnostic, TranspileOutput, Transpiler};

#[derive(Debug, Default)]
pub struct JsonTranspiler;

impl JsonTranspiler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait(?Send)]
impl Transpiler for JsonTranspiler {
    fn name(&self) -> &'static str {
        "json-loader"
    }

    async fn transpile(
        &self,
        code: String,
        _ctx: &mut LoaderContext<'_>,
    ) -> Result<TranspileOutput, TranspileDiagnostic> {
        // Validate up front so the author gets a located JSON error instead
        // of an evaluation failure.
        if let Err(error) = serde_json::from_str::<serde_json::Value>(&code) {
            return Err(
                TranspileDiagnostic::error(format!("invalid JSON: {error}"))
                    .with_location(error.line() as u32, error.column() as u32),
            );
        }
        Ok(TranspileOutput::code(format!("module.exports = {code}")))
    }
}
