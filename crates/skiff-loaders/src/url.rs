//! Url transpiler: exports the file as a base64 data URL.
//!
//! The mime type comes from the loader query
//! (`url-loader?mimetype=image/png!./logo.png`) or, failing that, from the
//! file extension.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use skiff_core::loader::LoaderContext;
use skiff_core::{TranspileDiagnostic, TranspileOutput, Transpiler};

#[derive(Debug, Default)]
pub struct UrlTranspiler;

impl UrlTranspiler {
    pub fn new() -> Self {
        Self
    }
}

fn mime_from_extension(path: &str) -> &'static str {
    match path.rsplit_once('.').map(|(_, ext)| ext) {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}

#[async_trait(?Send)]
impl Transpiler for UrlTranspiler {
    fn name(&self) -> &'static str {
        "url-loader"
    }

    async fn transpile(
        &self,
        code: String,
        ctx: &mut LoaderContext<'_>,
    ) -> Result<TranspileOutput, TranspileDiagnostic> {
        let mimetype = ctx
            .options
            .get("mimetype")
            .and_then(|value| value.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| mime_from_extension(&ctx.path).to_string());
        let encoded = STANDARD.encode(code.as_bytes());
        Ok(TranspileOutput::code(format!(
            "module.exports = \"data:{mimetype};base64,{encoded}\""
        )))
    }
}
