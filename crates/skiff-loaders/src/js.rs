//! CommonJS transpiler: static `require()` discovery.
//!
//! The code passes through untransformed; the transpiler's job is edge
//! discovery. Scanning is string- and comment-aware (no regex) so require
//! calls inside literals or comments don't become edges.

use async_trait::async_trait;

use skiff_core::loader::{DependencyOptions, LoaderContext};
use skiff_core::{TranspileDiagnostic, TranspileOutput, Transpiler};

/// Collect the string arguments of static `require('...')` calls.
///
/// Dynamic requires (non-literal arguments) are skipped; they resolve at
/// evaluation time or not at all.
pub fn scan_requires(code: &str) -> Vec<String> {
    let chars: Vec<char> = code.chars().collect();
    let len = chars.len();
    let mut found = Vec::new();
    let mut i = 0;

    let is_ident_char =
        |c: char| c.is_alphanumeric() || c == '_' || c == '$';

    while i < len {
        match chars[i] {
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < len && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i + 1 < len && !(chars[i] == '*' && chars[i + 1] == '/') {
                    i += 1;
                }
                i = (i + 2).min(len);
            }
            '\'' | '"' | '`' => {
                let quote = chars[i];
                i += 1;
                while i < len && chars[i] != quote {
                    if chars[i] == '\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
            }
            'r' => {
                let word_start = i == 0 || {
                    let prev = chars[i - 1];
                    !is_ident_char(prev) && prev != '.'
                };
                let is_require = word_start
                    && chars[i..].starts_with(&['r', 'e', 'q', 'u', 'i', 'r', 'e'])
                    && chars.get(i + 7).is_none_or(|c| !is_ident_char(*c));
                if !is_require {
                    i += 1;
                    continue;
                }
                let mut j = i + 7;
                while matches!(chars.get(j), Some(c) if c.is_whitespace()) {
                    j += 1;
                }
                if chars.get(j) != Some(&'(') {
                    i = j;
                    continue;
                }
                j += 1;
                while matches!(chars.get(j), Some(c) if c.is_whitespace()) {
                    j += 1;
                }
                match chars.get(j) {
                    Some(&quote) if quote == '\'' || quote == '"' => {
                        j += 1;
                        let mut literal = String::new();
                        while j < len && chars[j] != quote {
                            if chars[j] == '\\' && j + 1 < len {
                                j += 1;
                            }
                            literal.push(chars[j]);
                            j += 1;
                        }
                        found.push(literal);
                        i = j + 1;
                    }
                    _ => i = j,
                }
            }
            _ => i += 1,
        }
    }
    found
}

/// The default script-kind transpiler for CommonJS sources.
#[derive(Debug, Default)]
pub struct CommonJsTranspiler;

impl CommonJsTranspiler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait(?Send)]
impl Transpiler for CommonJsTranspiler {
    fn name(&self) -> &'static str {
        "commonjs-loader"
    }

    async fn transpile(
        &self,
        code: String,
        ctx: &mut LoaderContext<'_>,
    ) -> Result<TranspileOutput, TranspileDiagnostic> {
        for specifier in scan_requires(&code) {
            ctx.add_dependency(&specifier, DependencyOptions::default())
                .map_err(|error| TranspileDiagnostic::error(error.to_string()))?;
        }
        Ok(TranspileOutput::code(code))
    }
}
