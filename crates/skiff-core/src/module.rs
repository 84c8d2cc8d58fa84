use serde::{Deserialize, Serialize};

/// An input source file: the immutable unit handed to the manager.
///
/// `path` is an absolute slash-separated string. When `requires` is present
/// the file has already been processed by an upstream service and carries an
/// authoritative dependency list; transformation is skipped for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub path: String,
    pub code: String,
    #[serde(default)]
    pub requires: Option<Vec<String>>,
}

impl Module {
    pub fn new(path: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            code: code.into(),
            requires: None,
        }
    }

    /// A pre-processed module with a precomputed dependency list.
    pub fn with_requires(
        path: impl Into<String>,
        code: impl Into<String>,
        requires: Vec<String>,
    ) -> Self {
        Self {
            path: path.into(),
            code: code.into(),
            requires: Some(requires),
        }
    }

    /// Directory portion of the module path, without a trailing slash.
    pub fn directory(&self) -> &str {
        crate::resolver::dirname(&self.path)
    }
}

/// The post-transform output of one loader-chain run.
///
/// The source map, when present, is carried as its JSON string so the
/// serialized graph blob stays format-stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSource {
    pub file_name: String,
    pub compiled_code: String,
    pub source_map: Option<String>,
}

impl ModuleSource {
    pub fn new(
        file_name: impl Into<String>,
        compiled_code: impl Into<String>,
        source_map: Option<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            compiled_code: compiled_code.into(),
            source_map,
        }
    }

    /// Append the `sourceURL` trailer so devtools attribute the evaluated
    /// code to its virtual path.
    pub fn with_source_url(mut self, origin: &str) -> Self {
        self.compiled_code
            .push_str(&format!("\n//# sourceURL={}{}", origin, self.file_name));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_url_trailer() {
        let source = ModuleSource::new("/index.js", "module.exports = 1", None)
            .with_source_url("https://sandbox.test");
        assert!(
            source
                .compiled_code
                .ends_with("//# sourceURL=https://sandbox.test/index.js")
        );
    }

    #[test]
    fn module_directory() {
        assert_eq!(Module::new("/src/app/main.js", "").directory(), "/src/app");
        assert_eq!(Module::new("/main.js", "").directory(), "/");
    }
}
