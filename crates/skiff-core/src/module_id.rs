use serde::{Deserialize, Serialize};

/// Identity of a transpiled module: the pair of source path and loader query.
///
/// Multiple transpiled modules may exist per source file, one per query
/// (e.g. `/logo.png` transpiled plainly and through
/// `url-loader?mimetype=image/png`). The id string form is `path:query`,
/// or just `path` when the query is empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId {
    pub path: String,
    pub query: String,
}

impl ModuleId {
    pub fn new(path: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: query.into(),
        }
    }

    /// Id for the plain (empty-query) transpiled module of a path.
    pub fn plain(path: impl Into<String>) -> Self {
        Self::new(path, "")
    }

    /// Stable string form used as the key in serialized graphs.
    pub fn id_string(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}:{}", self.path, self.query)
        }
    }

    /// Parse the string form produced by [`ModuleId::id_string`].
    ///
    /// Paths are absolute slash-separated strings and never contain `:`,
    /// so the first colon separates path from query.
    pub fn from_id_string(s: &str) -> Self {
        match s.split_once(':') {
            Some((path, query)) => Self::new(path, query),
            None => Self::plain(s),
        }
    }
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id_string())
    }
}
