//! Template presets: which transformers apply to which file kinds.
//!
//! A preset carries the registered transpilers (selectable by name from a
//! loader query), the path-pattern rules that pick a default chain, the
//! specifier aliases, and resolution knobs consumed by the path resolver.

use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{Map, Value as JsonValue};

use crate::module::Module;
use crate::transpiler::Transpiler;
use crate::{Error, Result};

/// One stage of a resolved loader chain.
#[derive(Clone)]
pub struct LoaderEntry {
    pub transpiler: Rc<dyn Transpiler>,
    pub options: JsonValue,
}

impl LoaderEntry {
    pub fn new(transpiler: Rc<dyn Transpiler>) -> Self {
        Self {
            transpiler,
            options: JsonValue::Null,
        }
    }

    pub fn with_options(transpiler: Rc<dyn Transpiler>, options: JsonValue) -> Self {
        Self {
            transpiler,
            options,
        }
    }
}

type RulePredicate = Box<dyn Fn(&Module) -> bool>;

struct LoaderRule {
    test: RulePredicate,
    chain: Vec<LoaderEntry>,
}

/// The template-driven registry deciding which transformers apply.
pub struct Preset {
    name: String,
    by_name: FxHashMap<&'static str, Rc<dyn Transpiler>>,
    rules: Vec<LoaderRule>,
    default_chain: Vec<LoaderEntry>,
    aliases: Vec<(String, String)>,
    resolve_extensions: Vec<String>,
    runtime_specifiers: FxHashSet<String>,
}

impl Preset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            by_name: FxHashMap::default(),
            rules: Vec::new(),
            default_chain: Vec::new(),
            aliases: Vec::new(),
            resolve_extensions: vec!["js".into(), "jsx".into(), "json".into()],
            runtime_specifiers: FxHashSet::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a transpiler so loader queries can select it by name.
    pub fn register_transpiler(&mut self, transpiler: Rc<dyn Transpiler>) -> &mut Self {
        self.by_name.insert(transpiler.name(), transpiler);
        self
    }

    /// Add a chain selected by an arbitrary predicate over the module.
    pub fn add_rule(
        &mut self,
        test: impl Fn(&Module) -> bool + 'static,
        chain: Vec<LoaderEntry>,
    ) -> &mut Self {
        for entry in &chain {
            self.by_name
                .entry(entry.transpiler.name())
                .or_insert_with(|| Rc::clone(&entry.transpiler));
        }
        self.rules.push(LoaderRule {
            test: Box::new(test),
            chain,
        });
        self
    }

    /// Add a chain selected by file extension.
    pub fn add_extension_rule(&mut self, extensions: &[&str], chain: Vec<LoaderEntry>) -> &mut Self {
        let suffixes: Vec<String> = extensions.iter().map(|ext| format!(".{ext}")).collect();
        self.add_rule(
            move |module| suffixes.iter().any(|s| module.path.ends_with(s)),
            chain,
        )
    }

    /// Chain applied when no rule matches. Empty means the code passes
    /// through untransformed.
    pub fn set_default_chain(&mut self, chain: Vec<LoaderEntry>) -> &mut Self {
        for entry in &chain {
            self.by_name
                .entry(entry.transpiler.name())
                .or_insert_with(|| Rc::clone(&entry.transpiler));
        }
        self.default_chain = chain;
        self
    }

    pub fn add_alias(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.aliases.push((from.into(), to.into()));
        self
    }

    /// Specifiers resolved by the host runtime rather than the graph
    /// (runtime helpers, host APIs).
    pub fn add_runtime_specifier(&mut self, specifier: impl Into<String>) -> &mut Self {
        self.runtime_specifiers.insert(specifier.into());
        self
    }

    pub fn is_runtime_specifier(&self, specifier: &str) -> bool {
        self.runtime_specifiers.contains(specifier)
    }

    pub fn set_resolve_extensions(&mut self, extensions: &[&str]) -> &mut Self {
        self.resolve_extensions = extensions.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Extensions tried by the resolver's fallback search, in order.
    pub fn resolve_extensions(&self) -> &[String] {
        &self.resolve_extensions
    }

    /// Apply aliases to a specifier: an exact match rewrites the whole
    /// specifier, a prefix match rewrites its package segment.
    pub fn get_aliased_path(&self, specifier: &str) -> String {
        for (from, to) in &self.aliases {
            if specifier == from {
                return to.clone();
            }
            if let Some(rest) = specifier.strip_prefix(from.as_str()) {
                if rest.starts_with('/') {
                    return format!("{to}{rest}");
                }
            }
        }
        specifier.to_string()
    }

    /// Ordered transformer list for `(module, query)`.
    ///
    /// A non-empty query overrides rule matching: each `!`-separated segment
    /// names a registered transpiler, optionally with `?key=value` options.
    pub fn get_loaders(&self, module: &Module, query: &str) -> Result<Vec<LoaderEntry>> {
        if !query.is_empty() {
            return query
                .split('!')
                .filter(|segment| !segment.is_empty())
                .map(|segment| self.loader_from_segment(segment))
                .collect();
        }

        for rule in &self.rules {
            if (rule.test)(module) {
                return Ok(rule.chain.clone());
            }
        }
        Ok(self.default_chain.clone())
    }

    fn loader_from_segment(&self, segment: &str) -> Result<LoaderEntry> {
        let (name, options) = match segment.split_once('?') {
            Some((name, query_string)) => (name, parse_query_options(query_string)),
            None => (segment, JsonValue::Null),
        };
        let transpiler = self
            .by_name
            .get(name)
            .ok_or_else(|| Error::UnknownTranspiler {
                name: name.to_string(),
            })?;
        Ok(LoaderEntry::with_options(Rc::clone(transpiler), options))
    }
}

/// Parse `key=value&flag` loader options into a JSON object. Values stay
/// strings; bare keys become `true`.
fn parse_query_options(query_string: &str) -> JsonValue {
    let mut map = Map::new();
    for pair in query_string.split('&').filter(|p| !p.is_empty()) {
        match pair.split_once('=') {
            Some((key, value)) => {
                map.insert(key.to_string(), JsonValue::String(value.to_string()));
            }
            None => {
                map.insert(pair.to_string(), JsonValue::Bool(true));
            }
        }
    }
    JsonValue::Object(map)
}
