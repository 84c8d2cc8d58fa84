//! Runtime value representation and lexical scopes.
//!
//! Values are `Rc`-shared within the single-threaded evaluation walk; object
//! identity matters (cycle-breaking returns the in-progress exports record),
//! so objects are reference types, not copies.

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde_json::Value as JsonValue;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::parser::{Expr, Stmt};

pub type ObjectRef = Rc<RefCell<IndexMap<String, Value>>>;
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;

/// A runtime value.
#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Object(ObjectRef),
    Array(ArrayRef),
    Function(Rc<Closure>),
    Intrinsic(Intrinsic),
}

/// Host-dispatched builtins bound into every module scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intrinsic {
    Require,
    HotAccept,
}

/// A user function with its captured scope.
pub struct Closure {
    pub params: Vec<String>,
    pub body: ClosureBody,
    pub scope: ScopeRef,
}

pub enum ClosureBody {
    Block(Rc<Vec<Stmt>>),
    Expr(Rc<Expr>),
}

impl Value {
    pub fn object() -> Value {
        Value::Object(Rc::new(RefCell::new(IndexMap::new())))
    }

    pub fn string(s: impl AsRef<str>) -> Value {
        Value::Str(Rc::from(s.as_ref()))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Object(_) => "object",
            Value::Array(_) => "array",
            Value::Function(_) | Value::Intrinsic(_) => "function",
        }
    }

    /// Property read on an object value. Returns `None` for missing keys and
    /// for non-object receivers.
    pub fn get(&self, key: &str) -> Option<Value> {
        match self {
            Value::Object(map) => map.borrow().get(key).cloned(),
            _ => None,
        }
    }

    /// Property write on an object value. Non-objects ignore the write.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        if let Value::Object(map) = self {
            map.borrow_mut().insert(key.into(), value);
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<Rc<str>> {
        match self {
            Value::Str(s) => Some(Rc::clone(s)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Object(_) | Value::Array(_) | Value::Function(_) | Value::Intrinsic(_) => true,
        }
    }

    /// Strict (`===`) equality: same type, same value; reference types by
    /// identity.
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Intrinsic(a), Value::Intrinsic(b)) => a == b,
            _ => false,
        }
    }

    /// Loose (`==`) equality: strict, plus `null == undefined`.
    pub fn loose_eq(&self, other: &Value) -> bool {
        if matches!(
            (self, other),
            (Value::Null, Value::Undefined) | (Value::Undefined, Value::Null)
        ) {
            return true;
        }
        self.strict_eq(other)
    }

    /// String form used by `+` concatenation.
    pub fn display_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.to_string(),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Array(items) => items
                .borrow()
                .iter()
                .map(Value::display_string)
                .collect::<Vec<_>>()
                .join(","),
            Value::Function(_) | Value::Intrinsic(_) => "function".to_string(),
        }
    }

    /// Build a value from host-injected JSON (externals, env payloads).
    pub fn from_json(json: &JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(s) => Value::string(s),
            JsonValue::Array(items) => Value::Array(Rc::new(RefCell::new(
                items.iter().map(Value::from_json).collect(),
            ))),
            JsonValue::Object(map) => {
                let object = Value::object();
                for (key, val) in map {
                    object.set(key, Value::from_json(val));
                }
                object
            }
        }
    }

    /// Project a value into JSON. Functions and intrinsics become null.
    /// Intended for inspection of acyclic export records.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Undefined | Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Str(s) => JsonValue::String(s.to_string()),
            Value::Array(items) => {
                JsonValue::Array(items.borrow().iter().map(Value::to_json).collect())
            }
            Value::Object(map) => {
                let mut out = serde_json::Map::new();
                for (key, val) in map.borrow().iter() {
                    out.insert(key.clone(), val.to_json());
                }
                JsonValue::Object(out)
            }
            Value::Function(_) | Value::Intrinsic(_) => JsonValue::Null,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Object(map) => {
                let mut dbg = f.debug_map();
                for (key, val) in map.borrow().iter() {
                    dbg.entry(key, val);
                }
                dbg.finish()
            }
            Value::Array(items) => f.debug_list().entries(items.borrow().iter()).finish(),
            Value::Function(closure) => write!(f, "[function({})]", closure.params.join(", ")),
            Value::Intrinsic(intrinsic) => write!(f, "[intrinsic {intrinsic:?}]"),
        }
    }
}

/// A lexical scope: bindings plus a parent link. Functions capture scopes by
/// reference.
pub struct Scope {
    bindings: FxHashMap<String, Value>,
    parent: Option<ScopeRef>,
}

pub type ScopeRef = Rc<RefCell<Scope>>;

impl Scope {
    pub fn root() -> ScopeRef {
        Rc::new(RefCell::new(Scope {
            bindings: FxHashMap::default(),
            parent: None,
        }))
    }

    pub fn child(parent: &ScopeRef) -> ScopeRef {
        Rc::new(RefCell::new(Scope {
            bindings: FxHashMap::default(),
            parent: Some(Rc::clone(parent)),
        }))
    }

    pub fn define(scope: &ScopeRef, name: impl Into<String>, value: Value) {
        scope.borrow_mut().bindings.insert(name.into(), value);
    }

    pub fn lookup(scope: &ScopeRef, name: &str) -> Option<Value> {
        let borrowed = scope.borrow();
        if let Some(value) = borrowed.bindings.get(name) {
            return Some(value.clone());
        }
        let parent = borrowed.parent.clone()?;
        drop(borrowed);
        Scope::lookup(&parent, name)
    }

    /// Assign to an existing binding somewhere on the chain; undeclared names
    /// land on the outermost (module) scope, matching sloppy-mode semantics.
    pub fn assign(scope: &ScopeRef, name: &str, value: Value) {
        let mut current = Rc::clone(scope);
        loop {
            let parent = {
                let mut borrowed = current.borrow_mut();
                if borrowed.bindings.contains_key(name) {
                    borrowed.bindings.insert(name.to_string(), value);
                    return;
                }
                match &borrowed.parent {
                    Some(parent) => Rc::clone(parent),
                    None => {
                        borrowed.bindings.insert(name.to_string(), value);
                        return;
                    }
                }
            };
            current = parent;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_identity_is_shared() {
        let a = Value::object();
        let b = a.clone();
        b.set("x", Value::Number(1.0));
        assert_eq!(a.get("x").unwrap().as_number(), Some(1.0));
        assert!(a.strict_eq(&b));
        assert!(!a.strict_eq(&Value::object()));
    }

    #[test]
    fn scope_assignment_walks_the_chain() {
        let root = Scope::root();
        Scope::define(&root, "x", Value::Number(1.0));
        let inner = Scope::child(&root);
        Scope::assign(&inner, "x", Value::Number(2.0));
        assert_eq!(Scope::lookup(&root, "x").unwrap().as_number(), Some(2.0));

        // Undeclared assignment lands on the root.
        Scope::assign(&inner, "y", Value::Number(3.0));
        assert_eq!(Scope::lookup(&root, "y").unwrap().as_number(), Some(3.0));
    }

    #[test]
    fn json_conversion_roundtrip() {
        let json = serde_json::json!({"a": 1.0, "list": [true, "s"], "nested": {"n": null}});
        let value = Value::from_json(&json);
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::string("").is_truthy());
        assert!(Value::string("0").is_truthy());
        assert!(Value::object().is_truthy());
    }
}
