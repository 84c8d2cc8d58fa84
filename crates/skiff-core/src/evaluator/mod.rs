//! The evaluator: compiles transpiled source text into an executable unit
//! and invokes it with an injected `require` plus an environment map.
//!
//! Transpiled modules are CommonJS-shaped scripts. The unit runs with the
//! standard module globals (`module`, `exports`, `require`, `process.env`);
//! after a successful invocation the compilation's exports reflect whatever
//! the unit assigned to `module.exports` or `exports`. The `require` and
//! `module.hot.accept` bindings are intrinsics dispatched to an [`EvalHost`],
//! which is how the graph manager links and re-enters evaluation.

mod interp;
mod lexer;
mod parser;
mod value;

use rustc_hash::FxHashMap;

pub use value::{ArrayRef, Intrinsic, ObjectRef, Scope, ScopeRef, Value};

use interp::Interpreter;

/// Errors raised while compiling or running a unit.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("parse error on line {line}: {message}")]
    Parse { message: String, line: u32 },

    #[error("{name} is not defined")]
    Reference { name: String },

    #[error("{message}")]
    Type { message: String },

    /// An error raised by the host while serving `require` (resolution or
    /// nested evaluation failure). Carried through so the original module
    /// tag survives the unwind.
    #[error(transparent)]
    Module(Box<crate::Error>),
}

/// The capability surface the running unit reaches the graph through.
pub trait EvalHost {
    /// Serve a `require(specifier)` call from the unit.
    fn require(&mut self, specifier: &str) -> Result<Value, EvalError>;

    /// Serve a `module.hot.accept(...)` call. `path` is absent for
    /// self-acceptance.
    fn hot_accept(&mut self, path: Option<String>, callback: Option<Value>)
    -> Result<(), EvalError>;
}

/// The cached result of evaluating one transpiled module.
#[derive(Debug, Clone)]
pub struct Compilation {
    pub exports: Value,
}

impl Compilation {
    pub fn new() -> Self {
        Self {
            exports: Value::object(),
        }
    }
}

impl Default for Compilation {
    fn default() -> Self {
        Self::new()
    }
}

/// Hot-module-replacement acceptance state of a transpiled module.
///
/// `SelfAccept` means the module accepts all updates to itself; `Accept`
/// carries the callback an external consumer registered for this module.
#[derive(Debug, Clone, Default)]
pub enum HmrMode {
    #[default]
    Off,
    SelfAccept,
    Accept(Value),
}

impl HmrMode {
    pub fn is_hot(&self) -> bool {
        !matches!(self, HmrMode::Off)
    }
}

/// Build the `module` object handed to a unit: `{ id, exports, hot }`.
pub fn make_module_object(path: &str, exports: Value) -> Value {
    let hot = Value::object();
    hot.set("accept", Value::Intrinsic(Intrinsic::HotAccept));
    let module = Value::object();
    module.set("id", Value::string(path));
    module.set("exports", exports);
    module.set("hot", hot);
    module
}

/// Compile and run one unit. Returns the final `module.exports` value.
pub fn run_module(
    code: &str,
    module_object: &Value,
    env_variables: &FxHashMap<String, String>,
    host: &mut dyn EvalHost,
) -> Result<Value, EvalError> {
    let program = parser::parse(code)?;

    let scope = Scope::root();
    Scope::define(&scope, "module", module_object.clone());
    Scope::define(
        &scope,
        "exports",
        module_object.get("exports").unwrap_or(Value::Undefined),
    );
    Scope::define(&scope, "require", Value::Intrinsic(Intrinsic::Require));

    let env = Value::object();
    for (key, val) in env_variables {
        env.set(key, Value::string(val));
    }
    let process = Value::object();
    process.set("env", env);
    Scope::define(&scope, "process", process);
    Scope::define(&scope, "global", Value::object());

    Interpreter::new(host).exec_program(&program, &scope)?;

    Ok(module_object.get("exports").unwrap_or(Value::Undefined))
}

/// Invoke a function value (e.g. a registered HMR accept callback).
pub fn call_function(
    function: &Value,
    args: Vec<Value>,
    host: &mut dyn EvalHost,
) -> Result<Value, EvalError> {
    Interpreter::new(host).call_value(function.clone(), args)
}
