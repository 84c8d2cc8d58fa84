//! Tree-walking execution of the parsed unit.

use std::cell::RefCell;
use std::rc::Rc;

use super::parser::{BinOp, Expr, LogOp, Stmt, UnOp};
use super::value::{Closure, ClosureBody, Intrinsic, Scope, ScopeRef, Value};
use super::{EvalError, EvalHost};

pub(crate) struct Interpreter<'h> {
    host: &'h mut dyn EvalHost,
}

/// Statement completion: sequential, or unwinding a `return`.
enum Flow {
    Normal,
    Return(Value),
}

impl<'h> Interpreter<'h> {
    pub fn new(host: &'h mut dyn EvalHost) -> Self {
        Self { host }
    }

    pub fn exec_program(&mut self, stmts: &[Stmt], scope: &ScopeRef) -> Result<(), EvalError> {
        for stmt in stmts {
            if let Flow::Return(_) = self.exec_stmt(stmt, scope)? {
                break;
            }
        }
        Ok(())
    }

    fn exec_stmts(&mut self, stmts: &[Stmt], scope: &ScopeRef) -> Result<Flow, EvalError> {
        for stmt in stmts {
            if let Flow::Return(value) = self.exec_stmt(stmt, scope)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, scope: &ScopeRef) -> Result<Flow, EvalError> {
        match stmt {
            Stmt::VarDecl { name, init } => {
                let value = match init {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::Undefined,
                };
                Scope::define(scope, name.clone(), value);
                Ok(Flow::Normal)
            }
            Stmt::Expr(expr) => {
                self.eval(expr, scope)?;
                Ok(Flow::Normal)
            }
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                if self.eval(cond, scope)?.is_truthy() {
                    self.exec_stmts(then_branch, scope)
                } else if let Some(else_branch) = else_branch {
                    self.exec_stmts(else_branch, scope)
                } else {
                    Ok(Flow::Normal)
                }
            }
            // Braces don't introduce scopes in this subset; `var` semantics.
            Stmt::Block(stmts) => self.exec_stmts(stmts, scope),
        }
    }

    fn eval(&mut self, expr: &Expr, scope: &ScopeRef) -> Result<Value, EvalError> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::string(s)),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::Ident(name) => Scope::lookup(scope, name).ok_or_else(|| EvalError::Reference {
                name: name.clone(),
            }),
            Expr::Member(object, property) => {
                let value = self.eval(object, scope)?;
                self.member_get(&value, property)
            }
            Expr::Index(object, index) => {
                let value = self.eval(object, scope)?;
                let index = self.eval(index, scope)?;
                match (&value, &index) {
                    (Value::Array(items), Value::Number(n)) => {
                        let idx = *n as usize;
                        Ok(items.borrow().get(idx).cloned().unwrap_or(Value::Undefined))
                    }
                    (_, Value::Str(key)) => self.member_get(&value, key),
                    (_, Value::Number(n)) => {
                        self.member_get(&value, &Value::Number(*n).display_string())
                    }
                    _ => Ok(Value::Undefined),
                }
            }
            Expr::Call(callee, args) => {
                let callee = self.eval(callee, scope)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, scope)?);
                }
                self.call_value(callee, values)
            }
            Expr::Assign(target, value) => {
                let value = self.eval(value, scope)?;
                self.assign(target, value.clone(), scope)?;
                Ok(value)
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval(lhs, scope)?;
                let rhs = self.eval(rhs, scope)?;
                binary_op(*op, lhs, rhs)
            }
            Expr::Logical(op, lhs, rhs) => {
                let lhs = self.eval(lhs, scope)?;
                match op {
                    LogOp::And => {
                        if lhs.is_truthy() {
                            self.eval(rhs, scope)
                        } else {
                            Ok(lhs)
                        }
                    }
                    LogOp::Or => {
                        if lhs.is_truthy() {
                            Ok(lhs)
                        } else {
                            self.eval(rhs, scope)
                        }
                    }
                }
            }
            Expr::Unary(op, operand) => {
                let value = self.eval(operand, scope)?;
                match op {
                    UnOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    UnOp::Neg => Ok(Value::Number(-to_number(&value)?)),
                }
            }
            Expr::Object(entries) => {
                let object = Value::object();
                for (key, value_expr) in entries {
                    let value = self.eval(value_expr, scope)?;
                    object.set(key.clone(), value);
                }
                Ok(object)
            }
            Expr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, scope)?);
                }
                Ok(Value::Array(Rc::new(RefCell::new(values))))
            }
            Expr::Function { params, body } => Ok(Value::Function(Rc::new(Closure {
                params: params.clone(),
                body: ClosureBody::Block(Rc::clone(body)),
                scope: Rc::clone(scope),
            }))),
            Expr::Arrow { params, body } => Ok(Value::Function(Rc::new(Closure {
                params: params.clone(),
                body: ClosureBody::Expr(Rc::clone(body)),
                scope: Rc::clone(scope),
            }))),
        }
    }

    fn assign(&mut self, target: &Expr, value: Value, scope: &ScopeRef) -> Result<(), EvalError> {
        match target {
            Expr::Ident(name) => {
                Scope::assign(scope, name, value);
                Ok(())
            }
            Expr::Member(object, property) => {
                let object = self.eval(object, scope)?;
                match &object {
                    Value::Object(_) => {
                        object.set(property.clone(), value);
                        Ok(())
                    }
                    other => Err(EvalError::Type {
                        message: format!(
                            "cannot set property '{property}' on {}",
                            other.type_name()
                        ),
                    }),
                }
            }
            Expr::Index(object, index) => {
                let object = self.eval(object, scope)?;
                let index = self.eval(index, scope)?;
                match (&object, &index) {
                    (Value::Array(items), Value::Number(n)) => {
                        let idx = *n as usize;
                        let mut items = items.borrow_mut();
                        if idx >= items.len() {
                            items.resize(idx + 1, Value::Undefined);
                        }
                        items[idx] = value;
                        Ok(())
                    }
                    (Value::Object(_), key) => {
                        object.set(key.display_string(), value);
                        Ok(())
                    }
                    (other, _) => Err(EvalError::Type {
                        message: format!("cannot index into {}", other.type_name()),
                    }),
                }
            }
            _ => Err(EvalError::Type {
                message: "invalid assignment target".into(),
            }),
        }
    }

    fn member_get(&mut self, value: &Value, property: &str) -> Result<Value, EvalError> {
        match value {
            Value::Object(map) => Ok(map.borrow().get(property).cloned().unwrap_or(Value::Undefined)),
            Value::Array(items) => match property {
                "length" => Ok(Value::Number(items.borrow().len() as f64)),
                _ => Ok(Value::Undefined),
            },
            Value::Str(s) => match property {
                "length" => Ok(Value::Number(s.chars().count() as f64)),
                _ => Ok(Value::Undefined),
            },
            Value::Undefined | Value::Null => Err(EvalError::Type {
                message: format!(
                    "cannot read property '{property}' of {}",
                    value.type_name()
                ),
            }),
            _ => Ok(Value::Undefined),
        }
    }

    pub fn call_value(&mut self, callee: Value, args: Vec<Value>) -> Result<Value, EvalError> {
        match callee {
            Value::Function(closure) => {
                let call_scope = Scope::child(&closure.scope);
                for (i, param) in closure.params.iter().enumerate() {
                    let arg = args.get(i).cloned().unwrap_or(Value::Undefined);
                    Scope::define(&call_scope, param.clone(), arg);
                }
                match &closure.body {
                    ClosureBody::Block(stmts) => match self.exec_stmts(stmts, &call_scope)? {
                        Flow::Return(value) => Ok(value),
                        Flow::Normal => Ok(Value::Undefined),
                    },
                    ClosureBody::Expr(expr) => self.eval(expr, &call_scope),
                }
            }
            Value::Intrinsic(Intrinsic::Require) => {
                let specifier = args.first().and_then(Value::as_str).ok_or_else(|| {
                    EvalError::Type {
                        message: "require expects a string specifier".into(),
                    }
                })?;
                self.host.require(&specifier)
            }
            Value::Intrinsic(Intrinsic::HotAccept) => {
                let mut path = None;
                let mut callback = None;
                for arg in &args {
                    match arg {
                        Value::Str(s) => path = Some(s.to_string()),
                        Value::Function(_) => callback = Some(arg.clone()),
                        _ => {}
                    }
                }
                self.host.hot_accept(path, callback)?;
                Ok(Value::Undefined)
            }
            other => Err(EvalError::Type {
                message: format!("{} is not a function", other.type_name()),
            }),
        }
    }
}

fn to_number(value: &Value) -> Result<f64, EvalError> {
    match value {
        Value::Number(n) => Ok(*n),
        Value::Bool(true) => Ok(1.0),
        Value::Bool(false) | Value::Null => Ok(0.0),
        Value::Undefined => Ok(f64::NAN),
        other => Err(EvalError::Type {
            message: format!("cannot convert {} to a number", other.type_name()),
        }),
    }
}

fn binary_op(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    match op {
        BinOp::Add => {
            if matches!(lhs, Value::Str(_)) || matches!(rhs, Value::Str(_)) {
                Ok(Value::string(format!(
                    "{}{}",
                    lhs.display_string(),
                    rhs.display_string()
                )))
            } else {
                Ok(Value::Number(to_number(&lhs)? + to_number(&rhs)?))
            }
        }
        BinOp::Sub => Ok(Value::Number(to_number(&lhs)? - to_number(&rhs)?)),
        BinOp::Mul => Ok(Value::Number(to_number(&lhs)? * to_number(&rhs)?)),
        BinOp::Div => Ok(Value::Number(to_number(&lhs)? / to_number(&rhs)?)),
        BinOp::Rem => Ok(Value::Number(to_number(&lhs)? % to_number(&rhs)?)),
        BinOp::EqEq => Ok(Value::Bool(lhs.loose_eq(&rhs))),
        BinOp::EqEqEq => Ok(Value::Bool(lhs.strict_eq(&rhs))),
        BinOp::NotEq => Ok(Value::Bool(!lhs.loose_eq(&rhs))),
        BinOp::NotEqEq => Ok(Value::Bool(!lhs.strict_eq(&rhs))),
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
            let result = match (&lhs, &rhs) {
                (Value::Str(a), Value::Str(b)) => compare(op, a.as_ref().cmp(b.as_ref())),
                _ => {
                    let (a, b) = (to_number(&lhs)?, to_number(&rhs)?);
                    match op {
                        BinOp::Lt => a < b,
                        BinOp::Gt => a > b,
                        BinOp::Le => a <= b,
                        BinOp::Ge => a >= b,
                        _ => unreachable!(),
                    }
                }
            };
            Ok(Value::Bool(result))
        }
    }
}

fn compare(op: BinOp, ordering: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match op {
        BinOp::Lt => ordering == Less,
        BinOp::Gt => ordering == Greater,
        BinOp::Le => ordering != Greater,
        BinOp::Ge => ordering != Less,
        _ => unreachable!(),
    }
}
