//! Shared value and environment model used by both execution backends,
//! plus the operator semantics they have in common. Keeping the
//! semantics here means the evaluator and the VM cannot drift apart.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::{Block, InfixOperator, PrefixOperator};
use crate::builtins::Builtin;
use crate::bytecode::CompiledFunction;

/// A user function captured together with its defining environment.
#[derive(Debug)]
pub struct FunctionValue {
    pub parameters: Vec<String>,
    pub body: Block,
    pub env: Env,
}

/// A compiled function bundled with the values of its free variables.
#[derive(Debug)]
pub struct Closure {
    pub function: Rc<CompiledFunction>,
    pub free: Vec<Value>,
}

#[derive(Debug, Clone)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Null,
    Array(Rc<Vec<Value>>),
    /// Insertion-ordered so inspect strings are deterministic.
    Hash(Rc<IndexMap<HashKey, Value>>),
    Function(Rc<FunctionValue>),
    Builtin(Builtin),
    CompiledFunction(Rc<CompiledFunction>),
    Closure(Rc<Closure>),
    /// Evaluator-internal sentinel; unwrapped at program and call
    /// boundaries, never observable from the language.
    ReturnValue(Box<Value>),
    Error(String),
}

/// The subset of values usable as hash keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Integer(i64),
    Bool(bool),
    String(String),
}

impl HashKey {
    fn inspect(&self) -> String {
        match self {
            HashKey::Integer(value) => value.to_string(),
            HashKey::Bool(value) => value.to_string(),
            HashKey::String(value) => value.clone(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Hash(a), Value::Hash(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::CompiledFunction(a), Value::CompiledFunction(b)) => Rc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::ReturnValue(a), Value::ReturnValue(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    /// Type name as it appears in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "INTEGER",
            Value::Float(_) => "FLOAT",
            Value::Bool(_) => "BOOLEAN",
            Value::String(_) => "STRING",
            Value::Null => "NULL",
            Value::Array(_) => "ARRAY",
            Value::Hash(_) => "HASH",
            Value::Function(_) => "FUNCTION",
            Value::Builtin(_) => "BUILTIN",
            Value::CompiledFunction(_) => "COMPILED_FUNCTION",
            Value::Closure(_) => "CLOSURE",
            Value::ReturnValue(_) => "RETURN_VALUE",
            Value::Error(_) => "ERROR",
        }
    }

    /// Only `null` and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::Bool(false))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn hash_key(&self) -> Option<HashKey> {
        match self {
            Value::Integer(value) => Some(HashKey::Integer(*value)),
            Value::Bool(value) => Some(HashKey::Bool(*value)),
            Value::String(value) => Some(HashKey::String(value.clone())),
            _ => None,
        }
    }

    pub fn inspect(&self) -> String {
        match self {
            Value::Integer(value) => value.to_string(),
            // Debug formatting keeps the fractional part: `3.0`, not `3`.
            Value::Float(value) => format!("{value:?}"),
            Value::Bool(value) => value.to_string(),
            Value::String(value) => value.clone(),
            Value::Null => "NULL".to_string(),
            Value::Array(elements) => {
                let rendered = elements
                    .iter()
                    .map(Value::inspect)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("[{rendered}]")
            }
            Value::Hash(pairs) => {
                let rendered = pairs
                    .iter()
                    .map(|(key, value)| format!("{}: {}", key.inspect(), value.inspect()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{rendered}}}")
            }
            Value::Function(function) => {
                format!(
                    "fn({}) {{\n{}\n}}",
                    function.parameters.join(", "),
                    function.body
                )
            }
            Value::Builtin(builtin) => format!("builtin function {}", builtin.name()),
            Value::CompiledFunction(function) => {
                format!("CompiledFunction[{:p}]", Rc::as_ptr(function))
            }
            Value::Closure(closure) => format!("Closure[{:p}]", Rc::as_ptr(closure)),
            Value::ReturnValue(value) => value.inspect(),
            Value::Error(message) => message.clone(),
        }
    }
}

pub type Env = Rc<RefCell<Environment>>;

/// Name-to-value frame with an optional parent. Lookup walks parents;
/// writes always land in this frame. Closures hold an `Env`, so
/// recursive bindings form `Rc` cycles that live until process exit.
#[derive(Debug, Default)]
pub struct Environment {
    store: HashMap<String, Value>,
    outer: Option<Env>,
}

impl Environment {
    pub fn new() -> Env {
        Rc::new(RefCell::new(Environment::default()))
    }

    pub fn with_parent(outer: Env) -> Env {
        Rc::new(RefCell::new(Environment {
            store: HashMap::new(),
            outer: Some(outer),
        }))
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.store.get(name) {
            return Some(value.clone());
        }
        self.outer
            .as_ref()
            .and_then(|outer| outer.borrow().get(name))
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.store.insert(name.into(), value);
    }
}

pub fn apply_prefix(operator: PrefixOperator, right: &Value) -> Value {
    match operator {
        PrefixOperator::Bang => Value::Bool(!right.is_truthy()),
        PrefixOperator::Minus => match right {
            Value::Integer(value) => Value::Integer(value.wrapping_neg()),
            Value::Float(value) => Value::Float(-value),
            other => Value::Error(format!("unknown operator: -{}", other.type_name())),
        },
    }
}

/// Binary operator semantics: integers coerce to floats when mixed,
/// strings support only concatenation, `==`/`!=` fall back to
/// structural equality across the remaining combinations.
pub fn apply_infix(operator: InfixOperator, left: &Value, right: &Value) -> Value {
    match (left, right) {
        (Value::Integer(l), Value::Integer(r)) => integer_infix(operator, *l, *r),
        (Value::Integer(l), Value::Float(r)) => float_infix(operator, *l as f64, *r),
        (Value::Float(l), Value::Integer(r)) => float_infix(operator, *l, *r as f64),
        (Value::Float(l), Value::Float(r)) => float_infix(operator, *l, *r),
        (Value::String(l), Value::String(r)) => string_infix(operator, l, r),
        _ => match operator {
            InfixOperator::Eq => Value::Bool(left == right),
            InfixOperator::NotEq => Value::Bool(left != right),
            _ if left.type_name() != right.type_name() => Value::Error(format!(
                "type mismatch: {} {} {}",
                left.type_name(),
                operator,
                right.type_name()
            )),
            _ => Value::Error(format!(
                "unknown operator: {} {} {}",
                left.type_name(),
                operator,
                right.type_name()
            )),
        },
    }
}

fn integer_infix(operator: InfixOperator, left: i64, right: i64) -> Value {
    match operator {
        InfixOperator::Plus => Value::Integer(left.wrapping_add(right)),
        InfixOperator::Minus => Value::Integer(left.wrapping_sub(right)),
        InfixOperator::Star => Value::Integer(left.wrapping_mul(right)),
        InfixOperator::Slash => {
            if right == 0 {
                return Value::Error("division by zero: INTEGER / INTEGER".to_string());
            }
            Value::Integer(left.wrapping_div(right))
        }
        InfixOperator::Lt => Value::Bool(left < right),
        InfixOperator::Gt => Value::Bool(left > right),
        InfixOperator::Eq => Value::Bool(left == right),
        InfixOperator::NotEq => Value::Bool(left != right),
    }
}

fn float_infix(operator: InfixOperator, left: f64, right: f64) -> Value {
    match operator {
        InfixOperator::Plus => Value::Float(left + right),
        InfixOperator::Minus => Value::Float(left - right),
        InfixOperator::Star => Value::Float(left * right),
        InfixOperator::Slash => Value::Float(left / right),
        InfixOperator::Lt => Value::Bool(left < right),
        InfixOperator::Gt => Value::Bool(left > right),
        InfixOperator::Eq => Value::Bool(left == right),
        InfixOperator::NotEq => Value::Bool(left != right),
    }
}

fn string_infix(operator: InfixOperator, left: &str, right: &str) -> Value {
    match operator {
        InfixOperator::Plus => Value::String(format!("{left}{right}")),
        _ => Value::Error(format!("unknown operator: STRING {operator} STRING")),
    }
}

pub fn index_value(left: &Value, index: &Value) -> Value {
    match (left, index) {
        (Value::Array(elements), Value::Integer(i)) => {
            if *i < 0 || *i as usize >= elements.len() {
                Value::Null
            } else {
                elements[*i as usize].clone()
            }
        }
        (Value::Hash(pairs), key) => match key.hash_key() {
            Some(hash_key) => pairs.get(&hash_key).cloned().unwrap_or(Value::Null),
            None => Value::Error(format!("unusable as hash key: {}", key.type_name())),
        },
        (other, _) => Value::Error(format!(
            "index operator not supported: {}",
            other.type_name()
        )),
    }
}

/// Builds a hash from evaluated key/value pairs, preserving insertion
/// order; later duplicates overwrite earlier keys in place.
pub fn build_hash(pairs: Vec<(Value, Value)>) -> Value {
    let mut map = IndexMap::with_capacity(pairs.len());
    for (key, value) in pairs {
        let Some(hash_key) = key.hash_key() else {
            return Value::Error(format!("unusable as hash key: {}", key.type_name()));
        };
        map.insert(hash_key, value);
    }
    Value::Hash(Rc::new(map))
}
