//! Tree-walking backend. Runtime failures are ordinary `Value::Error`
//! values that short-circuit every enclosing evaluation until the
//! program boundary.

use std::rc::Rc;

use crate::ast::{Block, Expression, Program, Statement};
use crate::builtins::Builtin;
use crate::runtime::{self, Env, Environment, FunctionValue, Value};

/// Evaluates a program, unwrapping `return` at the top level.
pub fn eval(program: &Program, env: &Env) -> Value {
    let mut result = Value::Null;
    for statement in &program.statements {
        result = eval_statement(statement, env);
        match result {
            Value::ReturnValue(value) => return *value,
            Value::Error(_) => return result,
            _ => {}
        }
    }
    result
}

fn eval_statement(statement: &Statement, env: &Env) -> Value {
    match statement {
        Statement::Let { name, value } => {
            let value = eval_expression(value, env);
            if value.is_error() {
                return value;
            }
            env.borrow_mut().set(name.clone(), value);
            Value::Null
        }
        Statement::Return { value } => {
            let value = eval_expression(value, env);
            if value.is_error() {
                return value;
            }
            Value::ReturnValue(Box::new(value))
        }
        Statement::Expression { expression } => eval_expression(expression, env),
    }
}

// Unlike `eval`, a block passes `ReturnValue` through untouched so the
// enclosing function call unwraps it exactly once.
fn eval_block(block: &Block, env: &Env) -> Value {
    let mut result = Value::Null;
    for statement in &block.statements {
        result = eval_statement(statement, env);
        if matches!(result, Value::ReturnValue(_) | Value::Error(_)) {
            return result;
        }
    }
    result
}

fn eval_expression(expression: &Expression, env: &Env) -> Value {
    match expression {
        Expression::Integer(value) => Value::Integer(*value),
        Expression::Float(value) => Value::Float(*value),
        Expression::Boolean(value) => Value::Bool(*value),
        Expression::String(value) => Value::String(value.clone()),
        Expression::Identifier(name) => eval_identifier(name, env),
        Expression::Array(elements) => match eval_expressions(elements, env) {
            Ok(values) => Value::Array(Rc::new(values)),
            Err(error) => error,
        },
        Expression::Hash(pairs) => eval_hash_literal(pairs, env),
        Expression::Prefix { operator, right } => {
            let right = eval_expression(right, env);
            if right.is_error() {
                return right;
            }
            runtime::apply_prefix(*operator, &right)
        }
        Expression::Infix {
            left,
            operator,
            right,
        } => {
            let left = eval_expression(left, env);
            if left.is_error() {
                return left;
            }
            let right = eval_expression(right, env);
            if right.is_error() {
                return right;
            }
            runtime::apply_infix(*operator, &left, &right)
        }
        Expression::If {
            condition,
            consequence,
            alternative,
        } => {
            let condition = eval_expression(condition, env);
            if condition.is_error() {
                return condition;
            }
            if condition.is_truthy() {
                eval_block(consequence, env)
            } else if let Some(alternative) = alternative {
                eval_block(alternative, env)
            } else {
                Value::Null
            }
        }
        Expression::Function {
            parameters, body, ..
        } => Value::Function(Rc::new(FunctionValue {
            parameters: parameters.clone(),
            body: body.clone(),
            env: Rc::clone(env),
        })),
        Expression::Call {
            function,
            arguments,
        } => {
            let function = eval_expression(function, env);
            if function.is_error() {
                return function;
            }
            match eval_expressions(arguments, env) {
                Ok(args) => apply_function(&function, &args),
                Err(error) => error,
            }
        }
        Expression::Index { left, index } => {
            let left = eval_expression(left, env);
            if left.is_error() {
                return left;
            }
            let index = eval_expression(index, env);
            if index.is_error() {
                return index;
            }
            runtime::index_value(&left, &index)
        }
    }
}

/// Left-to-right evaluation, stopping at the first error.
fn eval_expressions(expressions: &[Expression], env: &Env) -> Result<Vec<Value>, Value> {
    let mut values = Vec::with_capacity(expressions.len());
    for expression in expressions {
        let value = eval_expression(expression, env);
        if value.is_error() {
            return Err(value);
        }
        values.push(value);
    }
    Ok(values)
}

fn eval_identifier(name: &str, env: &Env) -> Value {
    if let Some(value) = env.borrow().get(name) {
        return value;
    }
    if let Some(builtin) = Builtin::lookup(name) {
        return Value::Builtin(builtin);
    }
    Value::Error(format!("identifier not found: {name}"))
}

fn eval_hash_literal(pairs: &[(Expression, Expression)], env: &Env) -> Value {
    let mut evaluated = Vec::with_capacity(pairs.len());
    for (key_expression, value_expression) in pairs {
        let key = eval_expression(key_expression, env);
        if key.is_error() {
            return key;
        }
        let value = eval_expression(value_expression, env);
        if value.is_error() {
            return value;
        }
        evaluated.push((key, value));
    }
    runtime::build_hash(evaluated)
}

fn apply_function(function: &Value, args: &[Value]) -> Value {
    match function {
        Value::Function(function) => {
            if args.len() != function.parameters.len() {
                return Value::Error(format!(
                    "wrong number of arguments: want={}, got={}",
                    function.parameters.len(),
                    args.len()
                ));
            }
            let env = Environment::with_parent(Rc::clone(&function.env));
            for (parameter, value) in function.parameters.iter().zip(args) {
                env.borrow_mut().set(parameter.clone(), value.clone());
            }
            unwrap_return_value(eval_block(&function.body, &env))
        }
        Value::Builtin(builtin) => builtin.apply(args),
        other => Value::Error(format!("not a function: {}", other.type_name())),
    }
}

fn unwrap_return_value(value: Value) -> Value {
    match value {
        Value::ReturnValue(value) => *value,
        other => other,
    }
}
