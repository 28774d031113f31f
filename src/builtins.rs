use std::rc::Rc;

use crate::runtime::Value;

/// Native functions reachable by name from both backends. Failures are
/// reported as `Value::Error`, never as host errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Len,
    First,
    Last,
    Rest,
    Push,
    Puts,
}

impl Builtin {
    /// Table order doubles as the VM's builtin index space; do not
    /// reorder entries.
    pub const ALL: [Builtin; 6] = [
        Builtin::Len,
        Builtin::First,
        Builtin::Last,
        Builtin::Rest,
        Builtin::Push,
        Builtin::Puts,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Len => "len",
            Builtin::First => "first",
            Builtin::Last => "last",
            Builtin::Rest => "rest",
            Builtin::Push => "push",
            Builtin::Puts => "puts",
        }
    }

    pub fn lookup(name: &str) -> Option<Builtin> {
        Builtin::ALL
            .into_iter()
            .find(|builtin| builtin.name() == name)
    }

    pub fn apply(self, args: &[Value]) -> Value {
        match self {
            Builtin::Len => {
                let [arg] = args else {
                    return wrong_arity(1, args.len());
                };
                match arg {
                    Value::String(value) => Value::Integer(value.len() as i64),
                    Value::Array(elements) => Value::Integer(elements.len() as i64),
                    other => Value::Error(format!(
                        "argument to `len` not supported, got {}",
                        other.type_name()
                    )),
                }
            }
            Builtin::First => match Self::array_arg("first", args) {
                Ok(elements) => elements.first().cloned().unwrap_or(Value::Null),
                Err(error) => error,
            },
            Builtin::Last => match Self::array_arg("last", args) {
                Ok(elements) => elements.last().cloned().unwrap_or(Value::Null),
                Err(error) => error,
            },
            Builtin::Rest => match Self::array_arg("rest", args) {
                Ok(elements) => {
                    if elements.is_empty() {
                        Value::Null
                    } else {
                        Value::Array(Rc::new(elements[1..].to_vec()))
                    }
                }
                Err(error) => error,
            },
            Builtin::Push => {
                let [array, value] = args else {
                    return wrong_arity(2, args.len());
                };
                match array {
                    Value::Array(elements) => {
                        let mut pushed = elements.as_ref().clone();
                        pushed.push(value.clone());
                        Value::Array(Rc::new(pushed))
                    }
                    other => Value::Error(format!(
                        "argument to `push` must be ARRAY, got {}",
                        other.type_name()
                    )),
                }
            }
            Builtin::Puts => {
                for arg in args {
                    println!("{}", arg.inspect());
                }
                Value::Null
            }
        }
    }

    fn array_arg<'a>(name: &str, args: &'a [Value]) -> Result<&'a [Value], Value> {
        let [arg] = args else {
            return Err(wrong_arity(1, args.len()));
        };
        match arg {
            Value::Array(elements) => Ok(elements),
            other => Err(Value::Error(format!(
                "argument to `{}` must be ARRAY, got {}",
                name,
                other.type_name()
            ))),
        }
    }
}

fn wrong_arity(want: usize, got: usize) -> Value {
    Value::Error(format!("wrong number of arguments: want={want}, got={got}"))
}
