use anyhow::Result;

use crate::ast::Program;
use crate::compiler::Compiler;
use crate::evaluator;
use crate::runtime::{Environment, Value};
use crate::vm::{VM, VmError};

/// An execution strategy for a parsed program. Both backends must
/// produce the same observable value for the same program.
pub trait Backend {
    fn name(&self) -> &'static str;
    fn run(&mut self, program: &Program) -> Result<Value>;
}

/// Tree-walking backend; each run starts from a fresh environment.
pub struct Evaluator;

impl Backend for Evaluator {
    fn name(&self) -> &'static str {
        "evaluator"
    }

    fn run(&mut self, program: &Program) -> Result<Value> {
        let env = Environment::new();
        Ok(evaluator::eval(program, &env))
    }
}

/// Compile-and-run backend. Unresolved names at compile time and
/// language-level machine failures surface as `Value::Error` so results
/// line up with the evaluator; resource exhaustion stays a hard error.
pub struct Vm;

impl Backend for Vm {
    fn name(&self) -> &'static str {
        "vm"
    }

    fn run(&mut self, program: &Program) -> Result<Value> {
        let mut compiler = Compiler::new();
        if let Err(error) = compiler.compile(program) {
            return Ok(Value::Error(error.to_string()));
        }
        let mut vm = VM::new(compiler.bytecode());
        match vm.run() {
            Ok(()) => Ok(vm.last_popped()),
            Err(VmError::Runtime(message)) => Ok(Value::Error(message)),
            Err(error) => Err(error.into()),
        }
    }
}

pub fn backends() -> Vec<Box<dyn Backend>> {
    vec![Box::new(Evaluator), Box::new(Vm)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn both_backends_run_a_program() {
        let (program, errors) = parse("1 + 2");
        assert!(errors.is_empty());
        for mut backend in backends() {
            let value = backend.run(&program).expect("backend run");
            assert_eq!(value, Value::Integer(3), "backend {}", backend.name());
        }
    }

    #[test]
    fn unresolved_names_report_identically() {
        let (program, errors) = parse("foobar;");
        assert!(errors.is_empty());
        for mut backend in backends() {
            let value = backend.run(&program).expect("backend run");
            assert_eq!(
                value,
                Value::Error("identifier not found: foobar".to_string()),
                "backend {}",
                backend.name()
            );
        }
    }
}
