//! Lowers the AST to bytecode. The compiler owns the symbol table and
//! constant pool; both survive across invocations so the REPL can keep
//! compiling against earlier lines.

use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;

use crate::ast::{Block, Expression, InfixOperator, PrefixOperator, Program, Statement};
use crate::builtins::Builtin;
use crate::bytecode::{Bytecode, CompiledFunction, Instructions, Opcode, make};
use crate::runtime::Value;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    // Worded exactly like the evaluator's runtime lookup failure so the
    // two backends report unresolved names identically.
    #[error("identifier not found: {name}")]
    UndefinedIdentifier { name: String },
    #[error("Compiler invariant violated: {message}")]
    InvariantViolation { message: &'static str },
}

type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    Global,
    Local,
    Builtin,
    Free,
    /// The name a function literal was bound to; resolves to the
    /// currently executing closure inside its own body.
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
}

/// Lexically nested name table. Resolving a name that lives in an
/// enclosing function marks it free in this table, which is what the
/// compiler later captures into a closure.
#[derive(Debug, Default)]
pub struct SymbolTable {
    outer: Option<Box<SymbolTable>>,
    store: HashMap<String, Symbol>,
    free_symbols: Vec<Symbol>,
    num_definitions: usize,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable::default()
    }

    fn enclosed(outer: SymbolTable) -> SymbolTable {
        SymbolTable {
            outer: Some(Box::new(outer)),
            ..SymbolTable::default()
        }
    }

    pub fn define(&mut self, name: &str) -> Symbol {
        let scope = if self.outer.is_none() {
            SymbolScope::Global
        } else {
            SymbolScope::Local
        };
        let symbol = Symbol {
            name: name.to_string(),
            scope,
            index: self.num_definitions,
        };
        self.num_definitions += 1;
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    pub fn define_builtin(&mut self, index: usize, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Builtin,
            index,
        };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    fn define_function_name(&mut self, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Function,
            index: 0,
        };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    fn define_free(&mut self, original: Symbol) -> Symbol {
        self.free_symbols.push(original.clone());
        let symbol = Symbol {
            name: original.name.clone(),
            scope: SymbolScope::Free,
            index: self.free_symbols.len() - 1,
        };
        self.store.insert(symbol.name.clone(), symbol.clone());
        symbol
    }

    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.store.get(name) {
            return Some(symbol.clone());
        }
        let resolved = self.outer.as_mut()?.resolve(name)?;
        match resolved.scope {
            SymbolScope::Global | SymbolScope::Builtin => Some(resolved),
            _ => Some(self.define_free(resolved)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct EmittedInstruction {
    opcode: Opcode,
    position: usize,
}

/// Per-function instruction buffer. The last two emitted instructions
/// drive the peephole rules around `Pop`.
#[derive(Debug, Default)]
struct CompilationScope {
    instructions: Instructions,
    last_instruction: Option<EmittedInstruction>,
    previous_instruction: Option<EmittedInstruction>,
}

pub struct Compiler {
    constants: Vec<Value>,
    symbol_table: SymbolTable,
    scopes: Vec<CompilationScope>,
}

impl Compiler {
    pub fn new() -> Self {
        let mut symbol_table = SymbolTable::new();
        for (index, builtin) in Builtin::ALL.iter().enumerate() {
            symbol_table.define_builtin(index, builtin.name());
        }
        Self {
            constants: Vec::new(),
            symbol_table,
            scopes: vec![CompilationScope::default()],
        }
    }

    /// Continues from an earlier compilation's symbols and constants.
    pub fn new_with_state(symbol_table: SymbolTable, constants: Vec<Value>) -> Self {
        Self {
            constants,
            symbol_table,
            scopes: vec![CompilationScope::default()],
        }
    }

    pub fn compile(&mut self, program: &Program) -> CompileResult<()> {
        for statement in &program.statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    pub fn bytecode(&self) -> Bytecode {
        Bytecode {
            instructions: self
                .scopes
                .first()
                .map(|scope| scope.instructions.clone())
                .unwrap_or_default(),
            constants: self.constants.clone(),
        }
    }

    /// Hands the symbol table and constant pool back for the next REPL
    /// line.
    pub fn into_state(mut self) -> (SymbolTable, Vec<Value>) {
        (std::mem::take(&mut self.symbol_table), self.constants)
    }

    fn compile_statement(&mut self, statement: &Statement) -> CompileResult<()> {
        match statement {
            Statement::Let { name, value } => {
                // Defined before the value compiles so the body of
                // `let f = fn() { f() }` can resolve its own name.
                let symbol = self.symbol_table.define(name);
                self.compile_expression(value)?;
                match symbol.scope {
                    SymbolScope::Global => self.emit(Opcode::SetGlobal, &[symbol.index]),
                    _ => self.emit(Opcode::SetLocal, &[symbol.index]),
                }?;
                Ok(())
            }
            Statement::Return { value } => {
                self.compile_expression(value)?;
                self.emit(Opcode::ReturnValue, &[])?;
                Ok(())
            }
            Statement::Expression { expression } => {
                self.compile_expression(expression)?;
                self.emit(Opcode::Pop, &[])?;
                Ok(())
            }
        }
    }

    fn compile_block(&mut self, block: &Block) -> CompileResult<()> {
        for statement in &block.statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    fn compile_expression(&mut self, expression: &Expression) -> CompileResult<()> {
        match expression {
            Expression::Integer(value) => {
                let constant = self.add_constant(Value::Integer(*value));
                self.emit(Opcode::Constant, &[constant])?;
            }
            Expression::Float(value) => {
                let constant = self.add_constant(Value::Float(*value));
                self.emit(Opcode::Constant, &[constant])?;
            }
            Expression::String(value) => {
                let constant = self.add_constant(Value::String(value.clone()));
                self.emit(Opcode::Constant, &[constant])?;
            }
            Expression::Boolean(true) => {
                self.emit(Opcode::True, &[])?;
            }
            Expression::Boolean(false) => {
                self.emit(Opcode::False, &[])?;
            }
            Expression::Identifier(name) => {
                let symbol = self.symbol_table.resolve(name).ok_or_else(|| {
                    CompileError::UndefinedIdentifier { name: name.clone() }
                })?;
                self.load_symbol(&symbol)?;
            }
            Expression::Prefix { operator, right } => {
                self.compile_expression(right)?;
                match operator {
                    PrefixOperator::Bang => self.emit(Opcode::Bang, &[]),
                    PrefixOperator::Minus => self.emit(Opcode::Minus, &[]),
                }?;
            }
            Expression::Infix {
                left,
                operator,
                right,
            } => {
                // `<` has no opcode: compile operands swapped and reuse
                // GreaterThan.
                if *operator == InfixOperator::Lt {
                    self.compile_expression(right)?;
                    self.compile_expression(left)?;
                    self.emit(Opcode::GreaterThan, &[])?;
                    return Ok(());
                }
                self.compile_expression(left)?;
                self.compile_expression(right)?;
                match operator {
                    InfixOperator::Plus => self.emit(Opcode::Add, &[]),
                    InfixOperator::Minus => self.emit(Opcode::Sub, &[]),
                    InfixOperator::Star => self.emit(Opcode::Mul, &[]),
                    InfixOperator::Slash => self.emit(Opcode::Div, &[]),
                    InfixOperator::Gt => self.emit(Opcode::GreaterThan, &[]),
                    InfixOperator::Eq => self.emit(Opcode::Equal, &[]),
                    InfixOperator::NotEq => self.emit(Opcode::NotEqual, &[]),
                    InfixOperator::Lt => Err(CompileError::InvariantViolation {
                        message: "less-than is compiled by operand swap",
                    }),
                }?;
            }
            Expression::If {
                condition,
                consequence,
                alternative,
            } => {
                self.compile_expression(condition)?;
                // Placeholder target, patched once the branch length is
                // known.
                let jump_not_truthy = self.emit(Opcode::JumpNotTruthy, &[9999])?;

                self.compile_block(consequence)?;
                if self.last_instruction_is(Opcode::Pop)? {
                    self.remove_last_pop()?;
                }
                let jump = self.emit(Opcode::Jump, &[9999])?;

                let after_consequence = self.current_instructions_len()?;
                self.change_operand(jump_not_truthy, after_consequence)?;

                match alternative {
                    Some(alternative) => {
                        self.compile_block(alternative)?;
                        if self.last_instruction_is(Opcode::Pop)? {
                            self.remove_last_pop()?;
                        }
                    }
                    None => {
                        self.emit(Opcode::Null, &[])?;
                    }
                }
                let after_alternative = self.current_instructions_len()?;
                self.change_operand(jump, after_alternative)?;
            }
            Expression::Array(elements) => {
                for element in elements {
                    self.compile_expression(element)?;
                }
                self.emit(Opcode::Array, &[elements.len()])?;
            }
            Expression::Hash(pairs) => {
                for (key, value) in pairs {
                    self.compile_expression(key)?;
                    self.compile_expression(value)?;
                }
                self.emit(Opcode::Hash, &[pairs.len() * 2])?;
            }
            Expression::Index { left, index } => {
                self.compile_expression(left)?;
                self.compile_expression(index)?;
                self.emit(Opcode::Index, &[])?;
            }
            Expression::Function {
                name,
                parameters,
                body,
            } => {
                self.enter_scope();
                if let Some(name) = name {
                    self.symbol_table.define_function_name(name);
                }
                for parameter in parameters {
                    self.symbol_table.define(parameter);
                }

                self.compile_block(body)?;
                if self.last_instruction_is(Opcode::Pop)? {
                    self.replace_last_pop_with_return()?;
                }
                if !self.last_instruction_is(Opcode::ReturnValue)? {
                    self.emit(Opcode::Return, &[])?;
                }

                let (instructions, free_symbols, num_locals) = self.leave_scope()?;
                for symbol in &free_symbols {
                    self.load_symbol(symbol)?;
                }
                let constant = self.add_constant(Value::CompiledFunction(Rc::new(
                    CompiledFunction {
                        instructions,
                        num_locals,
                        num_parameters: parameters.len(),
                    },
                )));
                self.emit(Opcode::Closure, &[constant, free_symbols.len()])?;
            }
            Expression::Call {
                function,
                arguments,
            } => {
                self.compile_expression(function)?;
                for argument in arguments {
                    self.compile_expression(argument)?;
                }
                self.emit(Opcode::Call, &[arguments.len()])?;
            }
        }
        Ok(())
    }

    fn load_symbol(&mut self, symbol: &Symbol) -> CompileResult<()> {
        match symbol.scope {
            SymbolScope::Global => self.emit(Opcode::GetGlobal, &[symbol.index]),
            SymbolScope::Local => self.emit(Opcode::GetLocal, &[symbol.index]),
            SymbolScope::Builtin => self.emit(Opcode::GetBuiltin, &[symbol.index]),
            SymbolScope::Free => self.emit(Opcode::GetFree, &[symbol.index]),
            SymbolScope::Function => self.emit(Opcode::CurrentClosure, &[]),
        }?;
        Ok(())
    }

    fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    fn emit(&mut self, op: Opcode, operands: &[usize]) -> CompileResult<usize> {
        let position = self.add_instruction(make(op, operands))?;
        let scope = self.current_scope_mut()?;
        scope.previous_instruction = scope.last_instruction.take();
        scope.last_instruction = Some(EmittedInstruction {
            opcode: op,
            position,
        });
        Ok(position)
    }

    fn add_instruction(&mut self, bytes: Vec<u8>) -> CompileResult<usize> {
        let scope = self.current_scope_mut()?;
        let position = scope.instructions.len();
        scope.instructions.0.extend(bytes);
        Ok(position)
    }

    fn last_instruction_is(&self, op: Opcode) -> CompileResult<bool> {
        Ok(self
            .current_scope()?
            .last_instruction
            .map(|last| last.opcode == op)
            .unwrap_or(false))
    }

    fn remove_last_pop(&mut self) -> CompileResult<()> {
        let scope = self.current_scope_mut()?;
        if let Some(last) = scope.last_instruction.take() {
            scope.instructions.0.truncate(last.position);
            scope.last_instruction = scope.previous_instruction.take();
        }
        Ok(())
    }

    fn replace_last_pop_with_return(&mut self) -> CompileResult<()> {
        let Some(last) = self.current_scope()?.last_instruction else {
            return Ok(());
        };
        self.replace_instruction(last.position, make(Opcode::ReturnValue, &[]))?;
        if let Some(last) = &mut self.current_scope_mut()?.last_instruction {
            last.opcode = Opcode::ReturnValue;
        }
        Ok(())
    }

    fn replace_instruction(&mut self, position: usize, bytes: Vec<u8>) -> CompileResult<()> {
        let instructions = &mut self.current_scope_mut()?.instructions.0;
        instructions[position..position + bytes.len()].copy_from_slice(&bytes);
        Ok(())
    }

    /// Backpatches the operand of a previously emitted jump.
    fn change_operand(&mut self, position: usize, operand: usize) -> CompileResult<()> {
        let byte = self
            .current_scope()?
            .instructions
            .0
            .get(position)
            .copied()
            .ok_or(CompileError::InvariantViolation {
                message: "jump patch position is out of range",
            })?;
        let op = Opcode::from_byte(byte).ok_or(CompileError::InvariantViolation {
            message: "jump patch target is not an opcode",
        })?;
        self.replace_instruction(position, make(op, &[operand]))
    }

    fn current_instructions_len(&self) -> CompileResult<usize> {
        Ok(self.current_scope()?.instructions.len())
    }

    fn current_scope(&self) -> CompileResult<&CompilationScope> {
        self.scopes.last().ok_or(CompileError::InvariantViolation {
            message: "compilation scope stack is empty",
        })
    }

    fn current_scope_mut(&mut self) -> CompileResult<&mut CompilationScope> {
        self.scopes
            .last_mut()
            .ok_or(CompileError::InvariantViolation {
                message: "compilation scope stack is empty",
            })
    }

    fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::default());
        let outer = std::mem::take(&mut self.symbol_table);
        self.symbol_table = SymbolTable::enclosed(outer);
    }

    fn leave_scope(&mut self) -> CompileResult<(Instructions, Vec<Symbol>, usize)> {
        let scope = self.scopes.pop().ok_or(CompileError::InvariantViolation {
            message: "left a scope that was never entered",
        })?;
        let table = std::mem::take(&mut self.symbol_table);
        let free_symbols = table.free_symbols;
        let num_locals = table.num_definitions;
        self.symbol_table = *table.outer.ok_or(CompileError::InvariantViolation {
            message: "left a scope that was never entered",
        })?;
        Ok((scope.instructions, free_symbols, num_locals))
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    /// Expected constant-pool entry; functions compare by their
    /// disassembled instruction stream.
    enum Constant {
        Int(i64),
        Float(f64),
        Str(&'static str),
        Function(Vec<Vec<u8>>),
    }

    fn concat(instructions: Vec<Vec<u8>>) -> Instructions {
        Instructions(instructions.into_iter().flatten().collect())
    }

    fn compile_source(input: &str) -> Bytecode {
        let (program, errors) = parse(input);
        assert!(errors.is_empty(), "parse errors for {input:?}: {errors:?}");
        let mut compiler = Compiler::new();
        compiler
            .compile(&program)
            .unwrap_or_else(|error| panic!("compile error for {input:?}: {error}"));
        compiler.bytecode()
    }

    fn run_compiler_tests(cases: Vec<(&str, Vec<Constant>, Vec<Vec<u8>>)>) {
        for (input, expected_constants, expected_instructions) in cases {
            let bytecode = compile_source(input);

            let expected = concat(expected_instructions);
            assert_eq!(
                bytecode.instructions, expected,
                "wrong instructions for {input:?}\nwant:\n{expected}got:\n{}",
                bytecode.instructions
            );

            assert_eq!(
                bytecode.constants.len(),
                expected_constants.len(),
                "wrong constant count for {input:?}: {:?}",
                bytecode.constants
            );
            for (index, (actual, expected)) in bytecode
                .constants
                .iter()
                .zip(&expected_constants)
                .enumerate()
            {
                match (actual, expected) {
                    (Value::Integer(actual), Constant::Int(expected)) => {
                        assert_eq!(actual, expected, "constant {index} for {input:?}");
                    }
                    (Value::Float(actual), Constant::Float(expected)) => {
                        assert_eq!(actual, expected, "constant {index} for {input:?}");
                    }
                    (Value::String(actual), Constant::Str(expected)) => {
                        assert_eq!(actual, expected, "constant {index} for {input:?}");
                    }
                    (Value::CompiledFunction(actual), Constant::Function(expected)) => {
                        let expected = concat(expected.clone());
                        assert_eq!(
                            actual.instructions, expected,
                            "constant {index} for {input:?}\nwant:\n{expected}got:\n{}",
                            actual.instructions
                        );
                    }
                    (actual, _) => panic!("constant {index} mismatch for {input:?}: {actual:?}"),
                }
            }
        }
    }

    #[test]
    fn compiles_integer_arithmetic() {
        run_compiler_tests(vec![
            (
                "1 + 2",
                vec![Constant::Int(1), Constant::Int(2)],
                vec![
                    make(Opcode::Constant, &[0]),
                    make(Opcode::Constant, &[1]),
                    make(Opcode::Add, &[]),
                    make(Opcode::Pop, &[]),
                ],
            ),
            (
                "1; 2",
                vec![Constant::Int(1), Constant::Int(2)],
                vec![
                    make(Opcode::Constant, &[0]),
                    make(Opcode::Pop, &[]),
                    make(Opcode::Constant, &[1]),
                    make(Opcode::Pop, &[]),
                ],
            ),
            (
                "1 - 2",
                vec![Constant::Int(1), Constant::Int(2)],
                vec![
                    make(Opcode::Constant, &[0]),
                    make(Opcode::Constant, &[1]),
                    make(Opcode::Sub, &[]),
                    make(Opcode::Pop, &[]),
                ],
            ),
            (
                "1 * 2",
                vec![Constant::Int(1), Constant::Int(2)],
                vec![
                    make(Opcode::Constant, &[0]),
                    make(Opcode::Constant, &[1]),
                    make(Opcode::Mul, &[]),
                    make(Opcode::Pop, &[]),
                ],
            ),
            (
                "2 / 1",
                vec![Constant::Int(2), Constant::Int(1)],
                vec![
                    make(Opcode::Constant, &[0]),
                    make(Opcode::Constant, &[1]),
                    make(Opcode::Div, &[]),
                    make(Opcode::Pop, &[]),
                ],
            ),
            (
                "-1",
                vec![Constant::Int(1)],
                vec![
                    make(Opcode::Constant, &[0]),
                    make(Opcode::Minus, &[]),
                    make(Opcode::Pop, &[]),
                ],
            ),
        ]);
    }

    #[test]
    fn compiles_float_literals() {
        run_compiler_tests(vec![(
            "1.5 + 0.25",
            vec![Constant::Float(1.5), Constant::Float(0.25)],
            vec![
                make(Opcode::Constant, &[0]),
                make(Opcode::Constant, &[1]),
                make(Opcode::Add, &[]),
                make(Opcode::Pop, &[]),
            ],
        )]);
    }

    #[test]
    fn compiles_boolean_expressions() {
        run_compiler_tests(vec![
            (
                "true",
                vec![],
                vec![make(Opcode::True, &[]), make(Opcode::Pop, &[])],
            ),
            (
                "1 > 2",
                vec![Constant::Int(1), Constant::Int(2)],
                vec![
                    make(Opcode::Constant, &[0]),
                    make(Opcode::Constant, &[1]),
                    make(Opcode::GreaterThan, &[]),
                    make(Opcode::Pop, &[]),
                ],
            ),
            // `<` swaps its operands: the constant pool shows 2 first.
            (
                "1 < 2",
                vec![Constant::Int(2), Constant::Int(1)],
                vec![
                    make(Opcode::Constant, &[0]),
                    make(Opcode::Constant, &[1]),
                    make(Opcode::GreaterThan, &[]),
                    make(Opcode::Pop, &[]),
                ],
            ),
            (
                "1 == 2",
                vec![Constant::Int(1), Constant::Int(2)],
                vec![
                    make(Opcode::Constant, &[0]),
                    make(Opcode::Constant, &[1]),
                    make(Opcode::Equal, &[]),
                    make(Opcode::Pop, &[]),
                ],
            ),
            (
                "true != false",
                vec![],
                vec![
                    make(Opcode::True, &[]),
                    make(Opcode::False, &[]),
                    make(Opcode::NotEqual, &[]),
                    make(Opcode::Pop, &[]),
                ],
            ),
            (
                "!true",
                vec![],
                vec![
                    make(Opcode::True, &[]),
                    make(Opcode::Bang, &[]),
                    make(Opcode::Pop, &[]),
                ],
            ),
        ]);
    }

    #[test]
    fn compiles_conditionals_with_patched_jumps() {
        run_compiler_tests(vec![
            (
                "if (true) { 10 }; 3333;",
                vec![Constant::Int(10), Constant::Int(3333)],
                vec![
                    // 0000
                    make(Opcode::True, &[]),
                    // 0001
                    make(Opcode::JumpNotTruthy, &[10]),
                    // 0004
                    make(Opcode::Constant, &[0]),
                    // 0007
                    make(Opcode::Jump, &[11]),
                    // 0010
                    make(Opcode::Null, &[]),
                    // 0011
                    make(Opcode::Pop, &[]),
                    // 0012
                    make(Opcode::Constant, &[1]),
                    // 0015
                    make(Opcode::Pop, &[]),
                ],
            ),
            (
                "if (true) { 10 } else { 20 }; 3333;",
                vec![Constant::Int(10), Constant::Int(20), Constant::Int(3333)],
                vec![
                    // 0000
                    make(Opcode::True, &[]),
                    // 0001
                    make(Opcode::JumpNotTruthy, &[10]),
                    // 0004
                    make(Opcode::Constant, &[0]),
                    // 0007
                    make(Opcode::Jump, &[13]),
                    // 0010
                    make(Opcode::Constant, &[1]),
                    // 0013
                    make(Opcode::Pop, &[]),
                    // 0014
                    make(Opcode::Constant, &[2]),
                    // 0017
                    make(Opcode::Pop, &[]),
                ],
            ),
        ]);
    }

    #[test]
    fn compiles_global_let_statements() {
        run_compiler_tests(vec![
            (
                "let one = 1; let two = 2;",
                vec![Constant::Int(1), Constant::Int(2)],
                vec![
                    make(Opcode::Constant, &[0]),
                    make(Opcode::SetGlobal, &[0]),
                    make(Opcode::Constant, &[1]),
                    make(Opcode::SetGlobal, &[1]),
                ],
            ),
            (
                "let one = 1; one;",
                vec![Constant::Int(1)],
                vec![
                    make(Opcode::Constant, &[0]),
                    make(Opcode::SetGlobal, &[0]),
                    make(Opcode::GetGlobal, &[0]),
                    make(Opcode::Pop, &[]),
                ],
            ),
            (
                "let one = 1; let two = one; two;",
                vec![Constant::Int(1)],
                vec![
                    make(Opcode::Constant, &[0]),
                    make(Opcode::SetGlobal, &[0]),
                    make(Opcode::GetGlobal, &[0]),
                    make(Opcode::SetGlobal, &[1]),
                    make(Opcode::GetGlobal, &[1]),
                    make(Opcode::Pop, &[]),
                ],
            ),
        ]);
    }

    #[test]
    fn compiles_string_expressions() {
        run_compiler_tests(vec![
            (
                "\"monkey\"",
                vec![Constant::Str("monkey")],
                vec![make(Opcode::Constant, &[0]), make(Opcode::Pop, &[])],
            ),
            (
                "\"mon\" + \"key\"",
                vec![Constant::Str("mon"), Constant::Str("key")],
                vec![
                    make(Opcode::Constant, &[0]),
                    make(Opcode::Constant, &[1]),
                    make(Opcode::Add, &[]),
                    make(Opcode::Pop, &[]),
                ],
            ),
        ]);
    }

    #[test]
    fn compiles_array_literals() {
        run_compiler_tests(vec![
            (
                "[]",
                vec![],
                vec![make(Opcode::Array, &[0]), make(Opcode::Pop, &[])],
            ),
            (
                "[1, 2, 3]",
                vec![Constant::Int(1), Constant::Int(2), Constant::Int(3)],
                vec![
                    make(Opcode::Constant, &[0]),
                    make(Opcode::Constant, &[1]),
                    make(Opcode::Constant, &[2]),
                    make(Opcode::Array, &[3]),
                    make(Opcode::Pop, &[]),
                ],
            ),
        ]);
    }

    #[test]
    fn compiles_hash_literals() {
        run_compiler_tests(vec![
            (
                "{}",
                vec![],
                vec![make(Opcode::Hash, &[0]), make(Opcode::Pop, &[])],
            ),
            (
                "{1: 2, 3: 4}",
                vec![
                    Constant::Int(1),
                    Constant::Int(2),
                    Constant::Int(3),
                    Constant::Int(4),
                ],
                vec![
                    make(Opcode::Constant, &[0]),
                    make(Opcode::Constant, &[1]),
                    make(Opcode::Constant, &[2]),
                    make(Opcode::Constant, &[3]),
                    make(Opcode::Hash, &[4]),
                    make(Opcode::Pop, &[]),
                ],
            ),
            (
                "{1: 2 + 3}",
                vec![Constant::Int(1), Constant::Int(2), Constant::Int(3)],
                vec![
                    make(Opcode::Constant, &[0]),
                    make(Opcode::Constant, &[1]),
                    make(Opcode::Constant, &[2]),
                    make(Opcode::Add, &[]),
                    make(Opcode::Hash, &[2]),
                    make(Opcode::Pop, &[]),
                ],
            ),
        ]);
    }

    #[test]
    fn compiles_index_expressions() {
        run_compiler_tests(vec![(
            "[1, 2][1]",
            vec![Constant::Int(1), Constant::Int(2), Constant::Int(1)],
            vec![
                make(Opcode::Constant, &[0]),
                make(Opcode::Constant, &[1]),
                make(Opcode::Array, &[2]),
                make(Opcode::Constant, &[2]),
                make(Opcode::Index, &[]),
                make(Opcode::Pop, &[]),
            ],
        )]);
    }

    #[test]
    fn compiles_functions_and_implicit_returns() {
        run_compiler_tests(vec![
            (
                "fn() { return 5 + 10 }",
                vec![
                    Constant::Int(5),
                    Constant::Int(10),
                    Constant::Function(vec![
                        make(Opcode::Constant, &[0]),
                        make(Opcode::Constant, &[1]),
                        make(Opcode::Add, &[]),
                        make(Opcode::ReturnValue, &[]),
                    ]),
                ],
                vec![make(Opcode::Closure, &[2, 0]), make(Opcode::Pop, &[])],
            ),
            (
                "fn() { 5 + 10 }",
                vec![
                    Constant::Int(5),
                    Constant::Int(10),
                    Constant::Function(vec![
                        make(Opcode::Constant, &[0]),
                        make(Opcode::Constant, &[1]),
                        make(Opcode::Add, &[]),
                        make(Opcode::ReturnValue, &[]),
                    ]),
                ],
                vec![make(Opcode::Closure, &[2, 0]), make(Opcode::Pop, &[])],
            ),
            (
                "fn() { 1; 2 }",
                vec![
                    Constant::Int(1),
                    Constant::Int(2),
                    Constant::Function(vec![
                        make(Opcode::Constant, &[0]),
                        make(Opcode::Pop, &[]),
                        make(Opcode::Constant, &[1]),
                        make(Opcode::ReturnValue, &[]),
                    ]),
                ],
                vec![make(Opcode::Closure, &[2, 0]), make(Opcode::Pop, &[])],
            ),
            (
                "fn() { }",
                vec![Constant::Function(vec![make(Opcode::Return, &[])])],
                vec![make(Opcode::Closure, &[0, 0]), make(Opcode::Pop, &[])],
            ),
        ]);
    }

    #[test]
    fn compiles_function_calls() {
        run_compiler_tests(vec![
            (
                "fn() { 24 }();",
                vec![
                    Constant::Int(24),
                    Constant::Function(vec![
                        make(Opcode::Constant, &[0]),
                        make(Opcode::ReturnValue, &[]),
                    ]),
                ],
                vec![
                    make(Opcode::Closure, &[1, 0]),
                    make(Opcode::Call, &[0]),
                    make(Opcode::Pop, &[]),
                ],
            ),
            (
                "let oneArg = fn(a) { a; }; oneArg(24);",
                vec![
                    Constant::Function(vec![
                        make(Opcode::GetLocal, &[0]),
                        make(Opcode::ReturnValue, &[]),
                    ]),
                    Constant::Int(24),
                ],
                vec![
                    make(Opcode::Closure, &[0, 0]),
                    make(Opcode::SetGlobal, &[0]),
                    make(Opcode::GetGlobal, &[0]),
                    make(Opcode::Constant, &[1]),
                    make(Opcode::Call, &[1]),
                    make(Opcode::Pop, &[]),
                ],
            ),
        ]);
    }

    #[test]
    fn compiles_let_statement_scopes() {
        run_compiler_tests(vec![
            (
                "let num = 55; fn() { num }",
                vec![
                    Constant::Int(55),
                    Constant::Function(vec![
                        make(Opcode::GetGlobal, &[0]),
                        make(Opcode::ReturnValue, &[]),
                    ]),
                ],
                vec![
                    make(Opcode::Constant, &[0]),
                    make(Opcode::SetGlobal, &[0]),
                    make(Opcode::Closure, &[1, 0]),
                    make(Opcode::Pop, &[]),
                ],
            ),
            (
                "fn() { let num = 55; num }",
                vec![
                    Constant::Int(55),
                    Constant::Function(vec![
                        make(Opcode::Constant, &[0]),
                        make(Opcode::SetLocal, &[0]),
                        make(Opcode::GetLocal, &[0]),
                        make(Opcode::ReturnValue, &[]),
                    ]),
                ],
                vec![make(Opcode::Closure, &[1, 0]), make(Opcode::Pop, &[])],
            ),
            (
                "fn() { let a = 55; let b = 77; a + b }",
                vec![
                    Constant::Int(55),
                    Constant::Int(77),
                    Constant::Function(vec![
                        make(Opcode::Constant, &[0]),
                        make(Opcode::SetLocal, &[0]),
                        make(Opcode::Constant, &[1]),
                        make(Opcode::SetLocal, &[1]),
                        make(Opcode::GetLocal, &[0]),
                        make(Opcode::GetLocal, &[1]),
                        make(Opcode::Add, &[]),
                        make(Opcode::ReturnValue, &[]),
                    ]),
                ],
                vec![make(Opcode::Closure, &[2, 0]), make(Opcode::Pop, &[])],
            ),
        ]);
    }

    #[test]
    fn compiles_builtin_references() {
        run_compiler_tests(vec![
            (
                "len([]); push([], 1);",
                vec![Constant::Int(1)],
                vec![
                    make(Opcode::GetBuiltin, &[0]),
                    make(Opcode::Array, &[0]),
                    make(Opcode::Call, &[1]),
                    make(Opcode::Pop, &[]),
                    make(Opcode::GetBuiltin, &[4]),
                    make(Opcode::Array, &[0]),
                    make(Opcode::Constant, &[0]),
                    make(Opcode::Call, &[2]),
                    make(Opcode::Pop, &[]),
                ],
            ),
            (
                "fn() { len([]) }",
                vec![Constant::Function(vec![
                    make(Opcode::GetBuiltin, &[0]),
                    make(Opcode::Array, &[0]),
                    make(Opcode::Call, &[1]),
                    make(Opcode::ReturnValue, &[]),
                ])],
                vec![make(Opcode::Closure, &[0, 0]), make(Opcode::Pop, &[])],
            ),
        ]);
    }

    #[test]
    fn compiles_closures_over_enclosing_locals() {
        run_compiler_tests(vec![
            (
                "fn(a) { fn(b) { a + b } }",
                vec![
                    Constant::Function(vec![
                        make(Opcode::GetFree, &[0]),
                        make(Opcode::GetLocal, &[0]),
                        make(Opcode::Add, &[]),
                        make(Opcode::ReturnValue, &[]),
                    ]),
                    Constant::Function(vec![
                        make(Opcode::GetLocal, &[0]),
                        make(Opcode::Closure, &[0, 1]),
                        make(Opcode::ReturnValue, &[]),
                    ]),
                ],
                vec![make(Opcode::Closure, &[1, 0]), make(Opcode::Pop, &[])],
            ),
            (
                "fn(a) { fn(b) { fn(c) { a + b + c } } }",
                vec![
                    Constant::Function(vec![
                        make(Opcode::GetFree, &[0]),
                        make(Opcode::GetFree, &[1]),
                        make(Opcode::Add, &[]),
                        make(Opcode::GetLocal, &[0]),
                        make(Opcode::Add, &[]),
                        make(Opcode::ReturnValue, &[]),
                    ]),
                    Constant::Function(vec![
                        make(Opcode::GetFree, &[0]),
                        make(Opcode::GetLocal, &[0]),
                        make(Opcode::Closure, &[0, 2]),
                        make(Opcode::ReturnValue, &[]),
                    ]),
                    Constant::Function(vec![
                        make(Opcode::GetLocal, &[0]),
                        make(Opcode::Closure, &[1, 1]),
                        make(Opcode::ReturnValue, &[]),
                    ]),
                ],
                vec![make(Opcode::Closure, &[2, 0]), make(Opcode::Pop, &[])],
            ),
        ]);
    }

    #[test]
    fn compiles_recursive_functions_with_current_closure() {
        run_compiler_tests(vec![(
            "let countDown = fn(x) { countDown(x - 1); }; countDown(1);",
            vec![
                Constant::Int(1),
                Constant::Function(vec![
                    make(Opcode::CurrentClosure, &[]),
                    make(Opcode::GetLocal, &[0]),
                    make(Opcode::Constant, &[0]),
                    make(Opcode::Sub, &[]),
                    make(Opcode::Call, &[1]),
                    make(Opcode::ReturnValue, &[]),
                ]),
                Constant::Int(1),
            ],
            vec![
                make(Opcode::Closure, &[1, 0]),
                make(Opcode::SetGlobal, &[0]),
                make(Opcode::GetGlobal, &[0]),
                make(Opcode::Constant, &[2]),
                make(Opcode::Call, &[1]),
                make(Opcode::Pop, &[]),
            ],
        )]);
    }

    #[test]
    fn undefined_identifiers_fail_compilation() {
        let (program, errors) = parse("foobar");
        assert!(errors.is_empty());
        let mut compiler = Compiler::new();
        assert_eq!(
            compiler.compile(&program),
            Err(CompileError::UndefinedIdentifier {
                name: "foobar".to_string()
            })
        );
    }

    #[test]
    fn symbol_table_resolves_through_scopes() {
        let mut global = SymbolTable::new();
        let a = global.define("a");
        assert_eq!(a.scope, SymbolScope::Global);
        assert_eq!(a.index, 0);

        let mut local = SymbolTable::enclosed(global);
        let b = local.define("b");
        assert_eq!(b.scope, SymbolScope::Local);
        assert_eq!(b.index, 0);

        assert_eq!(local.resolve("a").map(|symbol| symbol.scope), Some(SymbolScope::Global));
        assert_eq!(local.resolve("b").map(|symbol| symbol.scope), Some(SymbolScope::Local));
        assert_eq!(local.resolve("missing"), None);
    }

    #[test]
    fn symbol_table_marks_outer_locals_free() {
        let mut global = SymbolTable::new();
        global.define("a");
        let mut outer = SymbolTable::enclosed(global);
        outer.define("b");
        let mut inner = SymbolTable::enclosed(outer);
        inner.define("c");

        assert_eq!(
            inner.resolve("a").map(|symbol| symbol.scope),
            Some(SymbolScope::Global)
        );
        let b = inner.resolve("b").expect("b resolves");
        assert_eq!(b.scope, SymbolScope::Free);
        assert_eq!(b.index, 0);
        assert_eq!(inner.free_symbols.len(), 1);
    }
}
