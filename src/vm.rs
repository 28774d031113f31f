//! Stack machine executing compiled bytecode. Machine-level failures
//! (exhausted stack or frame capacity, malformed streams) are hard
//! errors; language-level failures carry the same messages the
//! evaluator produces and halt the run.

use std::rc::Rc;

use thiserror::Error;

use crate::ast::{InfixOperator, PrefixOperator};
use crate::builtins::Builtin;
use crate::bytecode::{Bytecode, CompiledFunction, Opcode, read_u16};
use crate::runtime::{self, Closure, Value};

pub const STACK_SIZE: usize = 2048;
pub const GLOBALS_SIZE: usize = 65536;
pub const MAX_FRAMES: usize = 1024;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum VmError {
    #[error("stack overflow")]
    StackOverflow,
    #[error("call frames exhausted")]
    FrameOverflow,
    #[error("VM invariant violated: {message}")]
    InvariantViolation { message: &'static str },
    /// A language-level failure; the message matches what the
    /// evaluator would have produced for the same program.
    #[error("{0}")]
    Runtime(String),
}

/// One call record: the executing closure, its instruction pointer and
/// where its locals start on the value stack.
#[derive(Debug)]
struct Frame {
    closure: Rc<Closure>,
    ip: usize,
    base_pointer: usize,
}

impl Frame {
    fn new(closure: Rc<Closure>, base_pointer: usize) -> Frame {
        Frame {
            closure,
            ip: 0,
            base_pointer,
        }
    }
}

pub struct VM {
    constants: Vec<Value>,
    stack: Vec<Value>,
    sp: usize,
    globals: Vec<Value>,
    frames: Vec<Frame>,
}

impl VM {
    pub fn new(bytecode: Bytecode) -> Self {
        Self::with_globals(bytecode, vec![Value::Null; GLOBALS_SIZE])
    }

    /// Runs with an existing globals array so a REPL can keep state
    /// across lines. The array must have `GLOBALS_SIZE` slots.
    pub fn with_globals(bytecode: Bytecode, globals: Vec<Value>) -> Self {
        debug_assert_eq!(globals.len(), GLOBALS_SIZE);
        let main_function = Rc::new(CompiledFunction {
            instructions: bytecode.instructions,
            num_locals: 0,
            num_parameters: 0,
        });
        let main_closure = Rc::new(Closure {
            function: main_function,
            free: Vec::new(),
        });
        Self {
            constants: bytecode.constants,
            stack: vec![Value::Null; STACK_SIZE],
            sp: 0,
            globals,
            frames: vec![Frame::new(main_closure, 0)],
        }
    }

    pub fn into_globals(self) -> Vec<Value> {
        self.globals
    }

    /// The testing contract: the value most recently popped off the
    /// stack, which for an expression statement is its result.
    pub fn last_popped(&self) -> Value {
        self.stack[self.sp].clone()
    }

    pub fn run(&mut self) -> Result<(), VmError> {
        loop {
            let (ip, finished) = {
                let frame = self.current_frame()?;
                let len = frame.closure.function.instructions.len();
                (frame.ip, frame.ip >= len)
            };
            if finished {
                // Only the main frame can fall off the end; compiled
                // functions always return explicitly.
                break;
            }

            let byte = self.current_frame()?.closure.function.instructions.0[ip];
            let Some(op) = Opcode::from_byte(byte) else {
                return Err(VmError::Runtime(format!("unknown opcode {byte}")));
            };
            self.current_frame_mut()?.ip += 1;

            match op {
                Opcode::Constant => {
                    let index = self.read_u16_operand()?;
                    let value = self.constants.get(index).cloned().ok_or_else(|| {
                        VmError::Runtime(format!("no constant at index {index}"))
                    })?;
                    self.push(value)?;
                }
                Opcode::Pop => {
                    self.pop()?;
                }
                Opcode::Add => self.binary_operation(InfixOperator::Plus)?,
                Opcode::Sub => self.binary_operation(InfixOperator::Minus)?,
                Opcode::Mul => self.binary_operation(InfixOperator::Star)?,
                Opcode::Div => self.binary_operation(InfixOperator::Slash)?,
                Opcode::True => self.push(Value::Bool(true))?,
                Opcode::False => self.push(Value::Bool(false))?,
                Opcode::Null => self.push(Value::Null)?,
                Opcode::Equal => self.binary_operation(InfixOperator::Eq)?,
                Opcode::NotEqual => self.binary_operation(InfixOperator::NotEq)?,
                Opcode::GreaterThan => self.binary_operation(InfixOperator::Gt)?,
                Opcode::Minus => self.unary_operation(PrefixOperator::Minus)?,
                Opcode::Bang => self.unary_operation(PrefixOperator::Bang)?,
                Opcode::JumpNotTruthy => {
                    let target = self.read_u16_operand()?;
                    let condition = self.pop()?;
                    if !condition.is_truthy() {
                        self.current_frame_mut()?.ip = target;
                    }
                }
                Opcode::Jump => {
                    let target = self.read_u16_operand()?;
                    self.current_frame_mut()?.ip = target;
                }
                Opcode::SetGlobal => {
                    let index = self.read_u16_operand()?;
                    let value = self.pop()?;
                    self.globals[index] = value;
                }
                Opcode::GetGlobal => {
                    let index = self.read_u16_operand()?;
                    let value = self.globals[index].clone();
                    self.push(value)?;
                }
                Opcode::SetLocal => {
                    let index = self.read_u8_operand()?;
                    let base_pointer = self.current_frame()?.base_pointer;
                    let value = self.pop()?;
                    self.stack[base_pointer + index] = value;
                }
                Opcode::GetLocal => {
                    let index = self.read_u8_operand()?;
                    let base_pointer = self.current_frame()?.base_pointer;
                    let value = self.stack[base_pointer + index].clone();
                    self.push(value)?;
                }
                Opcode::Array => {
                    let count = self.read_u16_operand()?;
                    let elements = self.stack[self.sp - count..self.sp].to_vec();
                    self.sp -= count;
                    self.push(Value::Array(Rc::new(elements)))?;
                }
                Opcode::Hash => {
                    let count = self.read_u16_operand()?;
                    let pairs = self.stack[self.sp - count..self.sp]
                        .chunks_exact(2)
                        .map(|pair| (pair[0].clone(), pair[1].clone()))
                        .collect();
                    self.sp -= count;
                    let hash = runtime::build_hash(pairs);
                    if let Value::Error(message) = hash {
                        return Err(VmError::Runtime(message));
                    }
                    self.push(hash)?;
                }
                Opcode::Index => {
                    let index = self.pop()?;
                    let left = self.pop()?;
                    let result = runtime::index_value(&left, &index);
                    if let Value::Error(message) = result {
                        return Err(VmError::Runtime(message));
                    }
                    self.push(result)?;
                }
                Opcode::Call => {
                    let num_args = self.read_u8_operand()?;
                    self.execute_call(num_args)?;
                }
                Opcode::ReturnValue => {
                    let value = self.pop()?;
                    if self.return_from_frame(value)? {
                        return Ok(());
                    }
                }
                Opcode::Return => {
                    if self.return_from_frame(Value::Null)? {
                        return Ok(());
                    }
                }
                Opcode::GetBuiltin => {
                    let index = self.read_u8_operand()?;
                    let builtin = Builtin::ALL.get(index).copied().ok_or_else(|| {
                        VmError::Runtime(format!("no builtin at index {index}"))
                    })?;
                    self.push(Value::Builtin(builtin))?;
                }
                Opcode::Closure => {
                    let constant = self.read_u16_operand()?;
                    let num_free = self.read_u8_operand()?;
                    self.push_closure(constant, num_free)?;
                }
                Opcode::GetFree => {
                    let index = self.read_u8_operand()?;
                    let value = self.current_frame()?.closure.free[index].clone();
                    self.push(value)?;
                }
                Opcode::CurrentClosure => {
                    let closure = Rc::clone(&self.current_frame()?.closure);
                    self.push(Value::Closure(closure))?;
                }
            }
        }
        Ok(())
    }

    /// Pops the current frame and pushes `value` for the caller.
    /// Returns true when the main frame returned, which ends the run
    /// with `value` as the program result.
    fn return_from_frame(&mut self, value: Value) -> Result<bool, VmError> {
        let frame = self.frames.pop().ok_or(VmError::InvariantViolation {
            message: "no frame is executing",
        })?;
        if self.frames.is_empty() {
            self.sp = frame.base_pointer;
            self.push(value)?;
            self.pop()?;
            return Ok(true);
        }
        // Drop the locals and the callee sitting below them.
        self.sp = frame.base_pointer - 1;
        self.push(value)?;
        Ok(false)
    }

    fn execute_call(&mut self, num_args: usize) -> Result<(), VmError> {
        let callee = self.stack[self.sp - 1 - num_args].clone();
        match callee {
            Value::Closure(closure) => self.call_closure(closure, num_args),
            Value::Builtin(builtin) => self.call_builtin(builtin, num_args),
            other => Err(VmError::Runtime(format!(
                "not a function: {}",
                other.type_name()
            ))),
        }
    }

    fn call_closure(&mut self, closure: Rc<Closure>, num_args: usize) -> Result<(), VmError> {
        if num_args != closure.function.num_parameters {
            return Err(VmError::Runtime(format!(
                "wrong number of arguments: want={}, got={}",
                closure.function.num_parameters, num_args
            )));
        }
        if self.frames.len() >= MAX_FRAMES {
            return Err(VmError::FrameOverflow);
        }

        let base_pointer = self.sp - num_args;
        let frame_top = base_pointer + closure.function.num_locals;
        if frame_top >= STACK_SIZE {
            return Err(VmError::StackOverflow);
        }
        self.frames.push(Frame::new(closure, base_pointer));
        self.sp = frame_top;
        Ok(())
    }

    fn call_builtin(&mut self, builtin: Builtin, num_args: usize) -> Result<(), VmError> {
        let args = self.stack[self.sp - num_args..self.sp].to_vec();
        let result = builtin.apply(&args);
        self.sp -= num_args + 1;
        if let Value::Error(message) = result {
            return Err(VmError::Runtime(message));
        }
        self.push(result)
    }

    fn push_closure(&mut self, constant: usize, num_free: usize) -> Result<(), VmError> {
        let function = match self.constants.get(constant) {
            Some(Value::CompiledFunction(function)) => Rc::clone(function),
            other => {
                return Err(VmError::Runtime(format!(
                    "not a function constant at index {constant}: {other:?}"
                )));
            }
        };
        let free = self.stack[self.sp - num_free..self.sp].to_vec();
        self.sp -= num_free;
        self.push(Value::Closure(Rc::new(Closure { function, free })))
    }

    fn binary_operation(&mut self, operator: InfixOperator) -> Result<(), VmError> {
        let right = self.pop()?;
        let left = self.pop()?;
        let result = runtime::apply_infix(operator, &left, &right);
        if let Value::Error(message) = result {
            return Err(VmError::Runtime(message));
        }
        self.push(result)
    }

    fn unary_operation(&mut self, operator: PrefixOperator) -> Result<(), VmError> {
        let right = self.pop()?;
        let result = runtime::apply_prefix(operator, &right);
        if let Value::Error(message) = result {
            return Err(VmError::Runtime(message));
        }
        self.push(result)
    }

    fn push(&mut self, value: Value) -> Result<(), VmError> {
        if self.sp >= STACK_SIZE {
            return Err(VmError::StackOverflow);
        }
        self.stack[self.sp] = value;
        self.sp += 1;
        Ok(())
    }

    // Popped slots keep their value so `last_popped` can read them.
    fn pop(&mut self) -> Result<Value, VmError> {
        if self.sp == 0 {
            return Err(VmError::Runtime("stack underflow".to_string()));
        }
        self.sp -= 1;
        Ok(self.stack[self.sp].clone())
    }

    fn read_u16_operand(&mut self) -> Result<usize, VmError> {
        let frame = self.current_frame_mut()?;
        let value = read_u16(&frame.closure.function.instructions.0[frame.ip..]) as usize;
        frame.ip += 2;
        Ok(value)
    }

    fn read_u8_operand(&mut self) -> Result<usize, VmError> {
        let frame = self.current_frame_mut()?;
        let value = frame.closure.function.instructions.0[frame.ip] as usize;
        frame.ip += 1;
        Ok(value)
    }

    fn current_frame(&self) -> Result<&Frame, VmError> {
        self.frames.last().ok_or(VmError::InvariantViolation {
            message: "no frame is executing",
        })
    }

    fn current_frame_mut(&mut self) -> Result<&mut Frame, VmError> {
        self.frames.last_mut().ok_or(VmError::InvariantViolation {
            message: "no frame is executing",
        })
    }
}
