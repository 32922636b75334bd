//! Stack virtual machine: dispatch loop over a bytecode instruction
//! stream against a value stack, a globals array, and a frame stack.
//!
//! Grounded on `original_source/vm/vm.go`. The instruction-pointer
//! pre-increment discipline described in spec.md §4.6/§9 is preserved
//! exactly: the dispatch loop tests `ip < len(instructions) - 1`,
//! pre-increments, then dispatches, so a back-patched `ip = target - 1`
//! lands the next fetch at `target`.

use std::rc::Rc;

use thiserror::Error;

use crate::builtins;
use crate::code::{read_u16, Opcode};
use crate::compiler::Bytecode;
use crate::frame::Frame;
use crate::object::{HashKey, Value};

pub const STACK_SIZE: usize = 2048;
pub const GLOBALS_SIZE: usize = 65536;
pub const MAX_FRAMES: usize = 1024;

#[derive(Debug, Error, PartialEq)]
pub enum VmError {
    #[error("stack overflow")]
    StackOverflow,
    #[error("unsupported types for binary operation: {0} {1}")]
    UnsupportedBinaryTypes(&'static str, &'static str),
    #[error("unknown operator: {0}")]
    UnknownOperator(String),
    #[error("unsupported type for negation: {0}")]
    UnsupportedNegation(&'static str),
    #[error("unusable as hash key: {0}")]
    UnusableHashKey(&'static str),
    #[error("index operator not supported: {0}")]
    UnsupportedIndex(&'static str),
    #[error("calling non-function")]
    CallingNonFunction,
    #[error("{0}")]
    BuiltinError(String),
    #[error("global index out of bounds: {0}")]
    GlobalIndexOutOfBounds(usize),
    #[error("unknown opcode byte: {0}")]
    UnknownOpcode(u8),
}

pub struct Vm {
    constants: Vec<Value>,
    stack: Vec<Value>,
    sp: usize,
    pub globals: Vec<Value>,
    frames: Vec<Frame>,
}

impl Vm {
    pub fn new(bytecode: Bytecode<'_>) -> Self {
        let main_func = Rc::new(crate::object::CompiledFunction {
            instructions: bytecode.instructions.clone(),
        });
        Vm {
            constants: bytecode.constants.to_vec(),
            stack: (0..STACK_SIZE).map(|_| Value::Null).collect(),
            sp: 0,
            globals: (0..GLOBALS_SIZE).map(|_| Value::Null).collect(),
            frames: vec![Frame::new(main_func)],
        }
    }

    /// Resumes a VM with a globals array carried over from a previous
    /// session (the REPL's persistent state).
    pub fn new_with_globals_store(bytecode: Bytecode<'_>, globals: Vec<Value>) -> Self {
        let mut vm = Vm::new(bytecode);
        vm.globals = globals;
        vm
    }

    pub fn last_popped_stack_elem(&self) -> &Value {
        &self.stack[self.sp]
    }

    fn current_frame(&self) -> &Frame {
        self.frames.last().expect("frame stack must not be empty")
    }

    fn current_frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("frame stack must not be empty")
    }

    fn push_frame(&mut self, frame: Frame) -> Result<(), VmError> {
        if self.frames.len() >= MAX_FRAMES {
            return Err(VmError::StackOverflow);
        }
        self.frames.push(frame);
        Ok(())
    }

    fn pop_frame(&mut self) -> Frame {
        self.frames.pop().expect("frame stack must not be empty")
    }

    fn push(&mut self, value: Value) -> Result<(), VmError> {
        if self.sp >= STACK_SIZE {
            return Err(VmError::StackOverflow);
        }
        self.stack[self.sp] = value;
        self.sp += 1;
        Ok(())
    }

    /// Pops and returns the top value. The vacated slot is deliberately
    /// left as-is (not cleared) so `last_popped_stack_elem` can read it
    /// back after `sp` has moved past it (spec.md §4.6).
    fn pop(&mut self) -> Value {
        let value = self.stack[self.sp - 1].clone();
        self.sp -= 1;
        value
    }

    pub fn run(&mut self) -> Result<(), VmError> {
        while self.current_frame().ip < self.current_frame().instructions().len() as isize - 1 {
            self.current_frame_mut().ip += 1;
            let ip = self.current_frame().ip as usize;
            let ins = self.current_frame().instructions().to_vec();
            let op = Opcode::from_byte(ins[ip]).ok_or(VmError::UnknownOpcode(ins[ip]))?;

            match op {
                Opcode::Constant => {
                    let const_index = read_u16(&ins[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 2;
                    self.push(self.constants[const_index].clone())?;
                }
                Opcode::Pop => {
                    self.pop();
                }
                Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                    self.execute_binary_operation(op)?;
                }
                Opcode::True => self.push(Value::Boolean(true))?,
                Opcode::False => self.push(Value::Boolean(false))?,
                Opcode::Null => self.push(Value::Null)?,
                Opcode::Equal | Opcode::NotEqual | Opcode::GreaterThan => {
                    self.execute_comparison(op)?;
                }
                Opcode::Bang => self.execute_bang_operator()?,
                Opcode::Minus => self.execute_minus_operator()?,
                Opcode::Jump => {
                    let target = read_u16(&ins[ip + 1..]) as isize;
                    self.current_frame_mut().ip = target - 1;
                }
                Opcode::JumpNotTruthy => {
                    let target = read_u16(&ins[ip + 1..]) as isize;
                    self.current_frame_mut().ip += 2;
                    let condition = self.pop();
                    if !condition.is_truthy() {
                        self.current_frame_mut().ip = target - 1;
                    }
                }
                Opcode::SetGlobal => {
                    let index = read_u16(&ins[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 2;
                    let value = self.pop();
                    if index >= self.globals.len() {
                        return Err(VmError::GlobalIndexOutOfBounds(index));
                    }
                    self.globals[index] = value;
                }
                Opcode::GetGlobal => {
                    let index = read_u16(&ins[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 2;
                    let value = self
                        .globals
                        .get(index)
                        .ok_or(VmError::GlobalIndexOutOfBounds(index))?
                        .clone();
                    self.push(value)?;
                }
                Opcode::Array => {
                    let n = read_u16(&ins[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 2;
                    let elements = self.stack[self.sp - n..self.sp].to_vec();
                    self.sp -= n;
                    self.push(Value::Array(Rc::new(elements)))?;
                }
                Opcode::Hash => {
                    let n = read_u16(&ins[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 2;
                    let pairs = self.build_hash(self.sp - n, self.sp)?;
                    self.sp -= n;
                    self.push(Value::Hash(Rc::new(pairs)))?;
                }
                Opcode::Index => {
                    let index = self.pop();
                    let left = self.pop();
                    self.execute_index_expression(left, index)?;
                }
                Opcode::Call => {
                    // Read, don't pop: the callee stays on the caller's
                    // stack until `Return` removes it (spec.md §4.6).
                    let callee = self.stack[self.sp - 1].clone();
                    match callee {
                        Value::CompiledFunction(func) => {
                            self.push_frame(Frame::new(func))?;
                        }
                        _ => return Err(VmError::CallingNonFunction),
                    }
                    // Pre-increment at the top of the loop will land on
                    // byte 0 of the callee's instructions.
                }
                Opcode::Return => {
                    let return_value = self.pop();
                    self.pop_frame();
                    self.pop(); // the callee, left on the caller's stack by Call
                    self.push(return_value)?;
                }
                Opcode::GetBuiltin => {
                    let index = read_u16(&ins[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 2;
                    let def = &builtins::BUILTINS[index];
                    self.push(Value::Builtin(Rc::new(crate::object::Builtin {
                        name: def.name,
                        func: def.func,
                    })))?;
                }
                Opcode::CallBuiltin => {
                    let builtin_index = ins[ip + 1] as usize;
                    let num_args = ins[ip + 2] as usize;
                    self.current_frame_mut().ip += 2;
                    let args = self.stack[self.sp - num_args..self.sp].to_vec();
                    self.sp -= num_args;
                    let def = &builtins::BUILTINS[builtin_index];
                    let result = (def.func)(&args).map_err(VmError::BuiltinError)?;
                    self.push(result)?;
                }
            }
        }
        Ok(())
    }

    fn build_hash(
        &self,
        start: usize,
        end: usize,
    ) -> Result<std::collections::HashMap<HashKey, (Value, Value)>, VmError> {
        let mut pairs = std::collections::HashMap::new();
        let mut i = start;
        while i < end {
            let key = self.stack[i].clone();
            let value = self.stack[i + 1].clone();
            let hash_key = key
                .hash_key()
                .ok_or(VmError::UnusableHashKey(key.type_name()))?;
            pairs.insert(hash_key, (key, value));
            i += 2;
        }
        Ok(pairs)
    }

    fn execute_index_expression(&mut self, left: Value, index: Value) -> Result<(), VmError> {
        match (&left, &index) {
            (Value::Array(elements), Value::Integer(i)) => {
                let value = if *i < 0 || *i as usize >= elements.len() {
                    Value::Null
                } else {
                    elements[*i as usize].clone()
                };
                self.push(value)
            }
            (Value::Hash(pairs), _) => {
                let hash_key = index
                    .hash_key()
                    .ok_or(VmError::UnusableHashKey(index.type_name()))?;
                let value = pairs
                    .get(&hash_key)
                    .map(|(_, v)| v.clone())
                    .unwrap_or(Value::Null);
                self.push(value)
            }
            _ => Err(VmError::UnsupportedIndex(left.type_name())),
        }
    }

    fn execute_binary_operation(&mut self, op: Opcode) -> Result<(), VmError> {
        let right = self.pop();
        let left = self.pop();
        match (&left, &right) {
            (Value::Integer(l), Value::Integer(r)) => {
                let result = match op {
                    Opcode::Add => l + r,
                    Opcode::Sub => l - r,
                    Opcode::Mul => l * r,
                    Opcode::Div => l / r,
                    _ => unreachable!("execute_binary_operation called with non-arithmetic op"),
                };
                self.push(Value::Integer(result))
            }
            (Value::Str(l), Value::Str(r)) if op == Opcode::Add => {
                self.push(Value::Str(Rc::new(format!("{}{}", l, r))))
            }
            _ => Err(VmError::UnsupportedBinaryTypes(left.type_name(), right.type_name())),
        }
    }

    fn execute_comparison(&mut self, op: Opcode) -> Result<(), VmError> {
        let right = self.pop();
        let left = self.pop();
        match (&left, &right) {
            (Value::Integer(l), Value::Integer(r)) => {
                let result = match op {
                    Opcode::Equal => l == r,
                    Opcode::NotEqual => l != r,
                    Opcode::GreaterThan => l > r,
                    _ => unreachable!("execute_comparison called with non-comparison op"),
                };
                self.push(Value::Boolean(result))
            }
            _ => match op {
                Opcode::Equal => self.push(Value::Boolean(values_identical(&left, &right))),
                Opcode::NotEqual => self.push(Value::Boolean(!values_identical(&left, &right))),
                Opcode::GreaterThan => {
                    Err(VmError::UnknownOperator(format!(">({}, {})", left.type_name(), right.type_name())))
                }
                _ => unreachable!("execute_comparison called with non-comparison op"),
            },
        }
    }

    fn execute_bang_operator(&mut self) -> Result<(), VmError> {
        let operand = self.pop();
        let result = match operand {
            Value::Boolean(true) => Value::Boolean(false),
            Value::Boolean(false) => Value::Boolean(true),
            Value::Null => Value::Boolean(true),
            _ => Value::Boolean(false),
        };
        self.push(result)
    }

    fn execute_minus_operator(&mut self) -> Result<(), VmError> {
        let operand = self.pop();
        match operand {
            Value::Integer(v) => self.push(Value::Integer(-v)),
            other => Err(VmError::UnsupportedNegation(other.type_name())),
        }
    }
}

/// `Equal`/`NotEqual` on non-integers compare Booleans and Null by
/// identity of the shared singleton values (spec.md §4.6).
fn values_identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Boolean(x), Value::Boolean(y)) => x == y,
        (Value::Null, Value::Null) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn run_vm(input: &str) -> Value {
        let mut parser = Parser::new(Lexer::new(input));
        let program = parser.parse_program();
        assert!(parser.errors().is_empty(), "parse errors: {:?}", parser.errors());
        let mut compiler = Compiler::new();
        compiler.compile_program(&program).expect("compile error");
        let bytecode = compiler.bytecode();
        let mut vm = Vm::new(bytecode);
        vm.run().expect("vm error");
        vm.last_popped_stack_elem().clone()
    }

    #[test]
    fn integer_addition() {
        assert_eq!(run_vm("1 + 2"), Value::Integer(3));
    }

    #[test]
    fn less_than_runs_via_canonicalised_greater_than() {
        assert_eq!(run_vm("2 < 1"), Value::Boolean(false));
    }

    #[test]
    fn if_without_else_yields_the_consequence_then_continues() {
        assert_eq!(run_vm("if (true) { 10 }; 3333;"), Value::Integer(3333));
    }

    #[test]
    fn let_binding_round_trips_through_globals() {
        assert_eq!(run_vm("let a = 1; a"), Value::Integer(1));
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(
            run_vm(r#""kara" + "maru""#),
            Value::Str(Rc::new("karamaru".to_string()))
        );
    }

    #[test]
    fn array_and_hash_indexing_including_out_of_range() {
        assert_eq!(run_vm("[1, 2][0]"), Value::Integer(1));
        assert_eq!(run_vm("[1, 2][-1]"), Value::Null);
        assert_eq!(run_vm("{1: 2}[1]"), Value::Integer(2));
        assert_eq!(run_vm("{1: 2}[3]"), Value::Null);
    }

    #[test]
    fn zero_argument_function_call() {
        assert_eq!(run_vm("fn(){ 5 + 10 }()"), Value::Integer(15));
    }

    #[test]
    fn len_builtin_reports_string_and_array_length() {
        assert_eq!(run_vm(r#"len("four")"#), Value::Integer(4));
        assert_eq!(run_vm("len([1, 2, 3])"), Value::Integer(3));
    }

    #[test]
    fn calling_a_non_function_is_a_runtime_error() {
        let mut parser = Parser::new(Lexer::new("1()"));
        let program = parser.parse_program();
        let mut compiler = Compiler::new();
        // "1()" compiles fine (the callee expression just isn't an
        // identifier); the failure only surfaces at `Call` time.
        compiler.compile_program(&program).expect("compile error");
        let bytecode = compiler.bytecode();
        let mut vm = Vm::new(bytecode);
        assert_eq!(vm.run(), Err(VmError::CallingNonFunction));
    }
}
