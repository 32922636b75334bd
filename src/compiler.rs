//! AST → bytecode compiler.
//!
//! Grounded on `original_source/compiler/compiler.go`: a stack of
//! compilation scopes (each an instruction buffer plus the last two
//! emitted instructions, for peephole rewrites) sitting on top of one
//! symbol table and one constant pool that persist for the compiler's
//! lifetime — which, in the REPL, spans many inputs.

use thiserror::Error;

use crate::ast::{BlockStatement, Expr, Program, Statement};
use crate::builtins;
use crate::code::{self, Instructions, Opcode};
use crate::object::{CompiledFunction, Value};
use crate::symbol_table::{Scope, SymbolTable};

#[derive(Debug, Error, PartialEq)]
pub enum CompileError {
    #[error("unknown operator: {0}")]
    UnknownOperator(String),
    #[error("undefined variable {0}")]
    UndefinedVariable(String),
}

#[derive(Debug, Clone, Copy)]
struct EmittedInstruction {
    opcode: Opcode,
    position: usize,
}

#[derive(Default)]
struct CompilationScope {
    instructions: Instructions,
    last_instruction: Option<EmittedInstruction>,
    previous_instruction: Option<EmittedInstruction>,
}

pub struct Bytecode<'a> {
    pub instructions: &'a Instructions,
    pub constants: &'a [Value],
}

pub struct Compiler {
    constants: Vec<Value>,
    symbol_table: SymbolTable,
    scopes: Vec<CompilationScope>,
}

impl Compiler {
    pub fn new() -> Self {
        let mut symbol_table = SymbolTable::new();
        for (index, builtin) in builtins::BUILTINS.iter().enumerate() {
            symbol_table.define_builtin(index, builtin.name);
        }
        Compiler {
            constants: Vec::new(),
            symbol_table,
            scopes: vec![CompilationScope::default()],
        }
    }

    /// Resumes a compiler with state carried over from a previous session
    /// (the REPL's persistent symbol table and constant pool).
    pub fn new_with_state(symbol_table: SymbolTable, constants: Vec<Value>) -> Self {
        Compiler {
            constants,
            symbol_table,
            scopes: vec![CompilationScope::default()],
        }
    }

    pub fn into_state(self) -> (SymbolTable, Vec<Value>) {
        (self.symbol_table, self.constants)
    }

    pub fn bytecode(&self) -> Bytecode<'_> {
        Bytecode {
            instructions: &self.current_scope().instructions,
            constants: &self.constants,
        }
    }

    pub fn compile_program(&mut self, program: &Program) -> Result<(), CompileError> {
        for stmt in &program.statements {
            self.compile_statement(stmt)?;
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &BlockStatement) -> Result<(), CompileError> {
        for stmt in &block.statements {
            self.compile_statement(stmt)?;
        }
        Ok(())
    }

    fn compile_statement(&mut self, stmt: &Statement) -> Result<(), CompileError> {
        match stmt {
            Statement::Expression(expr) => {
                self.compile_expr(expr)?;
                self.emit(Opcode::Pop, &[]);
            }
            Statement::Let { name, value } => {
                self.compile_expr(value)?;
                let symbol = self.symbol_table.define(name);
                self.emit(Opcode::SetGlobal, &[symbol.index]);
            }
            Statement::Return { value } => {
                self.compile_expr(value)?;
                self.emit(Opcode::Return, &[]);
            }
        }
        Ok(())
    }

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::IntegerLiteral(v) => {
                let idx = self.add_constant(Value::Integer(*v));
                self.emit(Opcode::Constant, &[idx]);
            }
            Expr::StringLiteral(s) => {
                let idx = self.add_constant(Value::Str(std::rc::Rc::new(s.clone())));
                self.emit(Opcode::Constant, &[idx]);
            }
            Expr::Boolean(true) => {
                self.emit(Opcode::True, &[]);
            }
            Expr::Boolean(false) => {
                self.emit(Opcode::False, &[]);
            }
            Expr::Prefix { operator, right } => {
                self.compile_expr(right)?;
                match operator.as_str() {
                    "!" => self.emit(Opcode::Bang, &[]),
                    "-" => self.emit(Opcode::Minus, &[]),
                    op => return Err(CompileError::UnknownOperator(op.to_string())),
                };
            }
            Expr::Infix { left, operator, right } => {
                if operator == "<" {
                    self.compile_expr(right)?;
                    self.compile_expr(left)?;
                    self.emit(Opcode::GreaterThan, &[]);
                    return Ok(());
                }
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                match operator.as_str() {
                    "+" => self.emit(Opcode::Add, &[]),
                    "-" => self.emit(Opcode::Sub, &[]),
                    "*" => self.emit(Opcode::Mul, &[]),
                    "/" => self.emit(Opcode::Div, &[]),
                    "==" => self.emit(Opcode::Equal, &[]),
                    "!=" => self.emit(Opcode::NotEqual, &[]),
                    ">" => self.emit(Opcode::GreaterThan, &[]),
                    op => return Err(CompileError::UnknownOperator(op.to_string())),
                };
            }
            Expr::If { condition, consequence, alternative } => {
                self.compile_expr(condition)?;
                let jump_not_truthy_pos = self.emit(Opcode::JumpNotTruthy, &[9999]);

                self.compile_block(consequence)?;
                if self.last_instruction_is(Opcode::Pop) {
                    self.remove_last_pop();
                }

                let jump_pos = self.emit(Opcode::Jump, &[9999]);

                let after_consequence_pos = self.current_scope().instructions.len();
                self.change_operand(jump_not_truthy_pos, after_consequence_pos);

                match alternative {
                    None => {
                        self.emit(Opcode::Null, &[]);
                    }
                    Some(alt) => {
                        self.compile_block(alt)?;
                        if self.last_instruction_is(Opcode::Pop) {
                            self.remove_last_pop();
                        }
                    }
                }

                let after_alternative_pos = self.current_scope().instructions.len();
                self.change_operand(jump_pos, after_alternative_pos);
            }
            Expr::Identifier(name) => match self.symbol_table.resolve(name) {
                Some(symbol) => {
                    let (opcode, index) = match symbol.scope {
                        Scope::Global => (Opcode::GetGlobal, symbol.index),
                        Scope::Builtin => (Opcode::GetBuiltin, symbol.index),
                    };
                    self.emit(opcode, &[index]);
                }
                None => return Err(CompileError::UndefinedVariable(name.clone())),
            },
            Expr::ArrayLiteral(elements) => {
                for el in elements {
                    self.compile_expr(el)?;
                }
                self.emit(Opcode::Array, &[elements.len()]);
            }
            Expr::HashLiteral(pairs) => {
                let mut sorted: Vec<&(Expr, Expr)> = pairs.iter().collect();
                sorted.sort_by_key(|(k, _)| k.to_string());
                for (key, value) in sorted.into_iter() {
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                }
                self.emit(Opcode::Hash, &[sorted.len() * 2]);
            }
            Expr::Index { left, index } => {
                self.compile_expr(left)?;
                self.compile_expr(index)?;
                self.emit(Opcode::Index, &[]);
            }
            Expr::FunctionLiteral { body, .. } => {
                self.enter_scope();

                self.compile_block(body)?;
                if self.last_instruction_is(Opcode::Pop) {
                    self.replace_last_pop_with_return();
                }
                if !self.last_instruction_is(Opcode::Return) {
                    self.emit(Opcode::Return, &[]);
                }

                let instructions = self.leave_scope();
                let func = Value::CompiledFunction(std::rc::Rc::new(CompiledFunction {
                    instructions,
                }));
                let idx = self.add_constant(func);
                self.emit(Opcode::Constant, &[idx]);
            }
            Expr::Call { function, arguments } => {
                // Arguments are not wired to the call boundary for
                // user-defined functions (spec §9 baseline (a)); a
                // builtin callee instead routes through CallBuiltin so
                // `len`/`puts` can still take real arguments.
                if let Expr::Identifier(name) = function.as_ref() {
                    if let Some(symbol) = self.symbol_table.resolve(name) {
                        if symbol.scope == Scope::Builtin {
                            let builtin_index = symbol.index;
                            for arg in arguments {
                                self.compile_expr(arg)?;
                            }
                            self.emit(Opcode::CallBuiltin, &[builtin_index, arguments.len()]);
                            return Ok(());
                        }
                    }
                }
                self.compile_expr(function)?;
                self.emit(Opcode::Call, &[]);
            }
        }
        Ok(())
    }

    fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    fn emit(&mut self, op: Opcode, operands: &[usize]) -> usize {
        let instruction = code::make(op, operands);
        let position = self.current_scope().instructions.len();
        self.current_scope_mut().instructions.extend(instruction);
        self.set_last_instruction(op, position);
        position
    }

    fn set_last_instruction(&mut self, opcode: Opcode, position: usize) {
        let scope = self.current_scope_mut();
        scope.previous_instruction = scope.last_instruction;
        scope.last_instruction = Some(EmittedInstruction { opcode, position });
    }

    fn last_instruction_is(&self, opcode: Opcode) -> bool {
        matches!(self.current_scope().last_instruction, Some(ins) if ins.opcode == opcode)
    }

    fn remove_last_pop(&mut self) {
        let scope = self.current_scope_mut();
        if let Some(last) = scope.last_instruction {
            scope.instructions.truncate(last.position);
            scope.last_instruction = scope.previous_instruction;
        }
    }

    fn replace_last_pop_with_return(&mut self) {
        let scope = self.current_scope();
        let Some(last) = scope.last_instruction else { return };
        let position = last.position;
        let new_instruction = code::make(Opcode::Return, &[]);
        self.replace_instruction(position, &new_instruction);
        let scope = self.current_scope_mut();
        scope.last_instruction = Some(EmittedInstruction { opcode: Opcode::Return, position });
    }

    fn replace_instruction(&mut self, position: usize, new_instruction: &[u8]) {
        let instructions = &mut self.current_scope_mut().instructions;
        instructions[position..position + new_instruction.len()].copy_from_slice(new_instruction);
    }

    /// Rewrites the (necessarily fixed-width, two-byte) operand of the
    /// instruction at `position`, keeping its opcode.
    fn change_operand(&mut self, position: usize, operand: usize) {
        let op = Opcode::from_byte(self.current_scope().instructions[position])
            .expect("position must point at an opcode byte");
        let new_instruction = code::make(op, &[operand]);
        self.replace_instruction(position, &new_instruction);
    }

    fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::default());
    }

    fn leave_scope(&mut self) -> Instructions {
        let scope = self.scopes.pop().expect("scope stack must not be empty");
        scope.instructions
    }

    fn current_scope(&self) -> &CompilationScope {
        self.scopes.last().expect("scope stack must not be empty")
    }

    fn current_scope_mut(&mut self) -> &mut CompilationScope {
        self.scopes.last_mut().expect("scope stack must not be empty")
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new()
    }
}
