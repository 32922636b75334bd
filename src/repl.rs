//! Interactive read-compile-execute-print loop.
//!
//! Grounded on `original_source/relp/relp.go` for the session shape
//! (prompt, `exit` sentinel, line-at-a-time reading) and on
//! navicore-cem3's rustyline-based terminal front end for line editing.
//! Unlike the original, compiled input runs on a persistent `Compiler` +
//! `Vm` pair so `let` bindings and the constant pool survive across
//! lines (spec.md §4.7).

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::compiler::Compiler;
use crate::lexer::Lexer;
use crate::parser::{ParseError, Parser};
use crate::symbol_table::SymbolTable;
use crate::vm::Vm;

const PROMPT: &str = ">> ";

pub fn start() -> rustyline::Result<()> {
    println!("Hello! This is the Monkey console.");
    println!("console...");

    let mut editor = DefaultEditor::new()?;
    let mut symbol_table = SymbolTable::new();
    for (index, builtin) in crate::builtins::BUILTINS.iter().enumerate() {
        symbol_table.define_builtin(index, builtin.name);
    }
    let mut constants = Vec::new();
    let mut globals: Vec<crate::object::Value> =
        (0..crate::vm::GLOBALS_SIZE).map(|_| crate::object::Value::Null).collect();

    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if trimmed == "exit" {
                    println!("bye!");
                    return Ok(());
                }
                let _ = editor.add_history_entry(trimmed);

                let mut parser = Parser::new(Lexer::new(trimmed));
                let program = parser.parse_program();
                if !parser.errors().is_empty() {
                    print_parse_errors(parser.errors());
                    continue;
                }

                let mut compiler = Compiler::new_with_state(
                    std::mem::take(&mut symbol_table),
                    std::mem::take(&mut constants),
                );
                if let Err(err) = compiler.compile_program(&program) {
                    println!("Woops! Compilation failed:\n\t{}", err);
                    let (restored_table, restored_constants) = compiler.into_state();
                    symbol_table = restored_table;
                    constants = restored_constants;
                    continue;
                }

                let bytecode = compiler.bytecode();
                let mut vm = Vm::new_with_globals_store(bytecode, std::mem::take(&mut globals));
                let run_result = vm.run();
                globals = std::mem::take(&mut vm.globals);

                let (restored_table, restored_constants) = compiler.into_state();
                symbol_table = restored_table;
                constants = restored_constants;

                match run_result {
                    Ok(()) => println!("{}", vm.last_popped_stack_elem().inspect()),
                    Err(err) => println!("Woops! Executing bytecode failed:\n\t{}", err),
                }
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => return Ok(()),
            Err(err) => return Err(err),
        }
    }
}

fn print_parse_errors(errors: &[ParseError]) {
    println!("Woops! We ran into some monkey business here!");
    println!(" parser errors:");
    for err in errors {
        println!("\t{}", err);
    }
}
