//! Monkey command-line entry point: an interactive console by default,
//! plus file-run and pipeline-dump modes for diagnostics.

use std::env;
use std::fs;
use std::process;

use anyhow::{Context, Result};

use monkey::ast::Program;
use monkey::code;
use monkey::compiler::Compiler;
use monkey::lexer::Lexer;
use monkey::parser::Parser;
use monkey::token::Token;
use monkey::vm::Vm;

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    let result = match args.as_slice() {
        [] => monkey::repl::start().context("repl session failed"),
        _ => run_cli(&args),
    };

    if let Err(err) = result {
        eprintln!("error: {:#}", err);
        process::exit(1);
    }
}

fn run_cli(args: &[String]) -> Result<()> {
    let mut print_tokens = false;
    let mut print_ast = false;
    let mut print_bytecode = false;
    let mut path = None;

    for arg in args {
        match arg.as_str() {
            "--tokens" => print_tokens = true,
            "--ast" => print_ast = true,
            "--bytecode" => print_bytecode = true,
            other => path = Some(other.to_string()),
        }
    }

    let path = path.context("usage: monkey [--tokens|--ast|--bytecode] <file.monkey>")?;
    let source = fs::read_to_string(&path).with_context(|| format!("reading {}", path))?;

    if print_tokens {
        let mut lexer = Lexer::new(&source);
        for token in lexer.tokenize() {
            println!("{:?}", token);
            if token == Token::Eof {
                break;
            }
        }
        return Ok(());
    }

    let mut parser = Parser::new(Lexer::new(&source));
    let program: Program = parser.parse_program();
    if !parser.errors().is_empty() {
        eprintln!("Woops! We ran into some monkey business here!");
        eprintln!(" parser errors:");
        for err in parser.errors() {
            eprintln!("\t{}", err);
        }
        process::exit(1);
    }

    if print_ast {
        println!("{}", program);
        return Ok(());
    }

    let mut compiler = Compiler::new();
    compiler.compile_program(&program).context("compilation failed")?;
    let bytecode = compiler.bytecode();

    if print_bytecode {
        println!("{}", code::disassemble(bytecode.instructions));
        return Ok(());
    }

    let mut vm = Vm::new(bytecode);
    vm.run().context("execution failed")?;
    Ok(())
}
