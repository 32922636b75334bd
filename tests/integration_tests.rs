//! End-to-end pipeline tests: source text through lexer, parser,
//! compiler, and VM, asserting on the final popped stack value.

use proptest::prelude::*;

use monkey::code::{self, Opcode};
use monkey::compiler::Compiler;
use monkey::lexer::Lexer;
use monkey::object::Value;
use monkey::parser::Parser;
use monkey::vm::Vm;
use std::rc::Rc;

fn run(input: &str) -> Value {
    let mut parser = Parser::new(Lexer::new(input));
    let program = parser.parse_program();
    assert!(parser.errors().is_empty(), "parse errors for {:?}: {:?}", input, parser.errors());

    let mut compiler = Compiler::new();
    compiler
        .compile_program(&program)
        .unwrap_or_else(|err| panic!("compile error for {:?}: {}", input, err));

    let bytecode = compiler.bytecode();
    let mut vm = Vm::new(bytecode);
    vm.run().unwrap_or_else(|err| panic!("vm error for {:?}: {}", input, err));
    vm.last_popped_stack_elem().clone()
}

#[test]
fn scenario_integer_addition() {
    assert_eq!(run("1 + 2"), Value::Integer(3));
}

#[test]
fn scenario_less_than_canonicalises_to_greater_than() {
    assert_eq!(run("2 < 1"), Value::Boolean(false));
}

#[test]
fn scenario_if_without_else_then_trailing_statement() {
    assert_eq!(run("if (true) { 10 }; 3333;"), Value::Integer(3333));
}

#[test]
fn scenario_if_bytecode_layout_matches_the_spec_reference() {
    let mut parser = Parser::new(Lexer::new("if (true) { 10 }; 3333;"));
    let program = parser.parse_program();
    let mut compiler = Compiler::new();
    compiler.compile_program(&program).unwrap();
    let bytecode = compiler.bytecode();

    assert_eq!(bytecode.constants, &[Value::Integer(10), Value::Integer(3333)]);

    let expected = [
        code::make(Opcode::True, &[]),
        code::make(Opcode::JumpNotTruthy, &[10]),
        code::make(Opcode::Constant, &[0]),
        code::make(Opcode::Jump, &[11]),
        code::make(Opcode::Null, &[]),
        code::make(Opcode::Pop, &[]),
        code::make(Opcode::Constant, &[1]),
        code::make(Opcode::Pop, &[]),
    ]
    .concat();
    assert_eq!(bytecode.instructions, &expected);
}

#[test]
fn scenario_let_binding_is_read_back() {
    assert_eq!(run("let a = 1; a"), Value::Integer(1));
}

#[test]
fn scenario_string_concatenation() {
    assert_eq!(run(r#""kara" + "maru""#), Value::Str(Rc::new("karamaru".to_string())));
}

#[test]
fn scenario_array_and_hash_indexing() {
    assert_eq!(run("[1, 2][0]"), Value::Integer(1));
    assert_eq!(run("[1, 2][-1]"), Value::Null);
    assert_eq!(run("{1: 2}[1]"), Value::Integer(2));
    assert_eq!(run("{1: 2}[3]"), Value::Null);
}

#[test]
fn scenario_zero_argument_function_call() {
    assert_eq!(run("fn(){ 5 + 10 }()"), Value::Integer(15));
}

#[test]
fn multiple_let_statements_each_pop_their_own_value() {
    // Every statement (let or expression) emits a trailing Pop, so the
    // last popped value always reflects the most recently executed
    // statement, not a leftover from an earlier one (spec.md §8).
    assert_eq!(run("let a = 1; let b = 2; a + b;"), Value::Integer(3));
}

proptest! {
    #[test]
    fn make_read_operands_round_trip_constant(operand in 0u16..=65535u16) {
        let instruction = code::make(Opcode::Constant, &[operand as usize]);
        let (operands, read) = code::read_operands(Opcode::Constant, &instruction[1..]);
        prop_assert_eq!(operands, vec![operand as usize]);
        prop_assert_eq!(read, 2);
    }

    #[test]
    fn make_read_operands_round_trip_call_builtin(builtin_index in 0u8..=255, num_args in 0u8..=255) {
        let instruction = code::make(Opcode::CallBuiltin, &[builtin_index as usize, num_args as usize]);
        let (operands, read) = code::read_operands(Opcode::CallBuiltin, &instruction[1..]);
        prop_assert_eq!(operands, vec![builtin_index as usize, num_args as usize]);
        prop_assert_eq!(read, 2);
    }

    #[test]
    fn integer_addition_is_commutative_under_the_vm(a in -1000i64..1000, b in -1000i64..1000) {
        let input = format!("{} + {}", a, b);
        prop_assert_eq!(run(&input), Value::Integer(a + b));
        let reversed = format!("{} + {}", b, a);
        prop_assert_eq!(run(&reversed), Value::Integer(a + b));
    }

    #[test]
    fn program_string_round_trips_through_a_second_parse(n in 0i64..1000) {
        let input = format!("let x = {}; x + 1;", n);
        let mut parser = Parser::new(Lexer::new(&input));
        let program = parser.parse_program();
        prop_assert!(parser.errors().is_empty());

        let printed = program.to_string();
        let mut reparsed = Parser::new(Lexer::new(&printed));
        let program2 = reparsed.parse_program();
        prop_assert!(reparsed.errors().is_empty());
        prop_assert_eq!(program2.to_string(), printed);
    }
}
