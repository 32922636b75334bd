//! Built-in functions callable from Monkey source.
//!
//! Grounded on `original_source/evaluator/builtins.go`; only `len` and
//! `puts` are carried (`first`/`last`/`rest`/`push` are not part of
//! spec.md's scope and are left out rather than invented).

use crate::object::Value;

pub struct BuiltinDef {
    pub name: &'static str,
    pub func: fn(&[Value]) -> Result<Value, String>,
}

/// Builtins in definition order; the index here is also the `Builtin`
/// scope index registered in the symbol table and the `OpGetBuiltin`
/// operand the compiler emits.
pub const BUILTINS: &[BuiltinDef] = &[
    BuiltinDef { name: "len", func: len },
    BuiltinDef { name: "puts", func: puts },
];

fn len(args: &[Value]) -> Result<Value, String> {
    if args.len() != 1 {
        return Err(format!("wrong number of arguments. got={}, want=1", args.len()));
    }
    match &args[0] {
        Value::Str(s) => Ok(Value::Integer(s.chars().count() as i64)),
        Value::Array(elements) => Ok(Value::Integer(elements.len() as i64)),
        other => Err(format!("argument to `len` not supported, got {}", other.type_name())),
    }
}

fn puts(args: &[Value]) -> Result<Value, String> {
    for arg in args {
        println!("{}", arg.inspect());
    }
    Ok(Value::Null)
}
