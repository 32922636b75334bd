//! Runtime value model.
//!
//! Every variant is inspectable to a printable form via `inspect`. Values
//! that need cheap sharing (strings, arrays, hashes, compiled functions)
//! wrap their payload in `Rc` rather than cloning it, matching spec.md
//! §3's "uniformly reference-counted ... host" invariant.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::code::Instructions;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Str(Rc<String>),
    Boolean(bool),
    Null,
    Array(Rc<Vec<Value>>),
    Hash(Rc<HashMap<HashKey, (Value, Value)>>),
    CompiledFunction(Rc<CompiledFunction>),
    Builtin(Rc<Builtin>),
    /// Transient wrapper used only by a tree-walking evaluator; never
    /// produced by the compiler or the VM (spec.md §3).
    ReturnValue(Box<Value>),
    /// Tree-walker-only error value; never produced by the VM, which
    /// surfaces failures as `VmError` instead (spec.md §3, §7).
    Error(String),
}

#[derive(Debug, PartialEq)]
pub struct CompiledFunction {
    pub instructions: Instructions,
}

#[derive(PartialEq)]
pub struct Builtin {
    pub name: &'static str,
    pub func: fn(&[Value]) -> Result<Value, String>,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Builtin({})", self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashKeyKind {
    Integer,
    Str,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HashKey {
    pub kind: HashKeyKind,
    pub value: u64,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "INTEGER",
            Value::Str(_) => "STRING",
            Value::Boolean(_) => "BOOLEAN",
            Value::Null => "NULL",
            Value::Array(_) => "ARRAY",
            Value::Hash(_) => "HASH",
            Value::CompiledFunction(_) => "COMPILED_FUNCTION_OBJ",
            Value::Builtin(_) => "BUILTIN",
            Value::ReturnValue(_) => "RETURN_VALUE",
            Value::Error(_) => "ERROR",
        }
    }

    pub fn inspect(&self) -> String {
        match self {
            Value::Integer(v) => v.to_string(),
            Value::Str(s) => s.as_str().to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Null => "null".to_string(),
            Value::Array(elements) => {
                let rendered: Vec<String> = elements.iter().map(|e| e.inspect()).collect();
                format!("[{}]", rendered.join(", "))
            }
            Value::Hash(pairs) => {
                let mut rendered: Vec<String> = pairs
                    .values()
                    .map(|(k, v)| format!("{}: {}", k.inspect(), v.inspect()))
                    .collect();
                rendered.sort();
                format!("{{{}}}", rendered.join(", "))
            }
            Value::CompiledFunction(f) => format!("CompiledFunction[{:p}]", Rc::as_ptr(f)),
            Value::Builtin(b) => format!("builtin function {}", b.name),
            Value::ReturnValue(inner) => inner.inspect(),
            Value::Error(msg) => format!("ERROR: {}", msg),
        }
    }

    /// Every value except `False` and `Null` is truthy (spec.md glossary).
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Boolean(false) | Value::Null)
    }

    /// `HashKey` for hashable values (Integer, String, Boolean); `None`
    /// otherwise (spec.md §3).
    pub fn hash_key(&self) -> Option<HashKey> {
        match self {
            Value::Integer(v) => Some(HashKey {
                kind: HashKeyKind::Integer,
                value: *v as u64,
            }),
            Value::Boolean(b) => Some(HashKey {
                kind: HashKeyKind::Boolean,
                value: if *b { 1 } else { 0 },
            }),
            Value::Str(s) => Some(HashKey {
                kind: HashKeyKind::Str,
                value: fnv1a64(s.as_bytes()),
            }),
            _ => None,
        }
    }
}

/// 64-bit FNV-1a, used to hash string values (spec.md §3).
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_with_same_value_hash_equal() {
        assert_eq!(Value::Integer(5).hash_key(), Value::Integer(5).hash_key());
        assert_ne!(Value::Integer(5).hash_key(), Value::Integer(6).hash_key());
    }

    #[test]
    fn strings_with_same_content_hash_equal() {
        let a = Value::Str(Rc::new("hello".to_string()));
        let b = Value::Str(Rc::new("hello".to_string()));
        let c = Value::Str(Rc::new("world".to_string()));
        assert_eq!(a.hash_key(), b.hash_key());
        assert_ne!(a.hash_key(), c.hash_key());
    }

    #[test]
    fn arrays_and_hashes_are_not_hashable() {
        assert_eq!(Value::Array(Rc::new(vec![])).hash_key(), None);
        assert_eq!(Value::Hash(Rc::new(HashMap::new())).hash_key(), None);
    }

    #[test]
    fn only_false_and_null_are_falsy() {
        assert!(!Value::Boolean(false).is_truthy());
        assert!(!Value::Null.is_truthy());
        assert!(Value::Boolean(true).is_truthy());
        assert!(Value::Integer(0).is_truthy());
    }
}
