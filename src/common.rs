//! Common definitions that are shared between different parts of the compiler.

use derive_more::Display;

// Use sorted sets and maps for consistent output
pub use std::collections::{BTreeMap as Map, BTreeSet as Set};

/// Identifiers, interned so equal names share storage and compare by pointer.
pub type Id = internment::Intern<String>;

/// A 1-based source line number, threaded from the lexer through to runtime
/// error reporting so a failure can always be pinned to a line of source.
pub type Line = u32;

/// The dynamically-typed runtime value shared by the bytecode VM, the
/// constant/heap pools, and the tree-walking interpreter.
///
/// Arithmetic between an `Int` and a `Float` promotes the `Int` operand;
/// comparisons always collapse back to `Int` 0/1 regardless of the operand
/// types that produced them.
#[derive(Clone, Copy, Debug, PartialEq, Display)]
pub enum Value {
    #[display("{_0}")]
    Int(i64),
    #[display("{_0}")]
    Float(f64),
    /// Index into the VM's string pool.
    #[display("<str {_0}>")]
    Str(u32),
    /// Handle into the heap's live object table.
    #[display("<heap {_0}>")]
    Heap(u32),
    #[display("null")]
    Null,
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Null => false,
            Value::Str(_) | Value::Heap(_) => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Heap(_) => "heap",
            Value::Null => "null",
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Int(0)
    }
}
