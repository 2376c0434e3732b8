//! The middle-end: a flat three-address intermediate representation sitting
//! between the AST and the bytecode code generator.

pub mod ir;

pub use ir::*;
