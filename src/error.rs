//! The unified error taxonomy (spec'd in four categories: front-end, code
//! generation, runtime, and the language-level `throw`/`catch` machinery).
//!
//! Every stage's error type converts into this one so the CLI binaries can
//! report failures uniformly and choose one non-zero exit code. Follows the
//! rest of the crate in using `derive_more::Display` rather than `thiserror`
//! for error formatting.

use derive_more::Display;

use crate::common::Line;
use crate::front::lex::LexError;
use crate::front::parse::ParseError;

/// Errors raised while lowering the AST to IR or generating bytecode.
#[derive(Debug, Display)]
pub enum CodegenError {
    #[display("codegen error: label {_0:?} is never defined")]
    UndefinedLabel(crate::common::Id),
    #[display("codegen error: function {_0:?} is called but never defined")]
    UndefinedFunction(crate::common::Id),
    #[display("codegen error: too many variables in one function (limit {_0})")]
    TooManyVariables(usize),
    #[display("codegen error: too many labels (limit {_0})")]
    TooManyLabels(usize),
}

/// Errors raised by the VM's fetch-decode-execute loop.
#[derive(Debug, PartialEq, Display)]
pub enum RuntimeError {
    #[display("runtime error at line {line}: stack overflow")]
    StackOverflow { line: Line },
    #[display("runtime error at line {line}: stack underflow")]
    StackUnderflow { line: Line },
    #[display("runtime error at line {line}: division by zero")]
    DivisionByZero { line: Line },
    #[display("runtime error at line {line}: modulo by zero")]
    ModuloByZero { line: Line },
    #[display("runtime error at line {line}: invalid function index {index}")]
    InvalidFunction { line: Line, index: u32 },
    #[display("runtime error at line {line}: out of heap memory")]
    OutOfHeap { line: Line },
    #[display("runtime error at line {line}: call frame overflow")]
    FrameOverflow { line: Line },
    #[display("runtime error at line {line}: unknown opcode {opcode}")]
    UnknownOpcode { line: Line, opcode: u8 },
    #[display("runtime error at line {line}: uncaught exception: {value}")]
    UncaughtThrow { line: Line, value: crate::common::Value },
    #[display("runtime error at line {line}: instruction pointer {ip} out of range")]
    IpOutOfRange { line: Line, ip: u32 },
}

/// The top-level error a whole compile-and-run pipeline can fail with.
#[derive(Debug, Display)]
pub enum ToolchainError {
    #[display("{_0}")]
    Lex(LexError),
    #[display("{_0}")]
    Parse(ParseError),
    #[display("{_0}")]
    Codegen(CodegenError),
    #[display("{_0}")]
    Runtime(RuntimeError),
    #[display("io error: {_0}")]
    Io(std::io::Error),
}

impl From<LexError> for ToolchainError {
    fn from(e: LexError) -> Self {
        ToolchainError::Lex(e)
    }
}

impl From<ParseError> for ToolchainError {
    fn from(e: ParseError) -> Self {
        ToolchainError::Parse(e)
    }
}

impl From<CodegenError> for ToolchainError {
    fn from(e: CodegenError) -> Self {
        ToolchainError::Codegen(e)
    }
}

impl From<RuntimeError> for ToolchainError {
    fn from(e: RuntimeError) -> Self {
        ToolchainError::Runtime(e)
    }
}

impl From<std::io::Error> for ToolchainError {
    fn from(e: std::io::Error) -> Self {
        ToolchainError::Io(e)
    }
}

impl ToolchainError {
    /// The process exit code this error should produce. Every failure
    /// category maps to the same non-zero code; there's no finer-grained
    /// code-per-category scheme.
    pub fn exit_code(&self) -> i32 {
        1
    }
}
