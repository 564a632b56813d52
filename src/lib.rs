//! Kiln: a small imperative language with a bytecode compiler, a stack VM,
//! and a tree-walking interpreter sharing the same front end.

pub mod bytecode;
pub mod frontend;
pub mod lang;
pub mod runtime;
pub mod session;

use thiserror::Error;

use crate::bytecode::bytecode_error::BytecodeError;
use crate::bytecode::compile_error::CompileErrors;
use crate::frontend::lexer::LexerError;
use crate::frontend::parser_error::ParserError;
use crate::runtime::runtime_error::RuntimeError;

pub use crate::bytecode::Bytecode;
pub use crate::bytecode::compile::Compiler;
pub use crate::frontend::parse_source;
pub use crate::lang::value::Value;
pub use crate::runtime::{Interpreter, Vm, VmConfig};
pub use crate::session::{Evaluation, Session};

#[derive(Debug, Error)]
pub enum KilnError {
    #[error("lexer error: {0}")]
    Lexer(#[from] LexerError),

    #[error("parse error: {0}")]
    Parser(#[from] ParserError),

    #[error("{0}")]
    Compile(#[from] CompileErrors),

    #[error("{0}")]
    Runtime(#[from] RuntimeError),

    /// Some statements were skipped at compile time and the rest then
    /// failed at run time.
    #[error("{compile}\n{runtime}")]
    Evaluation {
        compile: CompileErrors,
        runtime: RuntimeError,
    },

    #[error("bytecode error: {0}")]
    Bytecode(#[from] BytecodeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
