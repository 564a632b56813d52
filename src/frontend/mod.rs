pub mod lexer;
pub mod parser;
pub mod parser_error;
pub mod token;
pub mod token_dumper;

use crate::lang::program::Program;
use crate::KilnError;

/// Lex and parse `source` into a program.
pub fn parse_source(source: &str) -> Result<Program, KilnError> {
    let tokens = lexer::Lexer::new(source).tokenize()?;
    let program = parser::Parser::new(tokens).parse()?;
    Ok(program)
}
