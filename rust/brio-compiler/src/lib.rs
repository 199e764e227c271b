//! Brio Compiler
//!
//! The front end (lexer, Pratt parser) and the bytecode back end
//! (symbol table, AST → stack-machine compiler) of the Brio language.
#![warn(clippy::all)]

pub mod compiler;

pub use compiler::compile::{CompileError, Compiler, ImportLoader};
pub use compiler::lexer::Lexer;
pub use compiler::parser::{ParseError, Parser};

use brio_core::ast::Program;

/// Lex and parse a source string. Any accumulated parse error refuses the
/// program, so callers never execute a partially parsed AST.
pub fn parse_source(source: &str) -> Result<Program, Vec<ParseError>> {
    let tokens = Lexer::new(source).tokenize();
    let mut parser = Parser::new(tokens);
    let program = parser.parse_program();
    if parser.errors().is_empty() {
        Ok(program)
    } else {
        Err(parser.errors().to_vec())
    }
}
