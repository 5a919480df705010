//! Compiler for a small C-like scripting language targeting x86-64 NASM.
//!
//! The pipeline is strictly batch: [`lexer`] → [`parser`] → [`sema`] →
//! [`lower`] (three-address code, see [`ir`]) → [`codegen`]. Each phase owns
//! its scratch state and hands plain data to the next.

pub mod ast;
pub mod codegen;
pub mod error;
pub mod ir;
pub mod lexer;
pub mod lower;
pub mod parser;
pub mod sema;
pub mod span;
pub mod symbol;

use ast::Stmt;
use error::{CompileError, ErrorHandler};
use ir::IrProgram;
use lexer::Token;

/// Every intermediate product of one successful compilation.
#[derive(Debug, Clone)]
pub struct Compilation {
    pub tokens: Vec<Token>,
    pub statements: Vec<Stmt>,
    pub ir: IrProgram,
    pub assembly: String,
}

/// Run the front end only: lex, parse and check scoping.
pub fn check(src: &str) -> Result<(Vec<Token>, Vec<Stmt>), CompileError> {
    let tokens = lexer::lex(src);
    let parsed = parser::parse(&tokens);
    if parsed.has_errors() {
        return Err(CompileError::Syntax(parsed.errors));
    }

    let mut handler = ErrorHandler::new();
    sema::analyze(&parsed.statements, &mut handler);
    if handler.has_errors() {
        return Err(CompileError::Semantic(handler.into_errors()));
    }
    Ok((tokens, parsed.statements))
}

/// Compile one source string to assembly text.
pub fn compile(src: &str) -> Result<Compilation, CompileError> {
    let (tokens, statements) = check(src)?;
    let ir = lower::generate(&statements);
    let assembly = codegen::generate(&ir);
    Ok(Compilation {
        tokens,
        statements,
        ir,
        assembly,
    })
}
