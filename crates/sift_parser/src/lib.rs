//! Lexer, AST and parser for the sift query language.
pub mod ast;
pub mod datatype;
pub mod diagnostics;
pub mod escape;
pub mod keywords;
pub mod parser;
pub mod tokens;

pub use parser::{ParseOutput, Parser, parse};
