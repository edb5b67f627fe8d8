//! Nodes produced by error recovery.
//!
//! These keep the rest of the tree intact after a syntax error. Anything that
//! tries to generate code from one of these must fail.

use crate::tokens::Span;

/// A fragment that couldn't be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNode {
    pub message: String,
    pub span: Span,
}

/// Something required by the grammar that wasn't written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingNode {
    /// Human readable description of what was expected, e.g. "expression".
    pub expected: String,
    pub span: Span,
}

/// Tokens thrown away during panic mode recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTokensNode {
    pub tokens: Vec<String>,
    pub span: Span,
}
