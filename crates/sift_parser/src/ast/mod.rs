pub mod expr;
pub use expr::*;
pub mod from;
pub use from::*;
pub mod query;
pub use query::*;
pub mod recovery;
pub use recovery::*;
pub mod format;

use std::fmt;

/// An identifier, optionally written in bracket quotes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident {
    pub value: String,
    /// Identifier was written as `[value]`.
    pub bracketed: bool,
}

impl Ident {
    pub fn new(value: impl Into<String>) -> Self {
        Ident {
            value: value.into(),
            bracketed: false,
        }
    }

    pub fn bracketed(value: impl Into<String>) -> Self {
        Ident {
            value: value.into(),
            bracketed: true,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Case insensitive comparison against a name.
    pub fn matches(&self, name: &str) -> bool {
        self.value.eq_ignore_ascii_case(name)
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bracketed {
            write!(f, "[{}]", self.value)
        } else {
            write!(f, "{}", self.value)
        }
    }
}
