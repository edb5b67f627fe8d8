use sift_error::{Diagnostic, Location};

// Lexical
pub const UNRECOGNIZED_CHARACTER: &str = "L0001";
pub const UNTERMINATED_STRING: &str = "L0002";
pub const UNTERMINATED_BRACKET: &str = "L0003";
pub const INVALID_NUMBER: &str = "L0004";

// Syntax
pub const UNEXPECTED_TOKEN: &str = "P0001";
pub const MISSING_TOKEN: &str = "P0002";
pub const DUPLICATE_DELIMITER: &str = "P0003";
pub const UNKNOWN_KEYWORD: &str = "P0004";
pub const UNEXPECTED_EOF: &str = "P0005";
pub const MISPLACED_CLAUSE: &str = "P0006";
pub const TOO_MANY_ERRORS: &str = "P0099";

/// Append-only collection of diagnostics for a single compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticBag {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diag: Diagnostic) {
        self.diagnostics.push(diag);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.is_error())
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

/// Render the source line containing `location` with a caret under the
/// offending column.
pub fn snippet(source: &str, location: Location) -> String {
    let line = source.lines().nth(location.line.saturating_sub(1)).unwrap_or("");
    let caret_pad = " ".repeat(location.col.saturating_sub(1));
    format!("{line}\n{caret_pad}^")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_points_at_column() {
        let src = "select a\nfrom #b.c() wher x";
        let got = snippet(src, Location::new(21, 2, 13));
        assert_eq!("from #b.c() wher x\n            ^", got);
    }

    #[test]
    fn snippet_past_end() {
        let got = snippet("select", Location::new(6, 1, 7));
        assert_eq!("select\n      ^", got);
    }

    #[test]
    fn bag_counts_errors_only() {
        let mut bag = DiagnosticBag::new();
        bag.push(Diagnostic::warning(
            MISPLACED_CLAUSE,
            "misplaced",
            Location::default(),
        ));
        assert!(!bag.has_errors());
        bag.push(Diagnostic::error(
            UNEXPECTED_TOKEN,
            "unexpected",
            Location::default(),
        ));
        assert!(bag.has_errors());
        assert_eq!(1, bag.error_count());
        assert_eq!(2, bag.len());
    }
}
