pub mod diagnostic;

use std::borrow::Cow;
use std::error::Error;
use std::fmt;

pub use diagnostic::{Diagnostic, Location, Severity};

pub type Result<T, E = SiftError> = std::result::Result<T, E>;

/// Broad category of an error.
///
/// Callers branch on this instead of matching message text, e.g. to retry on
/// execution failures but not on cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unrecognized characters, malformed literals.
    Lexical,
    /// Unexpected or missing tokens. Always carries diagnostics.
    Syntax,
    /// Unknown tables/columns/functions, ambiguous references, type mismatches.
    Semantic,
    /// Failures while running a compiled query.
    Execution,
    /// The run was cancelled through its token.
    Cancelled,
    /// Anything else, including bugs.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Lexical => "lexical error",
            Self::Syntax => "syntax error",
            Self::Semantic => "semantic error",
            Self::Execution => "execution error",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal error",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug)]
pub struct SiftError {
    inner: Box<SiftErrorInner>,
}

#[derive(Debug)]
struct SiftErrorInner {
    kind: ErrorKind,
    msg: String,
    fields: Vec<ErrorField>,
    diagnostics: Vec<Diagnostic>,
    source: Option<Box<dyn Error + Send + Sync>>,
}

#[derive(Debug)]
struct ErrorField {
    key: Cow<'static, str>,
    value: String,
}

impl SiftError {
    /// Create a new internal error.
    pub fn new(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Internal, msg)
    }

    pub fn with_kind(kind: ErrorKind, msg: impl Into<String>) -> Self {
        SiftError {
            inner: Box::new(SiftErrorInner {
                kind,
                msg: msg.into(),
                fields: Vec::new(),
                diagnostics: Vec::new(),
                source: None,
            }),
        }
    }

    pub fn semantic(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Semantic, msg)
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Execution, msg)
    }

    pub fn cancelled() -> Self {
        Self::with_kind(ErrorKind::Cancelled, "Query cancelled")
    }

    /// Create a syntax error from a set of diagnostics collected during a
    /// compile.
    pub fn syntax(diagnostics: Vec<Diagnostic>) -> Self {
        let msg = match diagnostics.len() {
            0 => "Failed to parse query".to_string(),
            1 => diagnostics[0].message.clone(),
            n => format!("{} (and {} more)", diagnostics[0].message, n - 1),
        };
        let mut err = Self::with_kind(ErrorKind::Syntax, msg);
        err.inner.diagnostics = diagnostics;
        err
    }

    /// Attach a key/value pair to the error for additional context.
    pub fn with_field<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<Cow<'static, str>>,
        V: fmt::Display,
    {
        self.inner.fields.push(ErrorField {
            key: key.into(),
            value: value.to_string(),
        });
        self
    }

    pub fn with_source(mut self, source: Box<dyn Error + Send + Sync>) -> Self {
        self.inner.source = Some(source);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.inner.kind
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.kind == ErrorKind::Cancelled
    }

    pub fn message(&self) -> &str {
        &self.inner.msg
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.inner.diagnostics
    }

    /// Get the value of a field previously attached with `with_field`.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.inner
            .fields
            .iter()
            .find(|f| f.key == key)
            .map(|f| f.value.as_str())
    }

    /// Returns true if a field with the given key is attached.
    pub fn has_field(&self, key: &str) -> bool {
        self.field(key).is_some()
    }
}

impl fmt::Display for SiftError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.msg)?;
        for field in &self.inner.fields {
            write!(f, "\n  {}: {}", field.key, field.value)?;
        }
        for diag in &self.inner.diagnostics {
            write!(f, "\n{diag}")?;
        }
        if let Some(source) = &self.inner.source {
            write!(f, "\nError source: {source}")?;
        }
        Ok(())
    }
}

impl Error for SiftError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<fmt::Error> for SiftError {
    fn from(value: fmt::Error) -> Self {
        SiftError::new("Format error").with_source(Box::new(value))
    }
}

impl From<std::io::Error> for SiftError {
    fn from(value: std::io::Error) -> Self {
        SiftError::new("IO error").with_source(Box::new(value))
    }
}

/// Return a "not implemented" error.
#[macro_export]
macro_rules! not_implemented {
    ($($arg:tt)+) => {{
        let msg = format!($($arg)+);
        return Err($crate::SiftError::new(format!("Not yet implemented: {msg}")));
    }};
}

pub trait ResultExt<T, E> {
    /// Wrap an error with a static context string.
    fn context(self, msg: &'static str) -> Result<T>;

    /// Wrap an error with a lazily built context string.
    fn context_fn<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T, E> for std::result::Result<T, E>
where
    E: Error + Send + Sync + 'static,
{
    fn context(self, msg: &'static str) -> Result<T> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(SiftError::new(msg).with_source(Box::new(e))),
        }
    }

    fn context_fn<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(SiftError::new(f()).with_source(Box::new(e))),
        }
    }
}

pub trait OptionExt<T> {
    /// Return an internal error if the option is None.
    fn required(self, what: &'static str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn required(self, what: &'static str) -> Result<T> {
        match self {
            Some(v) => Ok(v),
            None => Err(SiftError::new(format!("Missing required value: {what}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_are_rendered() {
        let err = SiftError::execution("Stack underflow")
            .with_field("operator", "Add")
            .with_field("required", 2)
            .with_field("actual", 1);

        assert_eq!(ErrorKind::Execution, err.kind());
        assert_eq!(Some("2"), err.field("required"));
        assert_eq!(
            "Stack underflow\n  operator: Add\n  required: 2\n  actual: 1",
            err.to_string()
        );
    }

    #[test]
    fn cancelled_is_distinguishable() {
        let err = SiftError::cancelled();
        assert!(err.is_cancelled());
        assert!(!SiftError::execution("boom").is_cancelled());
    }

    #[test]
    fn required_none() {
        let v: Option<i32> = None;
        let err = v.required("thing").unwrap_err();
        assert_eq!("Missing required value: thing", err.message());
    }

    #[test]
    fn syntax_message_counts_diagnostics() {
        let diags = vec![
            Diagnostic::error("P0001", "Expected FROM", Location::new(0, 1, 1)),
            Diagnostic::error("P0002", "Missing ')'", Location::new(5, 1, 6)),
        ];
        let err = SiftError::syntax(diags);
        assert_eq!(ErrorKind::Syntax, err.kind());
        assert_eq!("Expected FROM (and 1 more)", err.message());
        assert_eq!(2, err.diagnostics().len());
    }
}
