//! Compile errors and diagnostics
//!
//! Every error the front end can produce carries one of a closed set of
//! kinds, a message, and the source location it points at. Errors are
//! fatal: passes propagate them with `?` straight out of `compile_uri`,
//! and the CLI renders the diagnostic and exits.

use crate::source::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Illegal character or unterminated literal.
    Scan,
    /// Token mismatch.
    Parse,
    /// Missing file, malformed URI, duplicate declaration, missing super.
    Load,
    /// Missing symbol in a const-only context.
    Resolve,
    /// Invalid const construction or folding.
    Const,
    /// Shape mismatch that cannot be resolved.
    Compile,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Scan => "scan error",
            ErrorKind::Parse => "parse error",
            ErrorKind::Load => "load error",
            ErrorKind::Resolve => "resolve error",
            ErrorKind::Const => "const error",
            ErrorKind::Compile => "compile error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub message: String,
    pub location: Location,
}

impl CompileError {
    pub fn new(kind: ErrorKind, location: Location, message: impl Into<String>) -> CompileError {
        CompileError {
            kind,
            message: message.into(),
            location,
        }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.message)
    }
}

impl std::error::Error for CompileError {}

pub type Result<T> = std::result::Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_label() {
        let error = CompileError::new(ErrorKind::Parse, Location::invalid(), "Expected ';'");
        assert_eq!(error.to_string(), "parse error: Expected ';'");
    }
}
