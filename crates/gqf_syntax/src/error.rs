//! Syntax errors with source diagnostics.

use crate::span::Span;
use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

/// A syntax error in a GraphQL document.
///
/// Carries the source text so `miette` can render the offending location.
#[derive(Debug, Clone, Error, Diagnostic)]
#[error("{message}")]
#[diagnostic(code(gqf::syntax))]
pub struct SyntaxError {
    pub message: String,
    span: Span,
    #[source_code]
    source_code: String,
    #[label("here")]
    at: SourceSpan,
}

impl SyntaxError {
    /// Creates a syntax error pointing at `span` in `source`.
    pub fn new(message: impl Into<String>, span: Span, source: &str) -> Self {
        Self {
            message: message.into(),
            span,
            source_code: source.to_string(),
            at: span.into(),
        }
    }

    /// The location of the error.
    pub fn span(&self) -> Span {
        self.span
    }

    /// The byte offset where the error starts.
    pub fn offset(&self) -> u32 {
        self.span.start
    }
}
