//! Error types for Hodos.
//!
//! Translation-time failures come in three flavors, all unrecoverable at
//! this layer: usage errors raised while the step chain is being built,
//! compilation errors raised while lowering or rendering, and constructs
//! that are recognized but not implemented. Errors are deterministic
//! functions of the input chain, so no retry logic exists anywhere.

use thiserror::Error;

/// Convenient result alias used across all Hodos crates.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A query translation or execution error with a known kind.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// An internal invariant was violated. Indicates a bug, not bad input.
    #[error("internal error: {0}")]
    Internal(String),
}

/// The kind of a query error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Malformed chain usage, raised at chain-building time (e.g. `option()`
    /// without a preceding `choose()`, duplicate option keys, a directional
    /// edge step without a label where one is required).
    Syntax,
    /// A lowering or rendering rule failed (e.g. an unhandled predicate tag,
    /// a `match()` traversal with more than one start label, a step cast to
    /// the wrong operator kind).
    Compilation,
    /// A recognized construct with no lowering rule yet. Fails loudly rather
    /// than producing an incorrect plan.
    Unsupported,
}

impl QueryErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            QueryErrorKind::Syntax => "syntax",
            QueryErrorKind::Compilation => "compilation",
            QueryErrorKind::Unsupported => "unsupported",
        }
    }
}

/// A query error with a kind and a human-readable message identifying the
/// offending step and, where applicable, the illegal argument.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{} error: {message}", kind.as_str())]
pub struct QueryError {
    /// What stage the error belongs to.
    pub kind: QueryErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl QueryError {
    /// Creates a new query error.
    #[must_use]
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl Error {
    /// Shorthand for a chain-building usage error.
    #[must_use]
    pub fn syntax(message: impl Into<String>) -> Self {
        Error::Query(QueryError::new(QueryErrorKind::Syntax, message))
    }

    /// Shorthand for a lowering/rendering failure.
    #[must_use]
    pub fn compilation(message: impl Into<String>) -> Self {
        Error::Query(QueryError::new(QueryErrorKind::Compilation, message))
    }

    /// Shorthand for a recognized-but-unimplemented construct.
    #[must_use]
    pub fn unsupported(message: impl Into<String>) -> Self {
        Error::Query(QueryError::new(QueryErrorKind::Unsupported, message))
    }

    /// Returns the query error kind, if this is a query error.
    #[must_use]
    pub fn query_kind(&self) -> Option<QueryErrorKind> {
        match self {
            Error::Query(e) => Some(e.kind),
            Error::Internal(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::syntax("option() without a preceding choose()");
        assert_eq!(
            err.to_string(),
            "syntax error: option() without a preceding choose()"
        );
        assert_eq!(err.query_kind(), Some(QueryErrorKind::Syntax));
    }

    #[test]
    fn test_internal_has_no_kind() {
        assert_eq!(Error::Internal("oops".into()).query_kind(), None);
    }
}
