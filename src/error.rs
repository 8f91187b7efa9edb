//! Error types for conflux.

use thiserror::Error;

/// Result type alias using conflux's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for query enumeration.
///
/// A stream delivers at most one terminal error per enumeration; when
/// several tasks fail concurrently the individual failures are collected
/// into [`Error::Aggregate`].
#[derive(Error, Debug)]
pub enum Error {
    /// The enumeration was canceled, either by the external token or by an
    /// internal trip.
    #[error("query canceled")]
    Canceled,

    /// A user-provided selector, predicate, key function, or thunk failed.
    #[error("callback failed: {0}")]
    Callback(String),

    /// A spawned worker task panicked or was aborted.
    #[error("worker task failed: {0}")]
    Task(String),

    /// An upstream producer reported a failure.
    #[error("source failed: {0}")]
    Source(String),

    /// Multiple concurrent failures collected during one enumeration.
    #[error("{} failures during enumeration", .0.len())]
    Aggregate(Vec<Error>),
}

impl Error {
    /// Build a [`Error::Callback`] from any displayable cause.
    pub fn callback(cause: impl std::fmt::Display) -> Self {
        Error::Callback(cause.to_string())
    }

    /// Build a [`Error::Source`] from any displayable cause.
    pub fn source(cause: impl std::fmt::Display) -> Self {
        Error::Source(cause.to_string())
    }

    /// Collapse a non-empty batch of failures into a terminal error.
    ///
    /// A single failure is returned as-is; several are wrapped in
    /// [`Error::Aggregate`].
    pub(crate) fn aggregate(mut errors: Vec<Error>) -> Self {
        debug_assert!(!errors.is_empty());
        if errors.len() == 1 {
            errors.remove(0)
        } else {
            Error::Aggregate(errors)
        }
    }

    /// Whether this error is a bare cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_collapses_singleton() {
        let err = Error::aggregate(vec![Error::Callback("boom".into())]);
        assert!(matches!(err, Error::Callback(_)));
    }

    #[test]
    fn test_aggregate_keeps_multiple() {
        let err = Error::aggregate(vec![
            Error::Callback("a".into()),
            Error::Callback("b".into()),
        ]);
        match err {
            Error::Aggregate(inner) => assert_eq!(inner.len(), 2),
            other => panic!("expected aggregate, got {other}"),
        }
    }
}
