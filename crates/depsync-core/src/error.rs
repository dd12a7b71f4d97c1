//! Error types for depsync.

use thiserror::Error;

/// Result type alias using depsync's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for depsync operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Upload not found
    #[error("Upload not found: {0}")]
    UploadNotFound(i64),

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Operation was cancelled (shutdown or caller abort)
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Multiple independent failures from one operation
    #[error("{0}")]
    Aggregate(AggregateError),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the failure is transient and the job should be retried
    /// rather than marked as terminally broken.
    ///
    /// Cancellation is always retryable: "the system asked us to stop"
    /// is not the job's fault. An aggregate is retryable if every
    /// constituent is.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Cancelled(_) => true,
            Error::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            Error::Aggregate(agg) => agg.errors().iter().all(Error::is_retryable),
            _ => false,
        }
    }
}

/// An ordered collection of independent failures from one operation.
///
/// Callers can inspect each constituent via [`AggregateError::errors`];
/// the `Display` form joins all constituent messages so nothing is
/// silently masked. Constructed only through [`ErrorList`], which
/// guarantees at least two constituents.
#[derive(Debug)]
pub struct AggregateError {
    errors: Vec<Error>,
}

impl AggregateError {
    /// The constituent errors, in the order they occurred.
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// Number of constituent errors (always >= 2).
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl std::fmt::Display for AggregateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} errors occurred: ", self.errors.len())?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

/// Accumulator for failures that must not abort an in-progress scan.
///
/// Reporting rule: empty -> `Ok(())`, exactly one -> that error,
/// multiple -> [`Error::Aggregate`] preserving all constituents in
/// insertion order.
#[derive(Debug, Default)]
pub struct ErrorList {
    errors: Vec<Error>,
}

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure.
    pub fn push(&mut self, err: Error) {
        self.errors.push(err);
    }

    /// Record the error of a result, passing values through.
    pub fn push_result<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                self.errors.push(e);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Collapse the accumulated failures into a single `Result`.
    pub fn into_result(mut self) -> Result<()> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(Error::Aggregate(AggregateError {
                errors: self.errors,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_list_empty_is_ok() {
        let errs = ErrorList::new();
        assert!(errs.is_empty());
        assert!(errs.into_result().is_ok());
    }

    #[test]
    fn test_error_list_single_returns_that_error() {
        let mut errs = ErrorList::new();
        errs.push(Error::Job("insert failed".into()));

        match errs.into_result() {
            Err(Error::Job(msg)) => assert_eq!(msg, "insert failed"),
            other => panic!("Expected Job error, got {other:?}"),
        }
    }

    #[test]
    fn test_error_list_multiple_aggregates_in_order() {
        let mut errs = ErrorList::new();
        errs.push(Error::Job("first".into()));
        errs.push(Error::Internal("second".into()));
        errs.push(Error::NotFound("third".into()));

        match errs.into_result() {
            Err(Error::Aggregate(agg)) => {
                assert_eq!(agg.len(), 3);
                assert!(matches!(agg.errors()[0], Error::Job(_)));
                assert!(matches!(agg.errors()[1], Error::Internal(_)));
                assert!(matches!(agg.errors()[2], Error::NotFound(_)));
            }
            other => panic!("Expected aggregate, got {other:?}"),
        }
    }

    #[test]
    fn test_aggregate_display_preserves_all_messages() {
        let mut errs = ErrorList::new();
        errs.push(Error::Job("one".into()));
        errs.push(Error::Job("two".into()));

        let err = errs.into_result().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("2 errors occurred"));
        assert!(msg.contains("one"));
        assert!(msg.contains("two"));
    }

    #[test]
    fn test_push_result_passes_ok_through() {
        let mut errs = ErrorList::new();
        assert_eq!(errs.push_result(Ok(7)), Some(7));
        assert!(errs.is_empty());

        let missing: Option<i32> = errs.push_result(Err(Error::Job("nope".into())));
        assert!(missing.is_none());
        assert_eq!(errs.len(), 1);
    }

    #[test]
    fn test_cancelled_is_retryable() {
        assert!(Error::Cancelled("shutdown".into()).is_retryable());
        assert!(!Error::InvalidInput("bad scheme".into()).is_retryable());
    }

    #[test]
    fn test_aggregate_retryable_only_if_all_constituents_are() {
        let mut errs = ErrorList::new();
        errs.push(Error::Cancelled("a".into()));
        errs.push(Error::Cancelled("b".into()));
        assert!(errs.into_result().unwrap_err().is_retryable());

        let mut errs = ErrorList::new();
        errs.push(Error::Cancelled("a".into()));
        errs.push(Error::Job("broken".into()));
        assert!(!errs.into_result().unwrap_err().is_retryable());
    }

    #[test]
    fn test_error_display_upload_not_found() {
        let err = Error::UploadNotFound(42);
        assert_eq!(err.to_string(), "Upload not found: 42");
    }
}
