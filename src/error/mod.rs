//! Error definitions
//!
//! This module provides the error type shared by test contexts, scope stores
//! and the runner. Every failure a test can end with is one of these variants.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Boxed error produced by user code (callbacks, factories, release actions).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for testkit-context
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// An assertion panicked inside [`TestContext::verify`](crate::context::TestContext::verify).
    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    /// An explicit failure passed to `fail_now` or surfaced by an async result.
    #[error("{0}")]
    Failed(Arc<dyn std::error::Error + Send + Sync>),

    /// A `failing` handler received a successful result.
    #[error("The asynchronous result was expected to have failed")]
    UnexpectedSuccess,

    /// A strict checkpoint was flagged more often than required.
    #[error("Checkpoint `{name}` flagged more than {required} time(s)")]
    CheckpointOverflow {
        /// Checkpoint name.
        name: String,
        /// Number of passes the checkpoint was created with.
        required: usize,
    },

    /// The test did not reach a terminal state in time.
    #[error("Test timed out after {0:?}")]
    Timeout(Duration),

    /// A resource's release action failed.
    #[error("Releasing resource `{key}` failed: {cause}")]
    Release {
        /// Key the resource was stored under.
        key: String,
        /// The release action's error.
        cause: Arc<dyn std::error::Error + Send + Sync>,
    },

    /// One or more resources failed to release while a scope closed.
    #[error("Closing scope `{scope}` failed to release {} resource(s)", .failures.len())]
    Teardown {
        /// Name of the scope being closed.
        scope: String,
        /// Individual release failures, in release order.
        failures: Vec<Error>,
    },

    /// The test body panicked outside of any context.
    #[error("Test body panicked: {0}")]
    Panicked(String),

    /// A scope store was used after it was closed.
    #[error("Scope `{0}` is closed")]
    ScopeClosed(String),

    /// No fixture is registered for the requested type.
    #[error("No fixture registered for `{0}`")]
    FixtureMissing(&'static str),

    /// A stored resource has a different type than requested.
    #[error("Resource `{key}` has a different type than requested")]
    FixtureTypeMismatch {
        /// The resource key.
        key: String,
    },

    /// A factory requested its own key while being created.
    #[error("Resource `{0}` depends on itself")]
    FixtureCycle(String),
}

impl Error {
    /// Wrap an arbitrary error as a failure cause.
    ///
    /// Errors that already are an [`Error`] are passed through unchanged.
    #[must_use]
    pub fn from_cause<E>(cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::from_boxed(Box::new(cause))
    }

    /// Same as [`Error::from_cause`] for an already boxed error.
    #[must_use]
    pub fn from_boxed(cause: BoxError) -> Self {
        match cause.downcast::<Error>() {
            Ok(error) => *error,
            Err(other) => Self::Failed(Arc::from(other)),
        }
    }

    /// Create a failure from a message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(Arc::new(Message(message.into())))
    }

    /// Create an assertion failure.
    #[must_use]
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::AssertionFailed(message.into())
    }

    /// Create a release failure for the resource stored under `key`.
    #[must_use]
    pub fn release(key: impl Into<String>, cause: BoxError) -> Self {
        Self::Release {
            key: key.into(),
            cause: Arc::from(cause),
        }
    }

    /// Returns true for failures raised while releasing resources.
    #[must_use]
    pub fn is_teardown(&self) -> bool {
        matches!(self, Self::Release { .. } | Self::Teardown { .. })
    }
}

/// Plain message error backing [`Error::failed`].
#[derive(Debug)]
struct Message(String);

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Message {}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cause_passes_crate_errors_through() {
        let error = Error::from_cause(Error::UnexpectedSuccess);
        assert!(matches!(error, Error::UnexpectedSuccess));
    }

    #[test]
    fn test_from_cause_wraps_foreign_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let error = Error::from_cause(io);
        assert!(matches!(error, Error::Failed(_)));
        assert_eq!(error.to_string(), "boom");
    }

    #[test]
    fn test_teardown_display_counts_failures() {
        let error = Error::Teardown {
            scope: "group".into(),
            failures: vec![Error::release("a", "x".into()), Error::release("b", "y".into())],
        };
        assert_eq!(
            error.to_string(),
            "Closing scope `group` failed to release 2 resource(s)"
        );
        assert!(error.is_teardown());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
