//! Adapters from asynchronous results to context transitions.
//!
//! Callback-driven APIs usually report their outcome as a `Result` passed to
//! a callback. The methods in this module build such callbacks for a
//! [`TestContext`]: an outcome the test did not expect fails the context, and
//! an expected one is handed to the caller's handler under
//! [`verify`](TestContext::verify) semantics.
//!
//! ```rust
//! use testkit_context::context::TestContext;
//!
//! fn fetch(callback: impl FnOnce(Result<u32, std::io::Error>) + Send + 'static) {
//!     std::thread::spawn(move || callback(Ok(42)));
//! }
//!
//! let context = TestContext::new();
//! let handle = context.clone();
//! fetch(context.succeeding_with(move |value| {
//!     assert_eq!(value, 42);
//!     handle.complete_now();
//! }));
//!
//! assert!(context.await_completion(std::time::Duration::from_secs(1)));
//! assert!(context.completed());
//! ```

use std::future::Future;

use futures::FutureExt;

use crate::context::TestContext;
use crate::error::{BoxError, Error};

impl TestContext {
    /// A callback that fails the context on `Err` and ignores `Ok`.
    pub fn succeeding<T, E>(&self) -> impl FnOnce(Result<T, E>) + Send + 'static
    where
        T: 'static,
        E: Into<BoxError> + 'static,
    {
        let context = self.clone();
        move |result| {
            if let Err(error) = result {
                context.fail_now(error);
            }
        }
    }

    /// A callback that fails the context on `Err` and passes `Ok` values to
    /// `on_success`. A panic in `on_success` fails the context.
    pub fn succeeding_with<T, E, F>(&self, on_success: F) -> impl FnOnce(Result<T, E>) + Send + 'static
    where
        T: 'static,
        E: Into<BoxError> + 'static,
        F: FnOnce(T) + Send + 'static,
    {
        let context = self.clone();
        move |result| match result {
            Ok(value) => {
                context.verify(|| on_success(value));
            }
            Err(error) => context.fail_now(error),
        }
    }

    /// A callback that completes the context on `Ok` and fails it on `Err`.
    pub fn succeeding_then_complete<T, E>(&self) -> impl FnOnce(Result<T, E>) + Send + 'static
    where
        T: 'static,
        E: Into<BoxError> + 'static,
    {
        let context = self.clone();
        move |result| match result {
            Ok(_) => context.complete_now(),
            Err(error) => context.fail_now(error),
        }
    }

    /// A callback that fails the context on `Ok` and ignores `Err`.
    pub fn failing<T, E>(&self) -> impl FnOnce(Result<T, E>) + Send + 'static
    where
        T: 'static,
        E: 'static,
    {
        let context = self.clone();
        move |result| {
            if result.is_ok() {
                context.shared.fail(Error::UnexpectedSuccess);
            }
        }
    }

    /// A callback that fails the context on `Ok` and passes errors to
    /// `on_failure`. A panic in `on_failure` fails the context.
    pub fn failing_with<T, E, F>(&self, on_failure: F) -> impl FnOnce(Result<T, E>) + Send + 'static
    where
        T: 'static,
        E: 'static,
        F: FnOnce(E) + Send + 'static,
    {
        let context = self.clone();
        move |result| match result {
            Ok(_) => context.shared.fail(Error::UnexpectedSuccess),
            Err(error) => {
                context.verify(|| on_failure(error));
            }
        }
    }

    /// A callback that completes the context on `Err` and fails it on `Ok`.
    pub fn failing_then_complete<T, E>(&self) -> impl FnOnce(Result<T, E>) + Send + 'static
    where
        T: 'static,
        E: 'static,
    {
        let context = self.clone();
        move |result| match result {
            Ok(_) => context.shared.fail(Error::UnexpectedSuccess),
            Err(_) => context.complete_now(),
        }
    }

    /// Awaits `future` and fails the context if it resolves to `Err`.
    ///
    /// Resolves to the success value, or `None` after failing the context.
    pub fn assert_complete<T, E, Fut>(&self, future: Fut) -> impl Future<Output = Option<T>>
    where
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        let context = self.clone();
        future.map(move |result| match result {
            Ok(value) => Some(value),
            Err(error) => {
                context.fail_now(error);
                None
            }
        })
    }

    /// Awaits `future` and fails the context if it resolves to `Ok`.
    ///
    /// Resolves to the error, or `None` after failing the context.
    pub fn assert_failure<T, E, Fut>(&self, future: Fut) -> impl Future<Output = Option<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let context = self.clone();
        future.map(move |result| match result {
            Ok(_) => {
                context.shared.fail(Error::UnexpectedSuccess);
                None
            }
            Err(error) => Some(error),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use futures::executor::block_on;

    use crate::context::{ContextState, TestContext};
    use crate::error::Error;

    fn io_error() -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionRefused, "refused")
    }

    #[test]
    fn test_succeeding_ignores_ok() {
        let context = TestContext::new();
        context.succeeding::<u32, io::Error>()(Ok(1));
        assert_eq!(context.state(), ContextState::Pending);
    }

    #[test]
    fn test_succeeding_fails_on_err() {
        let context = TestContext::new();
        context.succeeding::<u32, io::Error>()(Err(io_error()));
        assert!(context.failed());
        assert_eq!(context.cause().unwrap().to_string(), "refused");
    }

    #[test]
    fn test_succeeding_with_runs_handler() {
        let context = TestContext::new();
        let handle = context.clone();
        let callback = context.succeeding_with::<_, io::Error, _>(move |value: u32| {
            assert_eq!(value, 7);
            handle.complete_now();
        });
        callback(Ok(7));
        assert!(context.completed());
    }

    #[test]
    fn test_succeeding_with_handler_panic_fails() {
        let context = TestContext::new();
        let callback = context.succeeding_with::<_, io::Error, _>(|value: u32| {
            assert_eq!(value, 8, "wrong value");
        });
        callback(Ok(7));
        assert!(context.failed());
        assert!(matches!(context.cause(), Some(Error::AssertionFailed(_))));
    }

    #[test]
    fn test_succeeding_then_complete() {
        let context = TestContext::new();
        context.succeeding_then_complete::<(), io::Error>()(Ok(()));
        assert!(context.completed());

        let context = TestContext::new();
        context.succeeding_then_complete::<(), io::Error>()(Err(io_error()));
        assert!(context.failed());
    }

    #[test]
    fn test_failing_fails_on_ok() {
        let context = TestContext::new();
        context.failing::<u32, io::Error>()(Ok(3));
        assert!(matches!(context.cause(), Some(Error::UnexpectedSuccess)));
    }

    #[test]
    fn test_failing_with_receives_error() {
        let context = TestContext::new();
        let handle = context.clone();
        let callback = context.failing_with::<u32, _, _>(move |error: io::Error| {
            assert_eq!(error.kind(), io::ErrorKind::ConnectionRefused);
            handle.complete_now();
        });
        callback(Err(io_error()));
        assert!(context.completed());
    }

    #[test]
    fn test_failing_with_handler_panic_fails() {
        let context = TestContext::new();
        let callback = context.failing_with::<u32, _, _>(|error: io::Error| {
            assert_eq!(error.kind(), io::ErrorKind::TimedOut, "wrong error kind");
        });
        callback(Err(io_error()));
        assert!(context.failed());
        assert!(matches!(
            context.cause(),
            Some(Error::AssertionFailed(message)) if message.contains("wrong error kind")
        ));
    }

    #[test]
    fn test_failing_then_complete() {
        let context = TestContext::new();
        context.failing_then_complete::<u32, io::Error>()(Err(io_error()));
        assert!(context.completed());

        let context = TestContext::new();
        context.failing_then_complete::<u32, io::Error>()(Ok(1));
        assert!(context.failed());
    }

    #[test]
    fn test_assert_complete() {
        let context = TestContext::new();
        let value = block_on(context.assert_complete(async { Ok::<_, io::Error>(5) }));
        assert_eq!(value, Some(5));
        assert_eq!(context.state(), ContextState::Pending);

        let value = block_on(context.assert_complete(async { Err::<u32, _>(io_error()) }));
        assert_eq!(value, None);
        assert!(context.failed());
    }

    #[test]
    fn test_assert_failure() {
        let context = TestContext::new();
        let error = block_on(context.assert_failure(async { Err::<u32, _>(io_error()) }));
        assert_eq!(error.map(|e| e.kind()), Some(io::ErrorKind::ConnectionRefused));

        let error = block_on(context.assert_failure(async { Ok::<u32, io::Error>(1) }));
        assert!(error.is_none());
        assert!(matches!(context.cause(), Some(Error::UnexpectedSuccess)));
    }
}
