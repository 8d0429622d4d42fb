//! Test cases and the invocation handle passed to their bodies.

use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ContextConfig;
use crate::context::TestContext;
use crate::error::Result;
use crate::fixture::FixtureRegistry;
use crate::scope::ScopeStore;

/// A test body or lifecycle hook.
pub(crate) type Body = Arc<dyn Fn(&Invocation<'_>) -> Result<()> + Send + Sync>;

/// What a test body (or hook) sees while it runs.
///
/// Asking for the [`context`](Invocation::context) makes the invocation
/// asynchronous: after the body returns, the runner waits for the context's
/// verdict. Bodies that never ask for it pass as soon as they return `Ok`.
pub struct Invocation<'a> {
    name: &'a str,
    timeout: Duration,
    context: TestContext,
    uses_context: Cell<bool>,
    scope: &'a ScopeStore,
    shared: &'a ScopeStore,
    fixtures: &'a FixtureRegistry,
}

impl<'a> Invocation<'a> {
    pub(crate) fn new(
        name: &'a str,
        timeout: Duration,
        config: ContextConfig,
        scope: &'a ScopeStore,
        shared: &'a ScopeStore,
        fixtures: &'a FixtureRegistry,
    ) -> Self {
        Self {
            name,
            timeout,
            context: TestContext::with_config(config),
            uses_context: Cell::new(false),
            scope,
            shared,
            fixtures,
        }
    }

    /// Returns the test name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name
    }

    /// Returns the timeout enforced for this invocation.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the invocation's context and makes the invocation wait for it.
    #[must_use]
    pub fn context(&self) -> TestContext {
        self.uses_context.set(true);
        self.context.clone()
    }

    /// Resolves a fixture of type `T`.
    ///
    /// # Errors
    ///
    /// See [`FixtureRegistry::resolve`].
    pub fn resolve<T>(&self) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.fixtures.resolve(self.scope, self.shared)
    }

    /// Returns the store released when this invocation ends.
    #[must_use]
    pub fn scope(&self) -> &ScopeStore {
        self.scope
    }

    /// Returns the store shared by the invocation's group.
    #[must_use]
    pub fn shared_scope(&self) -> &ScopeStore {
        self.shared
    }

    pub(crate) fn uses_context(&self) -> bool {
        self.uses_context.get()
    }

    pub(crate) fn test_context(&self) -> &TestContext {
        &self.context
    }
}

impl fmt::Debug for Invocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// A named test body with an optional timeout.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use testkit_context::runner::TestCase;
///
/// let case = TestCase::new("completes", |invocation| {
///     let context = invocation.context();
///     std::thread::spawn(move || context.complete_now());
///     Ok(())
/// })
/// .with_timeout(Duration::from_secs(5));
///
/// assert_eq!(case.timeout(), Some(Duration::from_secs(5)));
/// ```
#[derive(Clone)]
pub struct TestCase {
    pub(crate) name: String,
    pub(crate) timeout: Option<Duration>,
    pub(crate) repetitions: usize,
    pub(crate) body: Body,
}

impl TestCase {
    /// Creates a test case.
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Invocation<'_>) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            timeout: None,
            repetitions: 1,
            body: Arc::new(body),
        }
    }

    /// Sets the timeout for this test, overriding the group's.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Runs the test `times` times, each in a fresh invocation scope.
    ///
    /// # Panics
    ///
    /// Panics if `times` is zero.
    #[must_use]
    pub fn repeat(mut self, times: usize) -> Self {
        assert!(times >= 1, "a test must run at least once");
        self.repetitions = times;
        self
    }

    /// Returns the test name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the timeout declared on this test.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns how many times the test runs.
    #[must_use]
    pub fn repetitions(&self) -> usize {
        self.repetitions
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("repetitions", &self.repetitions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_builder() {
        let case = TestCase::new("t", |_| Ok(()))
            .with_timeout(Duration::from_millis(5000))
            .repeat(3);

        assert_eq!(case.name(), "t");
        assert_eq!(case.timeout(), Some(Duration::from_millis(5000)));
        assert_eq!(case.repetitions(), 3);
    }

    #[test]
    #[should_panic(expected = "at least once")]
    fn test_repeat_zero_panics() {
        let _ = TestCase::new("t", |_| Ok(())).repeat(0);
    }

    #[test]
    fn test_context_marks_invocation_async() {
        let scope = ScopeStore::root("scope");
        let fixtures = FixtureRegistry::new();
        let invocation = Invocation::new(
            "t",
            Duration::from_secs(1),
            ContextConfig::default(),
            &scope,
            &scope,
            &fixtures,
        );

        assert!(!invocation.uses_context());
        let context = invocation.context();
        assert!(invocation.uses_context());

        context.complete_now();
        assert!(invocation.test_context().completed());
    }
}
