//! Test groups and the invocation loop.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RunnerConfig;
use crate::error::{panic_message, Error, Result};
use crate::fixture::{FixtureRegistry, FixtureScope};
use crate::runner::case::{Body, Invocation, TestCase};
use crate::runner::report::{GroupReport, Outcome, TestReport};
use crate::scope::{Resource, ScopeStore};

/// A group of tests sharing a scope, fixtures, hooks and a timeout.
///
/// Groups nest: a nested group inherits its parent's timeout, fixtures and
/// hooks, and its shared scope is a child of the parent's, so shared
/// fixtures created by the parent are reused.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use testkit_context::runner::{TestCase, TestGroup};
///
/// let report = TestGroup::new("callbacks")
///     .with_timeout(Duration::from_millis(4500))
///     .test(TestCase::new("checkpoint", |invocation| {
///         let checkpoint = invocation.context().checkpoints(2);
///         for _ in 0..2 {
///             let checkpoint = checkpoint.clone();
///             std::thread::spawn(move || checkpoint.flag());
///         }
///         Ok(())
///     }))
///     .run();
///
/// assert!(report.passed());
/// ```
#[derive(Clone)]
pub struct TestGroup {
    name: String,
    timeout: Option<Duration>,
    fixtures: FixtureRegistry,
    before_each: Vec<Body>,
    after_each: Vec<Body>,
    cases: Vec<TestCase>,
    groups: Vec<TestGroup>,
}

/// What a nested group inherits from its parent.
struct Inherited<'a> {
    timeout: Option<Duration>,
    fixtures: FixtureRegistry,
    before_each: Vec<Body>,
    after_each: Vec<Body>,
    parent_scope: Option<&'a ScopeStore>,
}

impl TestGroup {
    /// Creates an empty group.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout: None,
            fixtures: FixtureRegistry::new(),
            before_each: Vec::new(),
            after_each: Vec::new(),
            cases: Vec::new(),
            groups: Vec::new(),
        }
    }

    /// Sets the timeout for every test of the group that declares none.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Adds every fixture of `fixtures`.
    #[must_use]
    pub fn with_fixtures(mut self, fixtures: &FixtureRegistry) -> Self {
        self.fixtures.extend(fixtures);
        self
    }

    /// Registers a fixture for this group.
    #[must_use]
    pub fn fixture<T, F>(mut self, scope: FixtureScope, factory: F) -> Self
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Result<Resource<T>> + Send + Sync + 'static,
    {
        self.fixtures.register(scope, factory);
        self
    }

    /// Adds a hook run before every test, with its own context.
    #[must_use]
    pub fn before_each<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Invocation<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.before_each.push(Arc::new(hook));
        self
    }

    /// Adds a hook run after every test, with its own context.
    ///
    /// After-hooks run even when the test failed.
    #[must_use]
    pub fn after_each<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Invocation<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.after_each.push(Arc::new(hook));
        self
    }

    /// Adds a test.
    #[must_use]
    pub fn test(mut self, case: TestCase) -> Self {
        self.cases.push(case);
        self
    }

    /// Adds a nested group, run after this group's own tests.
    #[must_use]
    pub fn group(mut self, group: TestGroup) -> Self {
        self.groups.push(group);
        self
    }

    /// Returns the group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the group with the default [`RunnerConfig`].
    #[must_use]
    pub fn run(&self) -> GroupReport {
        self.run_with_config(&RunnerConfig::default())
    }

    /// Runs every test of the group and its nested groups, then closes the
    /// group's shared scope.
    #[must_use]
    pub fn run_with_config(&self, config: &RunnerConfig) -> GroupReport {
        self.run_nested(
            config,
            Inherited {
                timeout: None,
                fixtures: FixtureRegistry::new(),
                before_each: Vec::new(),
                after_each: Vec::new(),
                parent_scope: None,
            },
        )
    }

    fn run_nested(&self, config: &RunnerConfig, inherited: Inherited<'_>) -> GroupReport {
        let span = tracing::info_span!("group", name = %self.name);
        let _entered = span.enter();

        let shared = match inherited.parent_scope {
            Some(parent) => match parent.child(self.name.clone()) {
                Ok(scope) => scope,
                Err(error) => return self.unrunnable(&error),
            },
            None => ScopeStore::root(self.name.clone()),
        };

        let mut fixtures = inherited.fixtures;
        fixtures.extend(&self.fixtures);
        let timeout = self.timeout.or(inherited.timeout);
        let mut before_each = inherited.before_each;
        before_each.extend(self.before_each.iter().cloned());
        let mut after_each = self.after_each.clone();
        after_each.extend(inherited.after_each);

        let plan = GroupPlan {
            config,
            shared: &shared,
            fixtures: &fixtures,
            timeout,
            before_each: &before_each,
            after_each: &after_each,
        };

        let mut tests = Vec::new();
        for case in &self.cases {
            for repetition in 0..case.repetitions {
                tests.push(plan.run_case(case, repetition));
            }
        }

        let groups = self
            .groups
            .iter()
            .map(|group| {
                group.run_nested(
                    config,
                    Inherited {
                        timeout,
                        fixtures: fixtures.clone(),
                        before_each: before_each.clone(),
                        after_each: after_each.clone(),
                        parent_scope: Some(&shared),
                    },
                )
            })
            .collect();

        let teardown = shared.close().err();
        if let Some(error) = &teardown {
            tracing::warn!(%error, "group teardown failed");
        }

        GroupReport {
            name: self.name.clone(),
            tests,
            groups,
            teardown,
        }
    }

    fn unrunnable(&self, error: &Error) -> GroupReport {
        let tests = self
            .cases
            .iter()
            .map(|case| TestReport {
                name: case.name.clone(),
                outcome: Outcome::Failed(error.clone()),
                elapsed: Duration::ZERO,
                teardown: None,
            })
            .collect();
        GroupReport {
            name: self.name.clone(),
            tests,
            groups: Vec::new(),
            teardown: None,
        }
    }
}

impl fmt::Debug for TestGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestGroup")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("fixtures", &self.fixtures)
            .field("cases", &self.cases)
            .field("groups", &self.groups)
            .finish_non_exhaustive()
    }
}

/// Everything needed to run the tests of one group.
struct GroupPlan<'a> {
    config: &'a RunnerConfig,
    shared: &'a ScopeStore,
    fixtures: &'a FixtureRegistry,
    timeout: Option<Duration>,
    before_each: &'a [Body],
    after_each: &'a [Body],
}

impl GroupPlan<'_> {
    fn run_case(&self, case: &TestCase, repetition: usize) -> TestReport {
        let name = if case.repetitions > 1 {
            format!("{}[{}/{}]", case.name, repetition + 1, case.repetitions)
        } else {
            case.name.clone()
        };
        let timeout = case
            .timeout
            .or(self.timeout)
            .unwrap_or(self.config.default_timeout);

        let span = tracing::info_span!("test", name = %name, timeout_ms = millis(timeout));
        let _entered = span.enter();
        let started = Instant::now();

        let scope = match self.shared.child(name.clone()) {
            Ok(scope) => scope,
            Err(error) => {
                return TestReport {
                    name,
                    outcome: Outcome::Failed(error),
                    elapsed: started.elapsed(),
                    teardown: None,
                }
            }
        };

        let mut outcome = Outcome::Passed;
        for hook in self.before_each {
            outcome = self.run_phase(hook, &name, timeout, &scope);
            if !outcome.is_passed() {
                tracing::debug!(%outcome, "before-each hook did not pass, skipping test body");
                break;
            }
        }
        if outcome.is_passed() {
            outcome = self.run_phase(&case.body, &name, timeout, &scope);
        }
        for hook in self.after_each {
            let hook_outcome = self.run_phase(hook, &name, timeout, &scope);
            if outcome.is_passed() {
                outcome = hook_outcome;
            } else if !hook_outcome.is_passed() {
                tracing::debug!(outcome = %hook_outcome, "after-each hook did not pass");
            }
        }

        let teardown = scope.close().err();
        if let Some(error) = &teardown {
            tracing::warn!(%error, "invocation teardown failed");
            if outcome.is_passed() {
                outcome = Outcome::Failed(error.clone());
            }
        }

        let elapsed = started.elapsed();
        tracing::info!(%outcome, elapsed_ms = millis(elapsed), "test finished");
        TestReport {
            name,
            outcome,
            elapsed,
            teardown,
        }
    }

    fn run_phase(&self, body: &Body, name: &str, timeout: Duration, scope: &ScopeStore) -> Outcome {
        let invocation = Invocation::new(
            name,
            timeout,
            self.config.context,
            scope,
            self.shared,
            self.fixtures,
        );
        match panic::catch_unwind(AssertUnwindSafe(|| body(&invocation))) {
            Err(payload) => Outcome::Failed(Error::Panicked(panic_message(payload.as_ref()))),
            Ok(Err(error)) => Outcome::Failed(error),
            Ok(Ok(())) if invocation.uses_context() => await_verdict(&invocation, timeout),
            Ok(Ok(())) => Outcome::Passed,
        }
    }
}

fn await_verdict(invocation: &Invocation<'_>, timeout: Duration) -> Outcome {
    let context = invocation.test_context();
    if !context.await_completion(timeout) {
        let unsatisfied_checkpoints = context.unsatisfied_checkpoint_call_sites();
        context.shared.fail(Error::Timeout(timeout));
        if let Some(outcome) = verdict_after_timeout(context.cause()) {
            return outcome;
        }
        tracing::warn!(
            ?timeout,
            unsatisfied = unsatisfied_checkpoints.len(),
            "test context has no verdict"
        );
        return Outcome::TimedOut {
            after: timeout,
            unsatisfied_checkpoints,
        };
    }
    match context.cause() {
        Some(cause) => Outcome::Failed(cause),
        None => Outcome::Passed,
    }
}

/// A verdict that raced the timeout wins over it.
fn verdict_after_timeout(cause: Option<Error>) -> Option<Outcome> {
    match cause {
        Some(Error::Timeout(_)) => None,
        Some(cause) => Some(Outcome::Failed(cause)),
        None => Some(Outcome::Passed),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Runs a test case, with all its repetitions, in a group of its own.
///
/// Returns the first report that did not pass, or the last one. Teardown
/// failures of the surrounding group fail a passing test.
#[must_use]
pub fn run_test(case: TestCase, config: &RunnerConfig) -> TestReport {
    let name = case.name.clone();
    let report = TestGroup::new(name.clone()).test(case).run_with_config(config);
    let mut tests = report.tests;
    let index = tests
        .iter()
        .position(|test| !test.passed())
        .unwrap_or_else(|| tests.len().saturating_sub(1));
    let mut test = if index < tests.len() {
        tests.swap_remove(index)
    } else {
        TestReport {
            name,
            outcome: Outcome::Passed,
            elapsed: Duration::ZERO,
            teardown: None,
        }
    };
    if let Some(error) = report.teardown {
        if test.outcome.is_passed() {
            test.outcome = Outcome::Failed(error.clone());
        }
        if test.teardown.is_none() {
            test.teardown = Some(error);
        }
    }
    test
}
