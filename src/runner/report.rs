//! Test outcomes and reports.

use std::fmt;
use std::panic::Location;
use std::time::Duration;

use crate::error::Error;

/// The single outcome reported for one test invocation.
#[derive(Clone, Debug)]
pub enum Outcome {
    /// The test passed.
    Passed,
    /// The test failed with the first recorded cause.
    Failed(Error),
    /// The test had no verdict when its timeout elapsed.
    TimedOut {
        /// The timeout that was enforced.
        after: Duration,
        /// Where the checkpoints still outstanding were created.
        unsatisfied_checkpoints: Vec<&'static Location<'static>>,
    },
}

impl Outcome {
    /// Returns true if the test passed.
    #[must_use]
    pub fn is_passed(&self) -> bool {
        matches!(self, Outcome::Passed)
    }

    /// Returns true if the test failed (not counting timeouts).
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    /// Returns true if the test timed out.
    #[must_use]
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Outcome::TimedOut { .. })
    }

    /// Returns the error describing a non-passing outcome.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        match self {
            Outcome::Passed => None,
            Outcome::Failed(error) => Some(error.clone()),
            Outcome::TimedOut { after, .. } => Some(Error::Timeout(*after)),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Passed => write!(f, "passed"),
            Outcome::Failed(error) => write!(f, "failed: {error}"),
            Outcome::TimedOut {
                after,
                unsatisfied_checkpoints,
            } => {
                write!(f, "timed out after {after:?}")?;
                if !unsatisfied_checkpoints.is_empty() {
                    write!(f, ", unsatisfied checkpoints created at")?;
                    for site in unsatisfied_checkpoints {
                        write!(f, " {site}")?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// Report for one test invocation.
#[derive(Clone, Debug)]
pub struct TestReport {
    /// Test name, with the repetition for repeated tests.
    pub name: String,
    /// The outcome.
    pub outcome: Outcome,
    /// Wall-clock duration of the invocation, hooks included.
    pub elapsed: Duration,
    /// The error raised while closing the invocation scope, if any.
    ///
    /// A passing test whose teardown failed is reported as failed with this
    /// error; it is kept here whatever the outcome.
    pub teardown: Option<Error>,
}

impl TestReport {
    /// Returns true if the test passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.outcome.is_passed()
    }

    /// Panics unless the test passed.
    ///
    /// # Panics
    ///
    /// Panics with the outcome when the test failed or timed out.
    #[track_caller]
    pub fn assert_passed(&self) {
        assert!(self.passed(), "test `{}` {}", self.name, self.outcome);
    }
}

/// Report for a group of tests and its nested groups.
#[derive(Clone, Debug)]
pub struct GroupReport {
    /// Group name.
    pub name: String,
    /// Reports of the group's own tests, in execution order.
    pub tests: Vec<TestReport>,
    /// Reports of nested groups.
    pub groups: Vec<GroupReport>,
    /// The error raised while closing the group's shared scope, if any.
    pub teardown: Option<Error>,
}

impl GroupReport {
    /// Returns every test report of this group and its nested groups.
    #[must_use]
    pub fn all_tests(&self) -> Vec<&TestReport> {
        let mut tests: Vec<&TestReport> = self.tests.iter().collect();
        for group in &self.groups {
            tests.extend(group.all_tests());
        }
        tests
    }

    /// Returns the reports of tests that did not pass.
    #[must_use]
    pub fn failures(&self) -> Vec<&TestReport> {
        self.all_tests()
            .into_iter()
            .filter(|report| !report.passed())
            .collect()
    }

    /// Returns true if every test passed and every scope closed cleanly.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.teardown.is_none()
            && self.tests.iter().all(TestReport::passed)
            && self.groups.iter().all(GroupReport::passed)
    }

    /// Returns the report of the test called `name`, searching nested groups.
    #[must_use]
    pub fn test(&self, name: &str) -> Option<&TestReport> {
        self.all_tests().into_iter().find(|report| report.name == name)
    }
}
