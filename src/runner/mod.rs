//! A small driving loop for context-based tests.
//!
//! The runner ties the other modules together the way a test harness would:
//!
//! - [`TestCase`] - A named body with an optional timeout and repetitions
//! - [`TestGroup`] - Tests sharing a scope, fixtures, hooks and a timeout
//! - [`Invocation`] - What a body sees: its context, fixtures and scopes
//! - [`TestReport`] / [`GroupReport`] - Exactly one [`Outcome`] per invocation
//!
//! For every invocation the runner opens an invocation scope below the
//! group's shared scope, runs the `before_each` hooks, the body and the
//! `after_each` hooks (each with its own context, awaited up to the test's
//! timeout) and closes the invocation scope. The shared scope closes after
//! the last test of the group.
//!
//! The timeout of a test is the first of: the test's own timeout, its
//! group's (or an enclosing group's) timeout, and
//! [`RunnerConfig::default_timeout`](crate::config::RunnerConfig::default_timeout).
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use testkit_context::config::RunnerConfig;
//! use testkit_context::runner::{run_test, Outcome, TestCase};
//!
//! let report = run_test(
//!     TestCase::new("never-completes", |invocation| {
//!         let _pending = invocation.context().checkpoint();
//!         Ok(())
//!     })
//!     .with_timeout(Duration::from_millis(20)),
//!     &RunnerConfig::default(),
//! );
//!
//! assert!(matches!(report.outcome, Outcome::TimedOut { .. }));
//! ```

mod case;
mod group;
mod report;

pub use case::{Invocation, TestCase};
pub use group::{run_test, TestGroup};
pub use report::{GroupReport, Outcome, TestReport};
