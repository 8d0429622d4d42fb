//! # testkit-context 🧰
//!
//! > Completion contexts for tests that finish on other threads
//!
//! **testkit-context** lets test code that starts work on callback or worker
//! threads report success or failure back to the thread waiting for the
//! test, within a bounded time, and releases the resources the test used
//! exactly once.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use testkit_context::prelude::*;
//!
//! let context = TestContext::new();
//! let checkpoint = context.checkpoints(2);
//!
//! for _ in 0..2 {
//!     let checkpoint = checkpoint.clone();
//!     std::thread::spawn(move || {
//!         std::thread::sleep(Duration::from_millis(10));
//!         checkpoint.flag();
//!     });
//! }
//!
//! assert!(context.await_completion(Duration::from_secs(1)));
//! assert!(context.completed());
//! ```
//!
//! ## Features
//!
//! - ✅ **Test Contexts** - One verdict from many threads, first one wins
//! - 🚩 **Checkpoints** - Countdowns that complete the test when exhausted
//! - 🔁 **Result Adapters** - Turn `Result` callbacks into verdicts
//! - 📦 **Scoped Resources** - Released exactly once when their scope ends
//! - 🧪 **Runner** - Timeouts, fixtures, hooks and one outcome per test

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod context;
pub mod error;
pub mod fixture;
pub mod runner;
pub mod scope;

/// Prelude for convenient imports
///
/// ```rust
/// use testkit_context::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{ContextConfig, RunnerConfig};
    pub use crate::context::{Checkpoint, ContextState, TestContext};
    pub use crate::error::{Error, Result};
    pub use crate::fixture::{FixtureRegistry, FixtureScope};
    pub use crate::runner::{run_test, Invocation, Outcome, TestCase, TestGroup};
    pub use crate::scope::{Resource, ScopeStore};
}

// Re-exports
pub use error::{Error, Result};

// Re-export the test macro when macros feature is enabled
#[cfg(feature = "macros")]
pub use testkit_context_macros::test;
