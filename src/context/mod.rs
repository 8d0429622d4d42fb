//! Completion contexts for tests that finish on other threads.
//!
//! A [`TestContext`] collects the outcome of work running on callback or
//! worker threads and hands a single verdict to the thread waiting for the
//! test:
//!
//! - [`TestContext::complete_now`] and [`TestContext::fail_now`] set the verdict directly
//! - [`TestContext::verify`] turns a panicking assertion into a failure
//! - [`Checkpoint`]s complete the context once all of them are flagged
//! - [`TestContext::succeeding`] and friends adapt `Result` callbacks
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use testkit_context::context::TestContext;
//!
//! let context = TestContext::new();
//! let handle = context.clone();
//!
//! std::thread::spawn(move || {
//!     handle.verify(|| assert!(true));
//!     handle.complete_now();
//! });
//!
//! assert!(context.await_completion(Duration::from_secs(1)));
//! assert!(context.completed());
//! ```

mod checkpoint;
mod handler;
mod test_context;

pub use checkpoint::Checkpoint;
pub use test_context::{ContextState, TestContext};
