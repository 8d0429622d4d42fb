//! The `TestContext` implementation.

use std::fmt;
use std::panic::{self, AssertUnwindSafe, Location};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::config::ContextConfig;
use crate::context::checkpoint::Checkpoint;
use crate::error::{panic_message, BoxError, Error};

/// The state of a [`TestContext`].
///
/// A timeout is not a state: a context that is still `Pending` when the
/// waiting side gives up is reported as timed out by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextState {
    /// No verdict yet.
    Pending,
    /// The test succeeded.
    Completed,
    /// The test failed; the cause is available from [`TestContext::cause`].
    Failed,
}

impl ContextState {
    /// Returns true for `Completed` and `Failed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, ContextState::Pending)
    }
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextState::Pending => write!(f, "Pending"),
            ContextState::Completed => write!(f, "Completed"),
            ContextState::Failed => write!(f, "Failed"),
        }
    }
}

/// A checkpoint that has not been flagged enough times yet.
#[derive(Clone, Debug)]
struct Outstanding {
    id: u64,
    call_site: &'static Location<'static>,
}

struct ContextInner {
    state: ContextState,
    cause: Option<Error>,
    /// `complete_now` was called while checkpoints were outstanding.
    completion_requested: bool,
    outstanding: Vec<Outstanding>,
}

/// State shared between a context, its clones and its checkpoints.
pub(crate) struct ContextShared {
    config: ContextConfig,
    inner: Mutex<ContextInner>,
    terminal: Condvar,
    next_checkpoint: AtomicU64,
}

impl ContextShared {
    fn transition(&self, inner: &mut ContextInner, state: ContextState, cause: Option<Error>) {
        inner.state = state;
        inner.cause = cause;
        match &inner.cause {
            Some(cause) => tracing::debug!(%state, %cause, "test context reached terminal state"),
            None => tracing::debug!(%state, "test context reached terminal state"),
        }
        self.terminal.notify_all();
    }

    fn complete(&self) {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            tracing::trace!(state = %inner.state, "ignoring completion of terminated context");
            return;
        }
        if inner.outstanding.is_empty() || !self.config.complete_now_waits_for_checkpoints {
            self.transition(&mut inner, ContextState::Completed, None);
        } else {
            tracing::debug!(
                outstanding = inner.outstanding.len(),
                "completion requested, waiting for checkpoints"
            );
            inner.completion_requested = true;
        }
    }

    pub(crate) fn fail(&self, cause: Error) {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            tracing::trace!(state = %inner.state, %cause, "ignoring failure of terminated context");
            return;
        }
        self.transition(&mut inner, ContextState::Failed, Some(cause));
    }

    fn register(&self, call_site: &'static Location<'static>) -> u64 {
        let id = self.next_checkpoint.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        if !inner.state.is_terminal() {
            inner.outstanding.push(Outstanding { id, call_site });
        }
        id
    }

    /// Called exactly once per checkpoint, by the flag that brought it to zero.
    pub(crate) fn checkpoint_satisfied(&self, id: u64) {
        let mut inner = self.inner.lock();
        inner.outstanding.retain(|checkpoint| checkpoint.id != id);
        if inner.state.is_terminal() || !inner.outstanding.is_empty() {
            return;
        }
        if inner.completion_requested || self.config.complete_on_checkpoints {
            self.transition(&mut inner, ContextState::Completed, None);
        }
    }

    pub(crate) fn strict_checkpoints(&self) -> bool {
        self.config.strict_checkpoints
    }
}

/// Aggregates the outcome of asynchronous test code into a single verdict.
///
/// A `TestContext` starts `Pending`. The first call that reaches a verdict
/// wins: [`complete_now`] (or flagging the last [`Checkpoint`]) makes it
/// `Completed`, [`fail_now`] or a failed [`verify`] makes it `Failed`. Every
/// later signal is discarded.
///
/// Contexts are cheap to clone; clones share state and may be moved to any
/// thread.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use testkit_context::context::TestContext;
///
/// let context = TestContext::new();
/// let checkpoint = context.checkpoints(2);
///
/// let workers: Vec<_> = (0..2)
///     .map(|_| {
///         let checkpoint = checkpoint.clone();
///         std::thread::spawn(move || checkpoint.flag())
///     })
///     .collect();
///
/// assert!(context.await_completion(Duration::from_secs(1)));
/// assert!(context.completed());
/// # for worker in workers { worker.join().unwrap(); }
/// ```
///
/// [`complete_now`]: TestContext::complete_now
/// [`fail_now`]: TestContext::fail_now
/// [`verify`]: TestContext::verify
#[derive(Clone)]
pub struct TestContext {
    pub(crate) shared: Arc<ContextShared>,
}

impl TestContext {
    /// Creates a new context with the default [`ContextConfig`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ContextConfig::default())
    }

    /// Creates a new context with the given completion rules.
    #[must_use]
    pub fn with_config(config: ContextConfig) -> Self {
        Self {
            shared: Arc::new(ContextShared {
                config,
                inner: Mutex::new(ContextInner {
                    state: ContextState::Pending,
                    cause: None,
                    completion_requested: false,
                    outstanding: Vec::new(),
                }),
                terminal: Condvar::new(),
                next_checkpoint: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the completion rules of this context.
    #[must_use]
    pub fn config(&self) -> &ContextConfig {
        &self.shared.config
    }

    /// Completes the test.
    ///
    /// With checkpoints outstanding, the request is recorded and the context
    /// completes once they are all flagged (unless configured with
    /// [`ContextConfig::complete_now_immediately`]). Does nothing once the
    /// context has a verdict.
    pub fn complete_now(&self) {
        self.shared.complete();
    }

    /// Fails the test with `cause`, regardless of outstanding checkpoints.
    ///
    /// Does nothing once the context has a verdict.
    pub fn fail_now(&self, cause: impl Into<BoxError>) {
        self.shared.fail(Error::from_boxed(cause.into()));
    }

    /// Runs `block` on the calling thread and fails the context if it panics.
    ///
    /// This is how assertions in callbacks running on other threads become
    /// test failures:
    ///
    /// ```rust
    /// use testkit_context::context::TestContext;
    ///
    /// let context = TestContext::new();
    /// let handle = context.clone();
    /// std::thread::spawn(move || {
    ///     handle.verify(|| assert_eq!(1 + 1, 3));
    /// })
    /// .join()
    /// .unwrap();
    ///
    /// assert!(context.failed());
    /// ```
    pub fn verify<F>(&self, block: F) -> &Self
    where
        F: FnOnce(),
    {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(block)) {
            self.shared
                .fail(Error::AssertionFailed(panic_message(payload.as_ref())));
        }
        self
    }

    /// Like [`verify`](Self::verify) for blocks that return a `Result`.
    ///
    /// An `Err` fails the context with that error.
    pub fn try_verify<F, E>(&self, block: F) -> &Self
    where
        F: FnOnce() -> Result<(), E>,
        E: Into<BoxError>,
    {
        match panic::catch_unwind(AssertUnwindSafe(block)) {
            Ok(Ok(())) => {}
            Ok(Err(error)) => self.shared.fail(Error::from_boxed(error.into())),
            Err(payload) => self
                .shared
                .fail(Error::AssertionFailed(panic_message(payload.as_ref()))),
        }
        self
    }

    /// Creates a checkpoint that must be flagged once.
    #[must_use]
    #[track_caller]
    pub fn checkpoint(&self) -> Checkpoint {
        self.create_checkpoint(None, 1, self.shared.strict_checkpoints(), Location::caller())
    }

    /// Creates a checkpoint that must be flagged `required` times.
    ///
    /// # Panics
    ///
    /// Panics if `required` is zero.
    #[must_use]
    #[track_caller]
    pub fn checkpoints(&self, required: usize) -> Checkpoint {
        self.create_checkpoint(
            None,
            required,
            self.shared.strict_checkpoints(),
            Location::caller(),
        )
    }

    /// Creates a named checkpoint that must be flagged `required` times.
    ///
    /// # Panics
    ///
    /// Panics if `required` is zero.
    #[must_use]
    #[track_caller]
    pub fn checkpoint_named(&self, name: impl Into<String>, required: usize) -> Checkpoint {
        self.create_checkpoint(
            Some(name.into()),
            required,
            self.shared.strict_checkpoints(),
            Location::caller(),
        )
    }

    /// Creates a checkpoint that ignores being flagged too often.
    ///
    /// # Panics
    ///
    /// Panics if `required` is zero.
    #[must_use]
    #[track_caller]
    pub fn lax_checkpoint(&self, required: usize) -> Checkpoint {
        self.create_checkpoint(None, required, false, Location::caller())
    }

    fn create_checkpoint(
        &self,
        name: Option<String>,
        required: usize,
        strict: bool,
        call_site: &'static Location<'static>,
    ) -> Checkpoint {
        assert!(required >= 1, "a checkpoint needs at least one pass");
        let id = self.shared.register(call_site);
        let name = name.unwrap_or_else(|| format!("checkpoint-{id}"));
        tracing::debug!(%name, required, %call_site, "checkpoint created");
        Checkpoint::new(id, name, required, strict, call_site, Arc::downgrade(&self.shared))
    }

    /// Blocks until the context has a verdict or `timeout` elapses.
    ///
    /// Returns whether a verdict was reached, not which one. A `false` return
    /// leaves the context `Pending`; reporting the timeout is up to the caller.
    pub fn await_completion(&self, timeout: Duration) -> bool {
        let mut inner = self.shared.inner.lock();
        let _ = self.shared.terminal.wait_while_for(
            &mut inner,
            |inner| !inner.state.is_terminal(),
            timeout,
        );
        inner.state.is_terminal()
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ContextState {
        self.shared.inner.lock().state
    }

    /// Returns true once the context has a verdict.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state().is_terminal()
    }

    /// Returns true if the test succeeded.
    #[must_use]
    pub fn completed(&self) -> bool {
        self.state() == ContextState::Completed
    }

    /// Returns true if the test failed.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.state() == ContextState::Failed
    }

    /// Returns the failure cause, if the test failed.
    #[must_use]
    pub fn cause(&self) -> Option<Error> {
        self.shared.inner.lock().cause.clone()
    }

    /// Returns the number of checkpoints not flagged enough times yet.
    #[must_use]
    pub fn outstanding_checkpoints(&self) -> usize {
        self.shared.inner.lock().outstanding.len()
    }

    /// Returns where the outstanding checkpoints were created.
    ///
    /// Useful to explain a timeout.
    #[must_use]
    pub fn unsatisfied_checkpoint_call_sites(&self) -> Vec<&'static Location<'static>> {
        self.shared
            .inner
            .lock()
            .outstanding
            .iter()
            .map(|checkpoint| checkpoint.call_site)
            .collect()
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("TestContext")
            .field("state", &inner.state)
            .field("cause", &inner.cause)
            .field("outstanding_checkpoints", &inner.outstanding.len())
            .finish_non_exhaustive()
    }
}
