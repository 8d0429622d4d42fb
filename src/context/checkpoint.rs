//! Checkpoints: named countdowns owned by a test context.

use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crate::context::test_context::ContextShared;
use crate::error::Error;

struct CheckpointInner {
    id: u64,
    name: String,
    required: usize,
    remaining: AtomicUsize,
    strict: bool,
    call_site: &'static Location<'static>,
    owner: Weak<ContextShared>,
}

/// A countdown that has to reach zero before its context can complete.
///
/// Created by [`TestContext::checkpoint`](crate::context::TestContext::checkpoint)
/// and friends. Clones refer to the same countdown, so a checkpoint can be
/// handed to several threads that each [`flag`](Checkpoint::flag) it.
///
/// Flagging a strict checkpoint more often than required fails the owning
/// context. Flags arriving after the context was dropped are ignored.
#[derive(Clone)]
pub struct Checkpoint {
    inner: Arc<CheckpointInner>,
}

impl Checkpoint {
    pub(crate) fn new(
        id: u64,
        name: String,
        required: usize,
        strict: bool,
        call_site: &'static Location<'static>,
        owner: Weak<ContextShared>,
    ) -> Self {
        Self {
            inner: Arc::new(CheckpointInner {
                id,
                name,
                required,
                remaining: AtomicUsize::new(required),
                strict,
                call_site,
                owner,
            }),
        }
    }

    /// Records one pass.
    ///
    /// Exactly one caller observes the count reaching zero, and only that
    /// caller notifies the context.
    pub fn flag(&self) {
        let previous = self
            .inner
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        match previous {
            Ok(1) => {
                tracing::debug!(name = %self.inner.name, "checkpoint satisfied");
                if let Some(owner) = self.inner.owner.upgrade() {
                    owner.checkpoint_satisfied(self.inner.id);
                }
            }
            Ok(_) => {}
            Err(_) if self.inner.strict => {
                tracing::warn!(
                    name = %self.inner.name,
                    required = self.inner.required,
                    "strict checkpoint flagged too many times"
                );
                if let Some(owner) = self.inner.owner.upgrade() {
                    owner.fail(Error::CheckpointOverflow {
                        name: self.inner.name.clone(),
                        required: self.inner.required,
                    });
                }
            }
            Err(_) => {
                tracing::trace!(name = %self.inner.name, "ignoring extra flag on lax checkpoint");
            }
        }
    }

    /// Returns the checkpoint name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns how many passes were required at creation.
    #[must_use]
    pub fn required(&self) -> usize {
        self.inner.required
    }

    /// Returns how many passes are still missing.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.inner.remaining.load(Ordering::Acquire)
    }

    /// Returns true once the checkpoint was flagged enough times.
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        self.remaining() == 0
    }

    /// Returns true if over-flagging fails the context.
    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.inner.strict
    }

    /// Returns where the checkpoint was created.
    #[must_use]
    pub fn call_site(&self) -> &'static Location<'static> {
        self.inner.call_site
    }
}

impl fmt::Debug for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checkpoint")
            .field("name", &self.inner.name)
            .field("required", &self.inner.required)
            .field("remaining", &self.remaining())
            .field("strict", &self.inner.strict)
            .field("call_site", &self.inner.call_site)
            .finish()
    }
}
