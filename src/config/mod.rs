//! Configuration for test contexts and the runner.
//!
//! Both configs are plain builders: start from `new()` (or `Default`) and
//! chain the setters you need.
//!
//! ```rust
//! use std::time::Duration;
//! use testkit_context::config::{ContextConfig, RunnerConfig};
//!
//! let config = RunnerConfig::new()
//!     .default_timeout(Duration::from_secs(5))
//!     .context(ContextConfig::new().complete_now_immediately());
//!
//! assert_eq!(config.default_timeout, Duration::from_secs(5));
//! assert!(!config.context.complete_now_waits_for_checkpoints);
//! ```

use std::time::Duration;

/// Timeout applied when neither the test nor its group declares one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Completion rules for a [`TestContext`](crate::context::TestContext).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextConfig {
    /// Complete as soon as the last outstanding checkpoint is flagged, even
    /// when `complete_now` was never called.
    pub complete_on_checkpoints: bool,
    /// When checkpoints are outstanding, `complete_now` only records the
    /// request and completion happens once they are all flagged. When false,
    /// `complete_now` completes immediately and abandons them.
    pub complete_now_waits_for_checkpoints: bool,
    /// Over-flagging a checkpoint fails the context. Lax checkpoints
    /// created with `lax_checkpoint` ignore this setting.
    pub strict_checkpoints: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            complete_on_checkpoints: true,
            complete_now_waits_for_checkpoints: true,
            strict_checkpoints: true,
        }
    }
}

impl ContextConfig {
    /// Create a new default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Only complete once `complete_now` was called, even after every
    /// checkpoint has been flagged.
    #[must_use]
    pub fn require_complete_now(mut self) -> Self {
        self.complete_on_checkpoints = false;
        self
    }

    /// Let `complete_now` complete immediately, abandoning outstanding checkpoints.
    #[must_use]
    pub fn complete_now_immediately(mut self) -> Self {
        self.complete_now_waits_for_checkpoints = false;
        self
    }

    /// Ignore over-flagged checkpoints instead of failing.
    #[must_use]
    pub fn lax_checkpoints(mut self) -> Self {
        self.strict_checkpoints = false;
        self
    }
}

/// Configuration for the [`runner`](crate::runner).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Timeout used when neither test case nor group sets one.
    pub default_timeout: Duration,
    /// Rules for every context the runner creates.
    pub context: ContextConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            context: ContextConfig::default(),
        }
    }
}

impl RunnerConfig {
    /// Create a new default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fallback timeout.
    #[must_use]
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set the context rules.
    #[must_use]
    pub fn context(mut self, context: ContextConfig) -> Self {
        self.context = context;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_config_default() {
        let config = ContextConfig::default();

        assert!(config.complete_on_checkpoints);
        assert!(config.complete_now_waits_for_checkpoints);
        assert!(config.strict_checkpoints);
    }

    #[test]
    fn test_context_config_builder() {
        let config = ContextConfig::new()
            .require_complete_now()
            .complete_now_immediately()
            .lax_checkpoints();

        assert!(!config.complete_on_checkpoints);
        assert!(!config.complete_now_waits_for_checkpoints);
        assert!(!config.strict_checkpoints);
    }

    #[test]
    fn test_runner_config_default() {
        let config = RunnerConfig::default();

        assert_eq!(config.default_timeout, Duration::from_secs(30));
        assert_eq!(config.context, ContextConfig::default());
    }
}
