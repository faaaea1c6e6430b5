//! Configuration for the MAS runtime.
//!
//! Intentionally minimal and code-constructed, the same way
//! [`CloudLLMConfig`] in the reference crate avoids pulling in a
//! file-parsing dependency: users build a [`MasConfig`] by hand or take the
//! default.

use std::time::Duration;

/// Global tunables for the runtime's worker and dispatcher loops.
///
/// # Example
///
/// ```rust
/// use mas_core::MasConfig;
/// use std::time::Duration;
///
/// let config = MasConfig {
///     worker_poll_interval: Duration::from_millis(250),
///     ..MasConfig::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct MasConfig {
    /// How long an agent's worker loop parks when `step_lock` is non-empty
    /// or the ready queue is empty.
    pub worker_poll_interval: Duration,
    /// How long the dispatcher sleeps between drain passes over every
    /// task's communication queue.
    pub dispatcher_poll_interval: Duration,
    /// Maximum number of times the planning skill will re-prompt after a
    /// whitelist violation before failing the step.
    pub planning_retry_limit: u32,
}

impl Default for MasConfig {
    /// Mirrors the ~1 second busy-poll interval of the reference
    /// implementation's worker loop.
    fn default() -> Self {
        Self {
            worker_poll_interval: Duration::from_millis(1000),
            dispatcher_poll_interval: Duration::from_millis(200),
            planning_retry_limit: 1,
        }
    }
}
