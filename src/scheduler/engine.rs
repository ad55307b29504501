//! The compaction decision engine.

use log::debug;
use time::OffsetDateTime;

use super::config::SchedulerConfig;
use super::state::CompactionState;
use crate::types::{Decision, SchedulerError, SessionUsage};

/// Decides when a session must compact its context.
///
/// The scheduler holds a validated configuration and nothing else; each
/// [`evaluate`](Self::evaluate) call is a pure function of the usage
/// sample, the session's [`CompactionState`], and the caller-supplied
/// clock. Two schedulers built from identical configuration produce
/// identical decision sequences for identical inputs.
pub struct CompactionScheduler {
    config: SchedulerConfig,
}

impl CompactionScheduler {
    /// Create a scheduler with the given configuration.
    ///
    /// # Errors
    /// Returns [`SchedulerError::InvalidConfig`] if the configuration does
    /// not validate. Malformed configuration is rejected here, never at
    /// evaluation time.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Create a scheduler with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            config: SchedulerConfig::default(),
        }
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Decide whether `usage` warrants compacting the session now.
    ///
    /// Total over well-formed inputs and free of side effects: it never
    /// performs I/O, never invokes an executor, and never mutates `state`.
    /// Returning [`Decision::Compact`] or [`Decision::EmergencyCompact`]
    /// does not start a compaction; the caller confirms what actually
    /// happened through the `mark_compaction_*` operations, so a decision
    /// the caller declines to act on leaves the session untouched.
    #[must_use]
    pub fn evaluate(
        &self,
        usage: &SessionUsage,
        state: &CompactionState,
        now: OffsetDateTime,
    ) -> Decision {
        // A compaction already in flight is assumed to resolve the
        // pressure; never issue a second concurrent one for the same
        // session, even above the emergency line.
        if state.is_in_progress() {
            return Decision::NoOp;
        }

        if usage.tokens_used() < self.config.min_tokens_for_compaction {
            return Decision::NoOp;
        }

        let ratio = usage.usage_ratio();

        if ratio >= self.config.emergency_threshold {
            // Past this line the next request risks an unrecoverable
            // "context exceeded" failure; pacing yields to correctness.
            debug!(
                "Emergency compaction warranted (session={}, ratio={ratio:.3})",
                state.session_id
            );
            return Decision::EmergencyCompact;
        }

        if ratio < self.config.default_threshold {
            return Decision::NoOp;
        }

        // Between the two thresholds the scheduler compacts on the reduced
        // cooldown. A configuration that zeroes default_threshold opts out
        // of the elevated band entirely, so every compaction paces on the
        // normal cooldown instead.
        let cooldown_ms = if self.config.default_threshold > 0.0 {
            self.config.high_usage_cooldown_ms
        } else {
            self.config.normal_cooldown_ms
        };

        if cooldown_elapsed(state.last_compaction_at, now, cooldown_ms) {
            debug!(
                "Compaction warranted (session={}, ratio={ratio:.3}, cooldown_ms={cooldown_ms})",
                state.session_id
            );
            Decision::Compact
        } else {
            Decision::NoOp
        }
    }

    /// Record that the caller has invoked a compaction for this session.
    ///
    /// # Errors
    /// Returns [`SchedulerError::InvalidState`] on double-start.
    pub fn mark_compaction_started(
        &self,
        state: &mut CompactionState,
        now: OffsetDateTime,
    ) -> Result<(), SchedulerError> {
        state.begin_compaction(now)
    }

    /// Record that the in-flight compaction completed; starts the cooldown.
    ///
    /// # Errors
    /// Returns [`SchedulerError::InvalidState`] if no compaction was
    /// started.
    pub fn mark_compaction_complete(
        &self,
        state: &mut CompactionState,
        now: OffsetDateTime,
    ) -> Result<(), SchedulerError> {
        state.complete_compaction(now)
    }

    /// Record that the in-flight compaction failed or was aborted,
    /// allowing immediate retry.
    ///
    /// # Errors
    /// Returns [`SchedulerError::InvalidState`] if no compaction was
    /// started.
    pub fn mark_compaction_failed(
        &self,
        state: &mut CompactionState,
    ) -> Result<(), SchedulerError> {
        state.fail_compaction()
    }
}

/// An unset `last_compaction_at` counts as infinitely long ago. A negative
/// elapsed time (caller clock skew) never satisfies the cooldown.
fn cooldown_elapsed(last: Option<OffsetDateTime>, now: OffsetDateTime, cooldown_ms: u64) -> bool {
    match last {
        None => true,
        Some(last) => (now - last).whole_milliseconds() >= i128::from(cooldown_ms),
    }
}
