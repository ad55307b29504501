//! Per-session compaction state.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::types::{SchedulerError, SessionId};

/// Mutable compaction record for a single session.
///
/// Tracks whether a compaction is in flight and when the last one
/// completed. The only lifecycle is `Idle -> InProgress -> Idle`; the
/// transition methods reject any mispaired call as a caller bug.
///
/// Serializable so hosts can checkpoint scheduler state and restore it
/// across process restarts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionState {
    /// Session this record belongs to
    pub session_id: SessionId,
    /// When the last compaction completed; unset until the first one
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_compaction_at: Option<OffsetDateTime>,
    /// True while an invoked compaction has not been confirmed done
    pub compaction_in_progress: bool,
    /// When the in-flight compaction was started. Lets a caller-owned
    /// watchdog measure how long an unconfirmed compaction has been
    /// outstanding.
    #[serde(with = "time::serde::rfc3339::option")]
    pub compaction_started_at: Option<OffsetDateTime>,
}

impl CompactionState {
    /// Create the initial state for a newly seen session.
    #[must_use]
    pub const fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            last_compaction_at: None,
            compaction_in_progress: false,
            compaction_started_at: None,
        }
    }

    /// Returns true if a compaction is currently in flight.
    #[must_use]
    pub const fn is_in_progress(&self) -> bool {
        self.compaction_in_progress
    }

    /// Record that a compaction has been invoked for this session.
    ///
    /// # Errors
    /// Returns [`SchedulerError::InvalidState`] if a compaction is already
    /// in progress. Double-start is a caller bug, not a recoverable
    /// condition.
    pub fn begin_compaction(&mut self, now: OffsetDateTime) -> Result<(), SchedulerError> {
        if self.compaction_in_progress {
            return Err(SchedulerError::InvalidState(format!(
                "compaction already in progress for session {}",
                self.session_id
            )));
        }
        self.compaction_in_progress = true;
        self.compaction_started_at = Some(now);
        Ok(())
    }

    /// Record that the in-flight compaction finished successfully.
    ///
    /// Sets `last_compaction_at`, which starts the applicable cooldown.
    /// Not idempotent: every `begin_compaction` must be paired with exactly
    /// one completion or failure.
    ///
    /// # Errors
    /// Returns [`SchedulerError::InvalidState`] if no compaction was
    /// started.
    pub fn complete_compaction(&mut self, now: OffsetDateTime) -> Result<(), SchedulerError> {
        if !self.compaction_in_progress {
            return Err(SchedulerError::InvalidState(format!(
                "no compaction in progress for session {}",
                self.session_id
            )));
        }
        self.compaction_in_progress = false;
        self.compaction_started_at = None;
        // last_compaction_at never moves backwards, even if the caller's
        // clock does
        self.last_compaction_at = Some(match self.last_compaction_at {
            Some(previous) if previous > now => previous,
            _ => now,
        });
        Ok(())
    }

    /// Record that the in-flight compaction failed or was aborted.
    ///
    /// Clears the in-progress flag without touching `last_compaction_at`,
    /// so the session may retry immediately. This is the recovery path for
    /// a compaction attempt that did not complete.
    ///
    /// # Errors
    /// Returns [`SchedulerError::InvalidState`] if no compaction was
    /// started.
    pub fn fail_compaction(&mut self) -> Result<(), SchedulerError> {
        if !self.compaction_in_progress {
            return Err(SchedulerError::InvalidState(format!(
                "no compaction in progress for session {}",
                self.session_id
            )));
        }
        self.compaction_in_progress = false;
        self.compaction_started_at = None;
        Ok(())
    }
}
