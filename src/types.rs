//! Core types for the compaction scheduler.
//!
//! This module contains the fundamental types used throughout the crate:
//!
//! - [`SessionId`]: Unique identifier for agent sessions
//! - [`SessionUsage`]: A validated token-usage sample for one session
//! - [`Decision`]: Outcome of a scheduling evaluation
//! - [`CompactionRequest`]: Instruction handed to a compaction executor
//! - [`SchedulerError`]: Typed errors for caller and configuration bugs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an agent session
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error from the scheduler core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// A lifecycle transition was requested that the session's state does
    /// not allow (double-start, complete or fail without a matching start).
    /// Always a caller bug, never silently ignored.
    InvalidState(String),
    /// Configuration or reported usage rejected up front, before any
    /// evaluation can produce a nonsensical result.
    InvalidConfig(String),
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidState(message) => write!(f, "invalid state: {message}"),
            Self::InvalidConfig(message) => write!(f, "invalid configuration: {message}"),
        }
    }
}

impl std::error::Error for SchedulerError {}

/// A single token-usage sample for a session, reported by the host runtime.
///
/// Construction validates the sample; a zero `token_limit` is rejected so
/// the usage ratio is always well defined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionUsage {
    tokens_used: u64,
    token_limit: u64,
}

impl SessionUsage {
    /// Create a usage sample.
    ///
    /// # Errors
    /// Returns [`SchedulerError::InvalidConfig`] if `token_limit` is zero.
    pub fn new(tokens_used: u64, token_limit: u64) -> Result<Self, SchedulerError> {
        if token_limit == 0 {
            return Err(SchedulerError::InvalidConfig(
                "token_limit must be positive".to_string(),
            ));
        }
        Ok(Self {
            tokens_used,
            token_limit,
        })
    }

    /// Current estimated token count of the session's live context.
    #[must_use]
    pub const fn tokens_used(&self) -> u64 {
        self.tokens_used
    }

    /// Hard context-window ceiling for the session's model.
    #[must_use]
    pub const fn token_limit(&self) -> u64 {
        self.token_limit
    }

    /// Fraction of the context window in use.
    ///
    /// May exceed 1.0 when usage is measured after the limit was already
    /// breached.
    #[must_use]
    pub fn usage_ratio(&self) -> f64 {
        self.tokens_used as f64 / self.token_limit as f64
    }
}

/// Outcome of a scheduling evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// No compaction is warranted right now
    NoOp,
    /// A normal compaction should be invoked
    Compact,
    /// Compaction is mandatory immediately, overriding cooldown pacing
    EmergencyCompact,
}

impl Decision {
    /// Returns true if the caller should invoke compaction.
    #[must_use]
    pub const fn requires_compaction(&self) -> bool {
        !matches!(self, Self::NoOp)
    }

    /// Returns true if cooldown pacing was bypassed.
    #[must_use]
    pub const fn is_emergency(&self) -> bool {
        matches!(self, Self::EmergencyCompact)
    }

    /// Convert the decision into an executor instruction.
    ///
    /// Returns `None` for [`Decision::NoOp`].
    #[must_use]
    pub fn into_request(self, session_id: SessionId) -> Option<CompactionRequest> {
        match self {
            Self::NoOp => None,
            Self::Compact => Some(CompactionRequest {
                session_id,
                emergency: false,
            }),
            Self::EmergencyCompact => Some(CompactionRequest {
                session_id,
                emergency: true,
            }),
        }
    }
}

/// Instruction handed to a compaction executor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionRequest {
    /// Session whose context should be compacted
    pub session_id: SessionId,
    /// Executors may choose faster or lossier strategies when set
    pub emergency: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_display() {
        let id = SessionId::from_string("session-42");
        assert_eq!(id.to_string(), "session-42");
    }

    #[test]
    fn test_session_id_new_is_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn test_usage_rejects_zero_limit() {
        let result = SessionUsage::new(1000, 0);
        assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
    }

    #[test]
    fn test_usage_ratio() {
        let usage = SessionUsage::new(50_000, 100_000).expect("valid usage");
        assert_eq!(usage.tokens_used(), 50_000);
        assert_eq!(usage.token_limit(), 100_000);
        assert!((usage.usage_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_usage_ratio_can_exceed_one() {
        // Usage measured after the limit was already breached
        let usage = SessionUsage::new(120_000, 100_000).expect("valid usage");
        assert!(usage.usage_ratio() > 1.0);
    }

    #[test]
    fn test_decision_predicates() {
        assert!(!Decision::NoOp.requires_compaction());
        assert!(Decision::Compact.requires_compaction());
        assert!(Decision::EmergencyCompact.requires_compaction());
        assert!(!Decision::Compact.is_emergency());
        assert!(Decision::EmergencyCompact.is_emergency());
    }

    #[test]
    fn test_decision_into_request() {
        let session_id = SessionId::from_string("s1");

        assert!(Decision::NoOp.into_request(session_id.clone()).is_none());

        let request = Decision::Compact
            .into_request(session_id.clone())
            .expect("request for Compact");
        assert_eq!(request.session_id, session_id);
        assert!(!request.emergency);

        let request = Decision::EmergencyCompact
            .into_request(session_id)
            .expect("request for EmergencyCompact");
        assert!(request.emergency);
    }

    #[test]
    fn test_request_serde_round_trip() -> anyhow::Result<()> {
        let request = CompactionRequest {
            session_id: SessionId::from_string("s1"),
            emergency: true,
        };

        let json = serde_json::to_string(&request)?;
        let restored: CompactionRequest = serde_json::from_str(&json)?;
        assert_eq!(restored, request);

        // Decisions serialize with snake_case tags
        assert_eq!(
            serde_json::to_string(&Decision::EmergencyCompact)?,
            "\"emergency_compact\""
        );

        Ok(())
    }

    #[test]
    fn test_error_display() {
        let error = SchedulerError::InvalidState("double start".to_string());
        assert_eq!(error.to_string(), "invalid state: double start");

        let error = SchedulerError::InvalidConfig("bad threshold".to_string());
        assert_eq!(error.to_string(), "invalid configuration: bad threshold");
    }
}
