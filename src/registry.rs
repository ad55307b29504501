//! Multi-session scheduling registry.
//!
//! When one process serves many sessions, each session needs its own
//! [`CompactionState`]. [`SessionRegistry`] keys states by session id in a
//! map guarded by a coarse lock used only for insertion, removal, and
//! lookup; the per-turn decision path locks the session's own entry, so
//! sessions never contend with each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use time::OffsetDateTime;

use crate::executor::CompactionExecutor;
use crate::scheduler::{CompactionScheduler, CompactionState, SchedulerConfig};
use crate::types::{CompactionRequest, Decision, SchedulerError, SessionId, SessionUsage};

type SessionEntry = Arc<Mutex<CompactionState>>;

/// Per-session compaction scheduling for a shared process.
///
/// The host runtime reports usage through [`report_usage`](Self::report_usage)
/// each turn and confirms compaction lifecycle transitions through the
/// `mark_compaction_*` operations, or lets
/// [`run_compaction`](Self::run_compaction) drive a full cycle against an
/// executor.
pub struct SessionRegistry {
    scheduler: CompactionScheduler,
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    /// Create a registry with the given configuration.
    ///
    /// # Errors
    /// Returns [`SchedulerError::InvalidConfig`] if the configuration does
    /// not validate.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        Ok(Self {
            scheduler: CompactionScheduler::new(config)?,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Create a registry with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            scheduler: CompactionScheduler::with_defaults(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        self.scheduler.config()
    }

    /// Number of sessions currently tracked.
    ///
    /// # Errors
    /// Returns an error if the session map lock is poisoned.
    pub fn session_count(&self) -> Result<usize> {
        let sessions = self.sessions.read().ok().context("session map lock poisoned")?;
        Ok(sessions.len())
    }

    fn entry(&self, session_id: &SessionId) -> Result<Option<SessionEntry>> {
        let sessions = self.sessions.read().ok().context("session map lock poisoned")?;
        Ok(sessions.get(&session_id.0).cloned())
    }

    fn existing_entry(&self, session_id: &SessionId) -> Result<SessionEntry> {
        self.entry(session_id)?
            .with_context(|| format!("unknown session {session_id}"))
    }

    fn entry_or_create(&self, session_id: &SessionId) -> Result<SessionEntry> {
        if let Some(entry) = self.entry(session_id)? {
            return Ok(entry);
        }
        let mut sessions = self.sessions.write().ok().context("session map lock poisoned")?;
        let entry = sessions.entry(session_id.0.clone()).or_insert_with(|| {
            debug!("Tracking new session (session={session_id})");
            Arc::new(Mutex::new(CompactionState::new(session_id.clone())))
        });
        Ok(Arc::clone(entry))
    }

    /// Report a usage sample for a session and get the scheduling decision.
    ///
    /// Creates the session's state the first time the id is seen.
    /// Non-blocking: this only evaluates and returns; it never performs
    /// I/O and never invokes an executor.
    ///
    /// # Errors
    /// Returns an error if `token_limit` is zero or a lock is poisoned.
    pub fn report_usage(
        &self,
        session_id: &SessionId,
        tokens_used: u64,
        token_limit: u64,
        now: OffsetDateTime,
    ) -> Result<Decision> {
        let usage = SessionUsage::new(tokens_used, token_limit)?;
        let entry = self.entry_or_create(session_id)?;
        let state = entry.lock().ok().context("session state lock poisoned")?;
        let decision = self.scheduler.evaluate(&usage, &state, now);

        if decision.requires_compaction() {
            info!(
                "Compaction warranted (session={session_id}, tokens_used={tokens_used}, \
                 token_limit={token_limit}, emergency={})",
                decision.is_emergency()
            );
        }

        Ok(decision)
    }

    /// Record that a compaction has been invoked for a session.
    ///
    /// # Errors
    /// Returns an error for an unknown session, a double-start, or a
    /// poisoned lock.
    pub fn mark_compaction_started(
        &self,
        session_id: &SessionId,
        now: OffsetDateTime,
    ) -> Result<()> {
        let entry = self.existing_entry(session_id)?;
        let mut state = entry.lock().ok().context("session state lock poisoned")?;
        state.begin_compaction(now)?;
        Ok(())
    }

    /// Record that a session's in-flight compaction completed.
    ///
    /// # Errors
    /// Returns an error for an unknown session, a completion without a
    /// matching start, or a poisoned lock.
    pub fn mark_compaction_complete(
        &self,
        session_id: &SessionId,
        now: OffsetDateTime,
    ) -> Result<()> {
        let entry = self.existing_entry(session_id)?;
        let mut state = entry.lock().ok().context("session state lock poisoned")?;
        state.complete_compaction(now)?;
        Ok(())
    }

    /// Record that a session's in-flight compaction failed or was aborted.
    ///
    /// # Errors
    /// Returns an error for an unknown session, a failure without a
    /// matching start, or a poisoned lock.
    pub fn mark_compaction_failed(&self, session_id: &SessionId) -> Result<()> {
        let entry = self.existing_entry(session_id)?;
        let mut state = entry.lock().ok().context("session state lock poisoned")?;
        state.fail_compaction()?;
        Ok(())
    }

    /// Discard a session's state when the host tears the session down.
    ///
    /// Removing an unknown session is a no-op, so teardown may be retried.
    ///
    /// # Errors
    /// Returns an error if the session map lock is poisoned.
    pub fn end_session(&self, session_id: &SessionId) -> Result<()> {
        let mut sessions = self.sessions.write().ok().context("session map lock poisoned")?;
        if sessions.remove(&session_id.0).is_some() {
            debug!("Session ended (session={session_id})");
        }
        Ok(())
    }

    /// Clone out a session's state for checkpointing.
    ///
    /// # Errors
    /// Returns an error if a lock is poisoned.
    pub fn snapshot(&self, session_id: &SessionId) -> Result<Option<CompactionState>> {
        let Some(entry) = self.entry(session_id)? else {
            return Ok(None);
        };
        let state = entry.lock().ok().context("session state lock poisoned")?;
        Ok(Some(state.clone()))
    }

    /// Reinstate a previously snapshotted session state, replacing any
    /// state currently held for that session.
    ///
    /// # Errors
    /// Returns an error if the session map lock is poisoned.
    pub fn restore(&self, state: CompactionState) -> Result<()> {
        let mut sessions = self.sessions.write().ok().context("session map lock poisoned")?;
        debug!("Restoring session state (session={})", state.session_id);
        sessions.insert(state.session_id.0.clone(), Arc::new(Mutex::new(state)));
        Ok(())
    }

    /// Drive one full compaction cycle for a session through `executor`.
    ///
    /// Marks the compaction started, invokes the executor (under
    /// `timeout` when given), then marks it complete on success or failed
    /// on error, timeout, or abort. Pairing the transitions here is what
    /// keeps a crashed or hung executor from leaving the session
    /// permanently in progress, which would silently disable all future
    /// compaction for it.
    ///
    /// # Errors
    /// Returns an error if the session is unknown, a compaction is
    /// already in flight, or the executor fails or times out.
    pub async fn run_compaction<E>(
        &self,
        request: &CompactionRequest,
        executor: &E,
        timeout: Option<std::time::Duration>,
    ) -> Result<()>
    where
        E: CompactionExecutor + ?Sized,
    {
        let session_id = &request.session_id;
        self.mark_compaction_started(session_id, OffsetDateTime::now_utc())?;

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, executor.compact(request)).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!(
                    "compaction timed out after {}ms",
                    limit.as_millis()
                )),
            },
            None => executor.compact(request).await,
        };

        match outcome {
            Ok(()) => {
                self.mark_compaction_complete(session_id, OffsetDateTime::now_utc())?;
                info!(
                    "Compaction completed (session={session_id}, emergency={})",
                    request.emergency
                );
                Ok(())
            }
            Err(error) => {
                // Clear the flag before surfacing the error so the session
                // can retry on the next turn
                if let Err(clear_error) = self.mark_compaction_failed(session_id) {
                    warn!(
                        "Failed to clear compaction flag (session={session_id}): {clear_error}"
                    );
                }
                warn!("Compaction failed (session={session_id}): {error}");
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::NullExecutor;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-08-06 12:00:00 UTC);

    struct FailingExecutor;

    #[async_trait]
    impl CompactionExecutor for FailingExecutor {
        async fn compact(&self, _request: &CompactionRequest) -> Result<()> {
            anyhow::bail!("summarization backend unavailable")
        }
    }

    struct SlowExecutor;

    #[async_trait]
    impl CompactionExecutor for SlowExecutor {
        async fn compact(&self, _request: &CompactionRequest) -> Result<()> {
            tokio::time::sleep(StdDuration::from_secs(600)).await;
            Ok(())
        }
    }

    struct CountingExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompactionExecutor for CountingExecutor {
        async fn compact(&self, _request: &CompactionRequest) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_report_usage_creates_session() -> Result<()> {
        let registry = SessionRegistry::with_defaults();
        let session_id = SessionId::from_string("s1");

        assert_eq!(registry.session_count()?, 0);
        assert_eq!(registry.config().min_tokens_for_compaction, 50_000);

        let decision = registry.report_usage(&session_id, 75_000, 100_000, NOW)?;
        assert_eq!(decision, Decision::Compact);
        assert_eq!(registry.session_count()?, 1);

        // Same session again does not duplicate the entry
        registry.report_usage(&session_id, 76_000, 100_000, NOW)?;
        assert_eq!(registry.session_count()?, 1);

        Ok(())
    }

    #[test]
    fn test_report_usage_rejects_zero_limit() {
        let registry = SessionRegistry::with_defaults();
        let session_id = SessionId::from_string("s1");

        let result = registry.report_usage(&session_id, 1_000, 0, NOW);
        assert!(result.is_err());
    }

    #[test]
    fn test_sessions_are_independent() -> Result<()> {
        let registry = SessionRegistry::with_defaults();
        let busy = SessionId::from_string("busy");
        let other = SessionId::from_string("other");

        registry.report_usage(&busy, 75_000, 100_000, NOW)?;
        registry.report_usage(&other, 75_000, 100_000, NOW)?;
        registry.mark_compaction_started(&busy, NOW)?;

        // The in-flight compaction silences only its own session
        assert_eq!(
            registry.report_usage(&busy, 95_000, 100_000, NOW)?,
            Decision::NoOp
        );
        assert_eq!(
            registry.report_usage(&other, 95_000, 100_000, NOW)?,
            Decision::EmergencyCompact
        );

        Ok(())
    }

    #[test]
    fn test_mark_on_unknown_session_errors() {
        let registry = SessionRegistry::with_defaults();
        let session_id = SessionId::from_string("never-seen");

        assert!(registry.mark_compaction_started(&session_id, NOW).is_err());
        assert!(registry.mark_compaction_complete(&session_id, NOW).is_err());
        assert!(registry.mark_compaction_failed(&session_id).is_err());
    }

    #[test]
    fn test_invalid_state_is_surfaced() -> Result<()> {
        let registry = SessionRegistry::with_defaults();
        let session_id = SessionId::from_string("s1");
        registry.report_usage(&session_id, 75_000, 100_000, NOW)?;

        registry.mark_compaction_started(&session_id, NOW)?;
        let error = registry
            .mark_compaction_started(&session_id, NOW)
            .expect_err("double start must fail");
        assert!(matches!(
            error.downcast_ref::<SchedulerError>(),
            Some(SchedulerError::InvalidState(_))
        ));

        Ok(())
    }

    #[test]
    fn test_end_session_discards_state() -> Result<()> {
        let registry = SessionRegistry::with_defaults();
        let session_id = SessionId::from_string("s1");

        registry.report_usage(&session_id, 75_000, 100_000, NOW)?;
        registry.mark_compaction_started(&session_id, NOW)?;
        registry.end_session(&session_id)?;
        assert_eq!(registry.session_count()?, 0);

        // Ending again is a no-op
        registry.end_session(&session_id)?;

        // A fresh report recreates the session from scratch, idle again
        let decision = registry.report_usage(&session_id, 75_000, 100_000, NOW)?;
        assert_eq!(decision, Decision::Compact);

        Ok(())
    }

    #[test]
    fn test_snapshot_and_restore() -> Result<()> {
        let registry = SessionRegistry::with_defaults();
        let session_id = SessionId::from_string("s1");

        registry.report_usage(&session_id, 75_000, 100_000, NOW)?;
        registry.mark_compaction_started(&session_id, NOW)?;

        let snapshot = registry.snapshot(&session_id)?.expect("snapshot exists");
        assert!(snapshot.is_in_progress());

        // Snapshots survive a JSON round trip for host-side persistence
        let json = serde_json::to_string(&snapshot)?;
        let restored: CompactionState = serde_json::from_str(&json)?;

        registry.end_session(&session_id)?;
        registry.restore(restored)?;

        // The restored in-progress flag still guards the session
        assert_eq!(
            registry.report_usage(&session_id, 95_000, 100_000, NOW)?,
            Decision::NoOp
        );

        assert!(registry.snapshot(&SessionId::from_string("missing"))?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_run_compaction_success() -> Result<()> {
        let registry = SessionRegistry::with_defaults();
        let session_id = SessionId::from_string("s1");
        let executor = CountingExecutor {
            calls: AtomicUsize::new(0),
        };

        let decision = registry.report_usage(&session_id, 75_000, 100_000, NOW)?;
        let request = decision
            .into_request(session_id.clone())
            .expect("compaction warranted");

        registry.run_compaction(&request, &executor, None).await?;
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

        let state = registry.snapshot(&session_id)?.expect("snapshot exists");
        assert!(!state.is_in_progress());
        assert!(state.last_compaction_at.is_some());

        Ok(())
    }

    #[tokio::test]
    async fn test_run_compaction_failure_clears_flag() -> Result<()> {
        let registry = SessionRegistry::with_defaults();
        let session_id = SessionId::from_string("s1");

        registry.report_usage(&session_id, 75_000, 100_000, NOW)?;
        let request = CompactionRequest {
            session_id: session_id.clone(),
            emergency: false,
        };

        let result = registry.run_compaction(&request, &FailingExecutor, None).await;
        assert!(result.is_err());

        let state = registry.snapshot(&session_id)?.expect("snapshot exists");
        assert!(!state.is_in_progress());
        // A failed attempt starts no cooldown
        assert!(state.last_compaction_at.is_none());

        // Retry succeeds
        registry.run_compaction(&request, &NullExecutor, None).await?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_compaction_timeout_clears_flag() -> Result<()> {
        let registry = SessionRegistry::with_defaults();
        let session_id = SessionId::from_string("s1");

        registry.report_usage(&session_id, 95_000, 100_000, NOW)?;
        let request = CompactionRequest {
            session_id: session_id.clone(),
            emergency: true,
        };

        let result = registry
            .run_compaction(&request, &SlowExecutor, Some(StdDuration::from_secs(30)))
            .await;
        assert!(result.is_err());

        // The timeout guard returned the session to idle instead of
        // leaving it stuck in progress
        let state = registry.snapshot(&session_id)?.expect("snapshot exists");
        assert!(!state.is_in_progress());

        Ok(())
    }

    #[tokio::test]
    async fn test_run_compaction_rejects_concurrent_cycle() -> Result<()> {
        let registry = SessionRegistry::with_defaults();
        let session_id = SessionId::from_string("s1");

        registry.report_usage(&session_id, 75_000, 100_000, NOW)?;
        registry.mark_compaction_started(&session_id, NOW)?;

        let request = CompactionRequest {
            session_id: session_id.clone(),
            emergency: false,
        };
        let result = registry.run_compaction(&request, &NullExecutor, None).await;
        assert!(result.is_err());

        // The original in-flight compaction is untouched
        let state = registry.snapshot(&session_id)?.expect("snapshot exists");
        assert!(state.is_in_progress());

        Ok(())
    }
}
