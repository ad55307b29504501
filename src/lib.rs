//! Compaction scheduling for long-running agent sessions.
//!
//! This crate decides *when* a conversational agent session must compact
//! (summarize/compress) its accumulated context so token usage never
//! exceeds the model's context window, and enforces *how often* compaction
//! may repeat:
//! - Threshold-based triggering with an absolute token floor
//! - Two-tier cooldown pacing that tightens as usage rises
//! - An emergency band that bypasses pacing to avert a fatal overflow
//! - A concurrency-safe per-session registry for shared processes
//!
//! Summarization itself belongs to the host; this crate only returns
//! decisions and tracks each session's compaction lifecycle.
//!
//! # Example
//!
//! ```
//! use compaction_scheduler::{Decision, SessionId, SessionRegistry};
//! use time::OffsetDateTime;
//!
//! # fn main() -> anyhow::Result<()> {
//! let registry = SessionRegistry::with_defaults();
//! let session_id = SessionId::new();
//!
//! // The host runtime reports usage each turn
//! let decision = registry.report_usage(&session_id, 150_000, 200_000, OffsetDateTime::now_utc())?;
//! assert_eq!(decision, Decision::Compact);
//!
//! // Confirm what actually happened so cooldown pacing can start
//! let now = OffsetDateTime::now_utc();
//! registry.mark_compaction_started(&session_id, now)?;
//! registry.mark_compaction_complete(&session_id, now)?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

mod executor;
mod registry;
mod scheduler;
mod types;

pub use executor::{CompactionExecutor, NullExecutor};
pub use registry::SessionRegistry;
pub use scheduler::{CompactionScheduler, CompactionState, SchedulerConfig};
pub use types::{CompactionRequest, Decision, SchedulerError, SessionId, SessionUsage};
