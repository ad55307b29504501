//! Simulated turn loop example.
//!
//! Feeds a growing usage curve through the registry and drives a mock
//! executor whenever a compaction decision fires. Shows the normal
//! trigger, cooldown pacing, and the emergency bypass.
//!
//! # Running
//!
//! ```bash
//! cargo run --example turn_loop
//! ```
//!
//! To see debug logs from the scheduler (the crate uses the `log` facade):
//! ```bash
//! RUST_LOG=compaction_scheduler=debug cargo run --example turn_loop
//! ```

use compaction_scheduler::{CompactionExecutor, CompactionRequest, SessionId, SessionRegistry};
use time::OffsetDateTime;

/// Stands in for the host's summarizer.
struct PrintingExecutor;

#[async_trait::async_trait]
impl CompactionExecutor for PrintingExecutor {
    async fn compact(&self, request: &CompactionRequest) -> anyhow::Result<()> {
        println!(
            "  -> compacting session {} (emergency: {})",
            request.session_id, request.emergency
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let registry = SessionRegistry::with_defaults();
    let session_id = SessionId::new();
    let executor = PrintingExecutor;

    let token_limit = 200_000_u64;
    let mut tokens_used = 40_000_u64;

    println!("Session {session_id} (limit: {token_limit} tokens)\n");

    for turn in 1..=16 {
        tokens_used += 15_000;

        let decision =
            registry.report_usage(&session_id, tokens_used, token_limit, OffsetDateTime::now_utc())?;
        println!("turn {turn:>2}: {tokens_used:>7}/{token_limit} tokens -> {decision:?}");

        if let Some(request) = decision.into_request(session_id.clone()) {
            registry.run_compaction(&request, &executor, None).await?;
            // The executor shrank the live context
            tokens_used = 50_000;
        }
    }

    registry.end_session(&session_id)?;
    Ok(())
}
