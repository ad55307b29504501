//! The seam to an external compaction executor.
//!
//! The scheduler only decides *when* to compact. Performing the
//! compaction (summarizing or otherwise shrinking the session's
//! transcript) belongs to the host, which implements
//! [`CompactionExecutor`] and hands it to
//! [`SessionRegistry::run_compaction`](crate::SessionRegistry::run_compaction).

use anyhow::Result;
use async_trait::async_trait;

use crate::types::CompactionRequest;

/// Performs compaction for a session when instructed.
#[async_trait]
pub trait CompactionExecutor: Send + Sync {
    /// Compact the session named by `request`.
    ///
    /// Implementations may choose faster or lossier strategies when
    /// `request.emergency` is set.
    ///
    /// # Errors
    /// Returns an error if the compaction attempt did not complete; the
    /// driver then records the failure so the session can retry.
    async fn compact(&self, request: &CompactionRequest) -> Result<()>;
}

/// Executor that does nothing and always succeeds.
///
/// Useful for tests and for wiring a host before a real executor exists.
pub struct NullExecutor;

#[async_trait]
impl CompactionExecutor for NullExecutor {
    async fn compact(&self, _request: &CompactionRequest) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionId;

    #[tokio::test]
    async fn test_null_executor_succeeds() -> Result<()> {
        let request = CompactionRequest {
            session_id: SessionId::from_string("s1"),
            emergency: true,
        };
        NullExecutor.compact(&request).await
    }
}
