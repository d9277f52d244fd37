use async_trait::async_trait;
use ideacat_core::CategorizedItem;

/// Checkpoint written after every successful batch.
///
/// Receives the full set of results accumulated so far. A failed save is
/// logged and the run carries on.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn save_progress(&self, results: &[CategorizedItem]) -> anyhow::Result<()>;
}

/// Discards checkpoints
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn save_progress(&self, _results: &[CategorizedItem]) -> anyhow::Result<()> {
        Ok(())
    }
}
