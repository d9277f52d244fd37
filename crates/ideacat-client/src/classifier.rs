//! Classifier trait

use async_trait::async_trait;
use ideacat_core::{Batch, RequestMetrics, UsageMetrics};

use crate::ClientError;

/// Raw classifier output for one batch
#[derive(Debug, Clone)]
pub struct Completion {
    pub raw_text: String,
    pub usage: UsageMetrics,
}

/// Outcome of one call plus the metrics record it produced.
///
/// Metrics are present on both paths so failed calls still show up in
/// cost and latency accounting.
#[derive(Debug, Clone)]
pub struct ClassifyAttempt {
    pub outcome: Result<Completion, ClientError>,
    pub metrics: RequestMetrics,
}

/// Sends one batch to a text-classification backend
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, batch: &Batch, categories: &[String]) -> ClassifyAttempt;

    /// Short label for logs
    fn name(&self) -> &str;
}
