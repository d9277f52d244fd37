//! Batch outcomes and the final run report

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{CategorizedItem, RequestMetrics, RunMetrics};

/// Why an item had to be requeued (and, once retries run out, why it failed)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// Completion hit the per-response ceiling; output presumed cut off
    Truncated { completion_tokens: u64 },
    Provider { message: String },
    RateLimited { message: String },
    Malformed { message: String },
    /// Batch succeeded but the response did not mention this item
    MissingFromResponse,
    WorkerLost { message: String },
}

impl FailureReason {
    pub fn label(&self) -> &'static str {
        match self {
            FailureReason::Truncated { .. } => "truncated",
            FailureReason::Provider { .. } => "provider_error",
            FailureReason::RateLimited { .. } => "rate_limited",
            FailureReason::Malformed { .. } => "malformed_response",
            FailureReason::MissingFromResponse => "missing_from_response",
            FailureReason::WorkerLost { .. } => "worker_lost",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Truncated { completion_tokens } => {
                write!(f, "truncated ({} completion tokens)", completion_tokens)
            }
            FailureReason::Provider { message }
            | FailureReason::RateLimited { message }
            | FailureReason::Malformed { message }
            | FailureReason::WorkerLost { message } => write!(f, "{}: {}", self.label(), message),
            FailureReason::MissingFromResponse => write!(f, "{}", self.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchStatus {
    Success,
    FlaggedForRetry { completion_tokens: u64 },
    Failed { reason: FailureReason },
}

impl BatchStatus {
    /// Reason recorded against every item of a batch that did not succeed
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            BatchStatus::Success => None,
            BatchStatus::FlaggedForRetry { completion_tokens } => Some(FailureReason::Truncated {
                completion_tokens: *completion_tokens,
            }),
            BatchStatus::Failed { reason } => Some(reason.clone()),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            BatchStatus::Failed {
                reason: FailureReason::RateLimited { .. }
            }
        )
    }
}

/// What a worker hands back to the coordinator for one batch
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub batch_number: u64,
    pub categorized: Vec<CategorizedItem>,
    pub status: BatchStatus,
    pub metrics: RequestMetrics,
}

impl BatchResult {
    pub fn failed(batch_number: u64, reason: FailureReason, metrics: RequestMetrics) -> Self {
        Self {
            batch_number,
            categorized: Vec::new(),
            status: BatchStatus::Failed { reason },
            metrics,
        }
    }
}

/// Per-batch line in the report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecord {
    pub batch_number: u64,
    pub round: u32,
    pub items: usize,
    pub categorized: usize,
    pub requeued: usize,
    #[serde(flatten)]
    pub status: BatchStatus,
}

/// Batch counts by outcome.
///
/// Unlike the request counts in `RunMetrics`, a call that returned a
/// truncated or unparseable reply counts as a failed batch here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcomes {
    pub succeeded: usize,
    pub truncated: usize,
    pub failed: usize,
}

impl BatchOutcomes {
    pub fn from_records(records: &[BatchRecord]) -> Self {
        let mut outcomes = BatchOutcomes::default();
        for record in records {
            match record.status {
                BatchStatus::Success => outcomes.succeeded += 1,
                BatchStatus::FlaggedForRetry { .. } => outcomes.truncated += 1,
                BatchStatus::Failed { .. } => outcomes.failed += 1,
            }
        }
        outcomes
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round: u32,
    pub items: usize,
    pub batches: usize,
    pub max_tokens_per_batch: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_items_per_batch: Option<usize>,
    pub estimated_prompt_tokens: usize,
    pub estimated_completion_tokens: usize,
    pub estimated_cost: f64,
    pub delay_secs: f64,
    pub submitted: usize,
    pub categorized: usize,
    pub requeued: usize,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    #[serde(rename = "_id")]
    pub id: String,
    pub reason: FailureReason,
    /// Number of batches this item was sent in
    pub attempts: u32,
}

/// Everything a run achieved.
///
/// `categorized`, `failed` and `incomplete` partition the input ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub model: String,
    #[serde(with = "time::serde::timestamp")]
    pub started_at: OffsetDateTime,
    pub total_items: usize,
    pub categorized: Vec<CategorizedItem>,
    pub failed: Vec<FailedItem>,
    pub incomplete: Vec<String>,
    pub rounds: Vec<RoundSummary>,
    pub batches: Vec<BatchRecord>,
    pub requests: Vec<RequestMetrics>,
    pub elapsed_secs: f64,
    pub cancelled: bool,
}

impl RunReport {
    pub fn new(model: impl Into<String>, total_items: usize) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            model: model.into(),
            started_at: OffsetDateTime::now_utc(),
            total_items,
            categorized: Vec::new(),
            failed: Vec::new(),
            incomplete: Vec::new(),
            rounds: Vec::new(),
            batches: Vec::new(),
            requests: Vec::new(),
            elapsed_secs: 0.0,
            cancelled: false,
        }
    }

    pub fn metrics(&self) -> RunMetrics {
        RunMetrics::from_requests(&self.requests)
    }

    pub fn batch_outcomes(&self) -> BatchOutcomes {
        BatchOutcomes::from_records(&self.batches)
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.id.as_str()).collect()
    }

    /// Every input item is accounted for exactly once
    pub fn accounts_for_all_items(&self) -> bool {
        self.categorized.len() + self.failed.len() + self.incomplete.len() == self.total_items
    }

    pub fn items_per_second(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.categorized.len() as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }
}
