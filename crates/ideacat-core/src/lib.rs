//! Core domain models for ideacat
//!
//! This crate contains:
//! - Input models (Item, Batch) and classifier output (CategorizedItem)
//! - Chat message model shared by the estimator and the client
//! - Per-request metrics and the run-level aggregation over them
//! - Batch outcomes and the final run report

pub mod error;
pub mod item;
pub mod message;
pub mod metrics;
pub mod report;

pub use error::{Error, Result};
pub use item::{Batch, CategorizedItem, Item, validate_categories, validate_items};
pub use message::{ChatMessage, Role};
pub use metrics::{RequestMetrics, RunMetrics, UsageMetrics};
pub use report::{
    BatchOutcomes, BatchRecord, BatchResult, BatchStatus, FailedItem, FailureReason, RoundSummary, RunReport,
};
