//! Batch dispatch for ideacat
//!
//! - `Batcher`: order-preserving, token-aware batch construction
//! - `RoundPlan`: pre-flight estimates and pacing for one round
//! - `worker`: runs one batch against a classifier and classifies the outcome
//! - `Orchestrator`: bounded worker pool, retry rounds, final report

pub mod batcher;
pub mod error;
pub mod orchestrator;
pub mod plan;
pub mod progress;
pub mod worker;

pub use batcher::{BatchLimits, Batcher};
pub use error::{DispatchError, Result};
pub use orchestrator::Orchestrator;
pub use plan::RoundPlan;
pub use progress::{NoProgress, ProgressSink};
