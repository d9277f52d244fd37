//! Pre-flight estimates for one dispatch round

use std::time::Duration;

use ideacat_core::{Batch, RoundSummary};
use ideacat_tokens::ModelSpec;
use tracing::{info, warn};

use crate::BatchLimits;

/// The batches of one round plus what they are expected to cost
#[derive(Debug, Clone)]
pub struct RoundPlan {
    pub round: u32,
    pub limits: BatchLimits,
    pub batches: Vec<Batch>,
    /// Spacing between submissions; zero when pacing is disabled
    pub delay: Duration,
    pub estimated_prompt_tokens: usize,
    pub estimated_completion_tokens: usize,
    pub estimated_cost: f64,
    /// The model's requests-per-day cap, if it has one
    pub daily_limit: Option<u64>,
}

impl RoundPlan {
    pub fn new(
        round: u32,
        limits: BatchLimits,
        batches: Vec<Batch>,
        spec: &ModelSpec,
        skip_rate_limit_delay: bool,
    ) -> Self {
        let estimated_prompt_tokens = batches.iter().map(|b| b.estimated_prompt_tokens).sum();
        let estimated_completion_tokens =
            batches.iter().map(|b| b.estimated_completion_tokens).sum();
        let estimated_cost = spec.price.cost(
            estimated_prompt_tokens as u64,
            estimated_completion_tokens as u64,
        );

        let delay = if skip_rate_limit_delay {
            Duration::ZERO
        } else {
            let totals: Vec<usize> = batches.iter().map(Batch::estimated_total_tokens).collect();
            spec.limits.delay_for(&totals)
        };

        let plan = Self {
            round,
            limits,
            batches,
            delay,
            estimated_prompt_tokens,
            estimated_completion_tokens,
            estimated_cost,
            daily_limit: spec.limits.requests_per_day,
        };

        if let Some(daily) = plan.daily_limit.filter(|_| plan.exceeds_daily_limit()) {
            warn!(
                "Round {} needs {} requests, above the daily limit of {}",
                round,
                plan.batches.len(),
                daily
            );
        }
        plan
    }

    /// More batches than the model allows requests per day
    pub fn exceeds_daily_limit(&self) -> bool {
        self.daily_limit
            .is_some_and(|daily| self.batches.len() as u64 > daily)
    }

    pub fn item_count(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }

    pub fn largest_batch(&self) -> usize {
        self.batches.iter().map(Batch::len).max().unwrap_or(0)
    }

    /// Estimate-only summary; dispatch fills in the actuals
    pub fn summary(&self) -> RoundSummary {
        RoundSummary {
            round: self.round,
            items: self.item_count(),
            batches: self.batches.len(),
            max_tokens_per_batch: self.limits.max_tokens,
            max_items_per_batch: self.limits.max_items,
            estimated_prompt_tokens: self.estimated_prompt_tokens,
            estimated_completion_tokens: self.estimated_completion_tokens,
            estimated_cost: self.estimated_cost,
            delay_secs: self.delay.as_secs_f64(),
            ..RoundSummary::default()
        }
    }

    pub fn log(&self) {
        info!(
            "Round {}: {} items in {} batches (max {} tokens{}), est. {} prompt + {} completion tokens, est. cost ${:.4}, delay {:.2}s",
            self.round,
            self.item_count(),
            self.batches.len(),
            self.limits.max_tokens,
            self.limits
                .max_items
                .map(|n| format!(", max {} items", n))
                .unwrap_or_default(),
            self.estimated_prompt_tokens,
            self.estimated_completion_tokens,
            self.estimated_cost,
            self.delay.as_secs_f64()
        );
        for batch in &self.batches {
            info!(
                "Batch {}: {} ideas, est. {} tokens",
                batch.number,
                batch.len(),
                batch.estimated_total_tokens()
            );
        }
    }
}
