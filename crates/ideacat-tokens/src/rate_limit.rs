use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Provider throughput ceilings for one model.
///
/// A zero per-minute limit means "not limited".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    pub tokens_per_minute: u64,
    pub requests_per_minute: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_day: Option<u64>,
}

impl RateLimits {
    pub fn delay_for(&self, batch_token_counts: &[usize]) -> Duration {
        rate_limit_delay(batch_token_counts, self)
    }
}

/// Minimum spacing between request submissions.
///
/// The tighter of the token and request limits wins; the two are not added.
/// An empty slice yields zero.
pub fn rate_limit_delay(batch_token_counts: &[usize], limits: &RateLimits) -> Duration {
    if batch_token_counts.is_empty() {
        return Duration::ZERO;
    }

    let avg_tokens =
        batch_token_counts.iter().sum::<usize>() as f64 / batch_token_counts.len() as f64;

    let token_delay = if limits.tokens_per_minute > 0 {
        avg_tokens / limits.tokens_per_minute as f64 * 60.0
    } else {
        0.0
    };
    let request_delay = if limits.requests_per_minute > 0 {
        60.0 / limits.requests_per_minute as f64
    } else {
        0.0
    };

    Duration::from_secs_f64(token_delay.max(request_delay))
}
