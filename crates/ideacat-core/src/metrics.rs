//! Request metrics and run-level aggregation

use serde::{Deserialize, Serialize};

/// Token usage reported by the provider (or fabricated by the test double)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetrics {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl UsageMetrics {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// One record per classifier call, success or failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMetrics {
    pub batch_number: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub response_time_secs: f64,
    pub payload_bytes: usize,
    pub cost: f64,
    pub ideas_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RequestMetrics {
    pub fn success(
        batch_number: u64,
        usage: UsageMetrics,
        response_time_secs: f64,
        payload_bytes: usize,
        cost: f64,
        ideas_count: usize,
    ) -> Self {
        Self {
            batch_number,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            response_time_secs,
            payload_bytes,
            cost,
            ideas_count,
            error: None,
        }
    }

    /// Failed calls keep whatever timing and size data is known
    pub fn failure(
        batch_number: u64,
        response_time_secs: f64,
        payload_bytes: usize,
        ideas_count: usize,
        error: impl Into<String>,
    ) -> Self {
        Self {
            batch_number,
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            response_time_secs,
            payload_bytes,
            cost: 0.0,
            ideas_count,
            error: Some(error.into()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    pub fn tokens_per_second(&self) -> f64 {
        if self.response_time_secs > 0.0 {
            self.total_tokens as f64 / self.response_time_secs
        } else {
            0.0
        }
    }
}

/// Aggregate view over a request log.
///
/// Always rebuilt from the log; never updated in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub total_response_time_secs: f64,
    pub total_payload_bytes: usize,
    pub avg_response_time_secs: f64,
    pub avg_tokens: f64,
    pub avg_payload_bytes: f64,
    pub tokens_per_second: f64,
}

impl RunMetrics {
    pub fn from_requests(log: &[RequestMetrics]) -> Self {
        let mut metrics = RunMetrics {
            requests: log.len(),
            ..Default::default()
        };

        for request in log {
            metrics.total_prompt_tokens += request.prompt_tokens;
            metrics.total_completion_tokens += request.completion_tokens;
            metrics.total_tokens += request.total_tokens;
            metrics.total_cost += request.cost;
            metrics.total_response_time_secs += request.response_time_secs;
            metrics.total_payload_bytes += request.payload_bytes;
        }

        let successful: Vec<&RequestMetrics> = log.iter().filter(|r| r.succeeded()).collect();
        metrics.successful_requests = successful.len();
        metrics.failed_requests = log.len() - successful.len();

        if !successful.is_empty() {
            let n = successful.len() as f64;
            metrics.avg_response_time_secs =
                successful.iter().map(|r| r.response_time_secs).sum::<f64>() / n;
            metrics.avg_tokens = successful.iter().map(|r| r.total_tokens as f64).sum::<f64>() / n;
            metrics.avg_payload_bytes =
                successful.iter().map(|r| r.payload_bytes as f64).sum::<f64>() / n;
        }

        if metrics.total_response_time_secs > 0.0 {
            metrics.tokens_per_second =
                metrics.total_tokens as f64 / metrics.total_response_time_secs;
        }

        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(batch: u64, prompt: u64, completion: u64, secs: f64) -> RequestMetrics {
        RequestMetrics::success(batch, UsageMetrics::new(prompt, completion), secs, 1000, 0.5, 5)
    }

    #[test]
    fn test_empty_log() {
        let metrics = RunMetrics::from_requests(&[]);
        assert_eq!(metrics, RunMetrics::default());
    }

    #[test]
    fn test_aggregation() {
        let log = vec![
            ok(1, 100, 50, 1.0),
            ok(2, 300, 150, 3.0),
            RequestMetrics::failure(3, 2.0, 800, 5, "boom"),
        ];
        let metrics = RunMetrics::from_requests(&log);

        assert_eq!(metrics.requests, 3);
        assert_eq!(metrics.successful_requests, 2);
        assert_eq!(metrics.failed_requests, 1);
        assert_eq!(metrics.total_prompt_tokens, 400);
        assert_eq!(metrics.total_completion_tokens, 200);
        assert_eq!(metrics.total_tokens, 600);
        assert_eq!(metrics.total_payload_bytes, 2800);
        assert!((metrics.total_cost - 1.0).abs() < 1e-9);
        assert!((metrics.avg_response_time_secs - 2.0).abs() < 1e-9);
        assert!((metrics.avg_tokens - 300.0).abs() < 1e-9);
        assert!((metrics.tokens_per_second - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregation_is_stable() {
        let log = vec![ok(1, 10, 10, 0.5), ok(2, 20, 20, 0.5)];
        assert_eq!(
            RunMetrics::from_requests(&log),
            RunMetrics::from_requests(&log)
        );
    }
}
