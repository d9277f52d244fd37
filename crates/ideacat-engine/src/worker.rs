//! One batch, one classifier call, one `BatchResult`

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use ideacat_client::{Classifier, ClientError, ParseError, parse_response};
use ideacat_core::{Batch, BatchResult, BatchStatus, FailureReason, RequestMetrics};
use tracing::{error, warn};

/// Run `batch` through `classifier`.
///
/// Never fails: errors and panics come back as a failed `BatchResult`.
pub async fn run_batch(
    classifier: Arc<dyn Classifier>,
    batch: Arc<Batch>,
    categories: Arc<Vec<String>>,
    completion_ceiling: u64,
) -> BatchResult {
    let number = batch.number;
    let ideas = batch.len();

    let call = classify(classifier.as_ref(), &batch, &categories, completion_ceiling);
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!("Batch {} worker panicked: {}", number, message);
            BatchResult::failed(
                number,
                FailureReason::WorkerLost {
                    message: message.clone(),
                },
                RequestMetrics::failure(number, 0.0, 0, ideas, message),
            )
        }
    }
}

async fn classify(
    classifier: &dyn Classifier,
    batch: &Batch,
    categories: &[String],
    completion_ceiling: u64,
) -> BatchResult {
    let attempt = classifier.classify(batch, categories).await;
    let metrics = attempt.metrics;

    let completion = match attempt.outcome {
        Ok(completion) => completion,
        Err(ClientError::RateLimited(message)) => {
            warn!("Batch {} rate limited: {}", batch.number, message);
            return BatchResult::failed(batch.number, FailureReason::RateLimited { message }, metrics);
        }
        Err(ClientError::Provider(message)) | Err(ClientError::Configuration(message)) => {
            return BatchResult::failed(batch.number, FailureReason::Provider { message }, metrics);
        }
    };

    let completion_tokens = completion.usage.completion_tokens;
    if completion_tokens >= completion_ceiling {
        warn!(
            "Batch {} flagged for retry: {} completion tokens reached the {} token ceiling",
            batch.number, completion_tokens, completion_ceiling
        );
        return BatchResult {
            batch_number: batch.number,
            categorized: Vec::new(),
            status: BatchStatus::FlaggedForRetry { completion_tokens },
            metrics,
        };
    }

    match parse_response(&completion.raw_text, batch) {
        Ok(categorized) => BatchResult {
            batch_number: batch.number,
            categorized,
            status: BatchStatus::Success,
            metrics,
        },
        Err(ParseError::Malformed(message)) => {
            error!("Batch {} returned a malformed response: {}", batch.number, message);
            BatchResult::failed(batch.number, FailureReason::Malformed { message }, metrics)
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ideacat_client::{ClassifyAttempt, Fault, FaultTrigger, TestDoubleClassifier};
    use ideacat_core::Item;
    use ideacat_tokens::{Encoding, ModelPrice, TokenEstimator};

    fn double() -> TestDoubleClassifier {
        TestDoubleClassifier::new(
            Arc::new(TokenEstimator::new(Encoding::Cl100kBase).unwrap()),
            ModelPrice {
                input_price: 0.01,
                output_price: 0.03,
                unit_size: 1000,
            },
        )
    }

    fn batch() -> Arc<Batch> {
        Arc::new(Batch::new(
            1,
            0,
            vec![Item::new("a", "solar kiosk"), Item::new("b", "pet insurance app")],
        ))
    }

    fn categories() -> Arc<Vec<String>> {
        Arc::new(vec!["Software".into(), "Energy".into()])
    }

    #[tokio::test]
    async fn test_success() {
        let result = run_batch(Arc::new(double()), batch(), categories(), 4096).await;
        assert_eq!(result.status, BatchStatus::Success);
        assert_eq!(result.categorized.len(), 2);
        assert!(result.metrics.succeeded());
    }

    #[tokio::test]
    async fn test_truncation_is_flagged_not_parsed() {
        let classifier = double().with_fault(
            FaultTrigger::Always,
            Fault::Truncated {
                completion_tokens: 4096,
            },
        );
        let result = run_batch(Arc::new(classifier), batch(), categories(), 4096).await;
        assert_eq!(
            result.status,
            BatchStatus::FlaggedForRetry {
                completion_tokens: 4096
            }
        );
        assert!(result.categorized.is_empty());
    }

    #[tokio::test]
    async fn test_errors_become_failed_results() {
        let classifier = double()
            .with_fault(FaultTrigger::Batch(1), Fault::RateLimited)
            .with_fault(FaultTrigger::Batch(2), Fault::Malformed)
            .with_fault(FaultTrigger::Batch(3), Fault::Provider("503".into()));
        let classifier: Arc<dyn Classifier> = Arc::new(classifier);

        let mut labels = Vec::new();
        for number in 1..=3 {
            let b = Arc::new(Batch::new(number, 0, vec![Item::new("a", "x")]));
            let result = run_batch(classifier.clone(), b, categories(), 4096).await;
            assert!(!result.metrics.succeeded());
            labels.push(result.status.failure_reason().unwrap().label());
        }
        assert_eq!(labels, vec!["rate_limited", "malformed_response", "provider_error"]);
    }

    struct Panicking;

    #[async_trait]
    impl Classifier for Panicking {
        async fn classify(&self, _batch: &Batch, _categories: &[String]) -> ClassifyAttempt {
            panic!("connection pool poisoned");
        }

        fn name(&self) -> &str {
            "panicking"
        }
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let result = run_batch(Arc::new(Panicking), batch(), categories(), 4096).await;
        match result.status {
            BatchStatus::Failed {
                reason: FailureReason::WorkerLost { message },
            } => assert!(message.contains("poisoned")),
            other => panic!("unexpected status: {:?}", other),
        }
        assert_eq!(result.metrics.ideas_count, 2);
    }
}
