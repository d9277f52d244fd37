use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use ideacat_client::{Fault, FaultTrigger, TestDoubleClassifier};
use ideacat_config::{Config, ConfigError};
use ideacat_core::{BatchStatus, CategorizedItem, FailureReason, Item, RunReport};
use ideacat_engine::{DispatchError, Orchestrator, ProgressSink};
use ideacat_tokens::{Encoding, ModelPrice, TokenError, TokenEstimator};
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

fn estimator() -> Arc<TokenEstimator> {
    static ESTIMATOR: OnceLock<Arc<TokenEstimator>> = OnceLock::new();
    ESTIMATOR
        .get_or_init(|| Arc::new(TokenEstimator::new(Encoding::Cl100kBase).unwrap()))
        .clone()
}

fn double() -> TestDoubleClassifier {
    TestDoubleClassifier::new(
        estimator(),
        ModelPrice {
            input_price: 0.00015,
            output_price: 0.0006,
            unit_size: 1000,
        },
    )
}

fn config(max_workers: usize, max_items: Option<usize>) -> Config {
    let mut config = Config::default();
    config.categories = vec![
        "Software".to_string(),
        "Energy".to_string(),
        "Healthcare".to_string(),
        "Retail".to_string(),
    ];
    config.dispatch.max_workers = max_workers;
    config.dispatch.max_items_per_batch = max_items;
    config.dispatch.skip_rate_limit_delay = true;
    config
}

fn items(n: usize) -> Vec<Item> {
    (0..n)
        .map(|i| Item::new(format!("idea-{}", i), format!("A marketplace for thing {}", i)))
        .collect()
}

async fn run(config: &Config, classifier: Arc<TestDoubleClassifier>, input: Vec<Item>) -> RunReport {
    Orchestrator::new(config, classifier, Some(estimator()))
        .unwrap()
        .run(input, CancellationToken::new())
        .await
        .unwrap()
}

fn ids(report: &RunReport) -> (HashSet<String>, HashSet<String>, HashSet<String>) {
    (
        report.categorized.iter().map(|c| c.id.clone()).collect(),
        report.failed.iter().map(|f| f.id.clone()).collect(),
        report.incomplete.iter().cloned().collect(),
    )
}

#[tokio::test]
async fn test_basic_success() {
    let classifier = Arc::new(double());
    let report = run(&config(2, None), classifier.clone(), items(5)).await;

    assert_eq!(report.categorized.len(), 5);
    assert!(report.failed.is_empty());
    assert!(report.incomplete.is_empty());
    assert_eq!(report.batches.len(), 1);
    assert_eq!(report.rounds.len(), 1);
    assert_eq!(classifier.call_count(), 1);
    assert!(report.accounts_for_all_items());

    let metrics = report.metrics();
    assert_eq!(metrics.successful_requests, 1);
    assert!(metrics.total_tokens > 0);
    assert!(metrics.total_cost > 0.0);
}

#[tokio::test]
async fn test_empty_input() {
    let classifier = Arc::new(double());
    let report = run(&config(2, None), classifier.clone(), Vec::new()).await;
    assert!(report.rounds.is_empty());
    assert_eq!(classifier.call_count(), 0);
    assert!(report.accounts_for_all_items());
}

#[tokio::test]
async fn test_truncation_retry_halves_batches() {
    let classifier = Arc::new(double().with_fault(
        FaultTrigger::LargerThan(2),
        Fault::Truncated {
            completion_tokens: 4096,
        },
    ));
    let report = run(&config(2, None), classifier.clone(), items(4)).await;

    assert_eq!(
        report.batches[0].status,
        BatchStatus::FlaggedForRetry {
            completion_tokens: 4096
        }
    );
    assert_eq!(report.batches[0].requeued, 4);
    assert_eq!(report.batches[0].categorized, 0);

    let calls = classifier.calls();
    assert_eq!(calls[0].item_ids.len(), 4);
    let retried: Vec<String> = calls[1..].iter().flat_map(|c| c.item_ids.clone()).collect();
    assert_eq!(retried.len(), 4);
    assert!(calls[1..].iter().all(|c| c.item_ids.len() <= 2));

    assert_eq!(report.rounds.len(), 2);
    assert_eq!(report.rounds[1].max_items_per_batch, Some(2));
    assert_eq!(report.categorized.len(), 4);
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn test_malformed_response_requeues_only_that_batch() {
    let classifier = Arc::new(double().with_fault(FaultTrigger::Batch(2), Fault::Malformed));
    let report = run(&config(2, Some(2)), classifier.clone(), items(6)).await;

    let round0: Vec<_> = report.batches.iter().filter(|b| b.round == 0).collect();
    assert_eq!(round0.len(), 3);
    for record in &round0 {
        if record.batch_number == 2 {
            assert!(matches!(
                record.status,
                BatchStatus::Failed {
                    reason: FailureReason::Malformed { .. }
                }
            ));
            assert_eq!(record.requeued, 2);
        } else {
            assert_eq!(record.status, BatchStatus::Success);
            assert_eq!(record.categorized, 2);
        }
    }

    // Only batch 2's items were sent again
    let retried: HashSet<String> = classifier
        .calls()
        .iter()
        .filter(|c| c.batch_number > 3)
        .flat_map(|c| c.item_ids.clone())
        .collect();
    let expected: HashSet<String> = ["idea-2", "idea-3"].iter().map(|s| s.to_string()).collect();
    assert_eq!(retried, expected);

    assert_eq!(report.categorized.len(), 6);
    assert_eq!(report.rounds[0].requeued, 2);
    // The provider answered every call, but one reply was unusable
    assert_eq!(report.metrics().failed_requests, 0);
    assert_eq!(report.batch_outcomes().failed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_adds_cooldown_before_next_submission() {
    let classifier = Arc::new(double().with_fault(FaultTrigger::Batch(1), Fault::RateLimited));
    let mut cfg = config(1, Some(2));
    cfg.dispatch.rate_limit_cooldown_secs = 10;

    let report = run(&cfg, classifier.clone(), items(6)).await;

    let calls = classifier.calls();
    assert_eq!(calls[0].batch_number, 1);
    assert_eq!(calls[1].batch_number, 2);
    assert_eq!(calls[2].batch_number, 3);
    assert!(calls[1].started_at - calls[0].started_at >= Duration::from_secs(10));
    assert!(calls[2].started_at - calls[1].started_at < Duration::from_secs(1));

    let round0: Vec<_> = report.batches.iter().filter(|b| b.round == 0).collect();
    assert!(round0[0].status.is_rate_limited());
    assert_eq!(round0[1].status, BatchStatus::Success);
    assert_eq!(round0[2].status, BatchStatus::Success);

    assert_eq!(report.categorized.len(), 6);
    assert!(report.failed.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_delay_gates_each_submission() {
    let classifier = Arc::new(double());
    let mut cfg = config(1, Some(2));
    cfg.model = "gpt-4".to_string();
    cfg.dispatch.skip_rate_limit_delay = false;

    let report = run(&cfg, classifier.clone(), items(6)).await;
    let delay = report.rounds[0].delay_secs;
    assert!(delay > 0.0);

    let calls = classifier.calls();
    assert_eq!(calls.len(), 3);
    for pair in calls.windows(2) {
        let gap = (pair[1].started_at - pair[0].started_at).as_secs_f64();
        assert!(gap + 0.001 >= delay, "gap {} shorter than delay {}", gap, delay);
    }
}

#[tokio::test(start_paused = true)]
async fn test_worker_pool_is_bounded() {
    let classifier = Arc::new(double().with_latency(Duration::from_secs(1)));
    let report = run(&config(2, Some(1)), classifier.clone(), items(8)).await;

    assert_eq!(classifier.call_count(), 8);
    assert_eq!(classifier.peak_concurrency(), 2);
    assert_eq!(report.categorized.len(), 8);
}

#[tokio::test]
async fn test_retry_rounds_terminate() {
    let classifier = Arc::new(double().with_fault(FaultTrigger::Always, Fault::Provider("502 Bad Gateway".into())));
    let cfg = config(2, None);
    let report = run(&cfg, classifier.clone(), items(4)).await;

    assert_eq!(report.rounds.len(), cfg.dispatch.max_retry_rounds as usize + 1);
    assert_eq!(classifier.call_count(), 1 + 2 + 4 + 4);
    assert!(report.categorized.is_empty());
    assert_eq!(report.failed.len(), 4);
    for failed in &report.failed {
        assert_eq!(failed.attempts, 4);
        assert!(matches!(failed.reason, FailureReason::Provider { .. }));
    }
    assert!(report.accounts_for_all_items());
    assert_eq!(report.metrics().failed_requests, 11);
}

#[tokio::test]
async fn test_problem_item_is_isolated() {
    let classifier = Arc::new(double().with_fault(FaultTrigger::Item("idea-3".into()), Fault::Malformed));
    let report = run(&config(2, None), classifier.clone(), items(8)).await;

    assert_eq!(report.categorized.len(), 7);
    assert_eq!(report.failed_ids(), vec!["idea-3"]);
    assert_eq!(report.failed[0].attempts, 4);
    assert!(matches!(
        report.failed[0].reason,
        FailureReason::Malformed { .. }
    ));
}

#[tokio::test]
async fn test_items_missing_from_response_are_retried() {
    let classifier = Arc::new(double().with_fault(FaultTrigger::Batch(1), Fault::DropEntries));
    let report = run(&config(2, None), classifier.clone(), items(3)).await;

    assert_eq!(report.batches[0].status, BatchStatus::Success);
    assert_eq!(report.batches[0].categorized, 2);
    assert_eq!(report.batches[0].requeued, 1);
    assert_eq!(classifier.calls()[1].item_ids, vec!["idea-2".to_string()]);
    assert_eq!(report.categorized.len(), 3);
}

#[tokio::test]
async fn test_zero_retry_rounds_reports_failures() {
    let classifier = Arc::new(double().with_fault(FaultTrigger::Batch(1), Fault::Malformed));
    let mut cfg = config(2, Some(2));
    cfg.dispatch.max_retry_rounds = 0;

    let report = run(&cfg, classifier.clone(), items(4)).await;
    assert_eq!(report.rounds.len(), 1);
    assert_eq!(report.categorized.len(), 2);
    assert_eq!(report.failed.len(), 2);
    assert_eq!(report.failed[0].attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_drains_in_flight_work() {
    let classifier = Arc::new(double().with_latency(Duration::from_secs(5)));
    let orchestrator = Orchestrator::new(&config(1, Some(2)), classifier.clone(), Some(estimator())).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let report = orchestrator.run(items(6), cancel).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(classifier.call_count(), 1);
    // The in-flight batch finished rather than being abandoned
    assert_eq!(report.categorized.len(), 2);
    assert_eq!(report.incomplete.len(), 4);
    assert!(report.failed.is_empty());
    assert!(report.accounts_for_all_items());
}

fn cancel_after(delay: Duration) -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        trigger.cancel();
    });
    cancel
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_last_round_reports_failures() {
    let classifier = Arc::new(
        double()
            .with_latency(Duration::from_secs(5))
            .with_fault(FaultTrigger::Item("idea-1".to_string()), Fault::Malformed),
    );
    let mut cfg = config(2, Some(1));
    cfg.dispatch.max_retry_rounds = 0;
    let orchestrator = Orchestrator::new(&cfg, classifier.clone(), Some(estimator())).unwrap();

    let report = orchestrator
        .run(items(2), cancel_after(Duration::from_secs(1)))
        .await
        .unwrap();

    // Both batches were submitted before the cancel, and no retries were left
    assert!(!report.cancelled);
    assert!(report.incomplete.is_empty());
    assert_eq!(report.categorized.len(), 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, "idea-1");
    assert_eq!(report.failed[0].attempts, 1);
    assert!(matches!(report.failed[0].reason, FailureReason::Malformed { .. }));
    assert!(report.accounts_for_all_items());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_with_retries_left_reports_incomplete() {
    let classifier = Arc::new(
        double()
            .with_latency(Duration::from_secs(5))
            .with_fault(FaultTrigger::Item("idea-1".to_string()), Fault::Malformed),
    );
    let orchestrator = Orchestrator::new(&config(2, Some(1)), classifier.clone(), Some(estimator())).unwrap();

    let report = orchestrator
        .run(items(2), cancel_after(Duration::from_secs(1)))
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(classifier.call_count(), 2);
    assert!(report.failed.is_empty());
    assert_eq!(report.incomplete, vec!["idea-1".to_string()]);
    assert!(report.accounts_for_all_items());
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let classifier = Arc::new(double());
    let orchestrator = Orchestrator::new(&config(2, None), classifier.clone(), Some(estimator())).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = orchestrator.run(items(3), cancel).await.unwrap();
    assert!(report.cancelled);
    assert_eq!(classifier.call_count(), 0);
    assert_eq!(report.incomplete.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_run_deadline() {
    let classifier = Arc::new(double().with_latency(Duration::from_secs(5)));
    let mut cfg = config(1, Some(1));
    cfg.dispatch.run_timeout_secs = Some(12);

    let report = run(&cfg, classifier.clone(), items(5)).await;

    assert!(report.cancelled);
    assert_eq!(classifier.call_count(), 3);
    assert_eq!(report.categorized.len(), 3);
    assert_eq!(report.incomplete.len(), 2);
}

#[derive(Default)]
struct RecordingSink {
    saves: Mutex<Vec<usize>>,
    fail: bool,
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn save_progress(&self, results: &[CategorizedItem]) -> anyhow::Result<()> {
        self.saves.lock().unwrap().push(results.len());
        if self.fail {
            anyhow::bail!("disk full");
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_progress_saved_after_each_success() {
    let sink = Arc::new(RecordingSink::default());
    let orchestrator = Orchestrator::new(&config(1, Some(2)), Arc::new(double()), Some(estimator()))
        .unwrap()
        .with_progress(sink.clone());

    orchestrator.run(items(6), CancellationToken::new()).await.unwrap();
    assert_eq!(*sink.saves.lock().unwrap(), vec![2, 4, 6]);
}

#[tokio::test]
async fn test_progress_failure_does_not_stop_run() {
    let sink = Arc::new(RecordingSink {
        fail: true,
        ..Default::default()
    });
    let orchestrator = Orchestrator::new(&config(2, Some(2)), Arc::new(double()), Some(estimator()))
        .unwrap()
        .with_progress(sink.clone());

    let report = orchestrator.run(items(4), CancellationToken::new()).await.unwrap();
    assert_eq!(report.categorized.len(), 4);
    assert_eq!(sink.saves.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_fixed_batches_without_estimator() {
    let classifier = Arc::new(double());
    let mut cfg = config(2, None);
    cfg.dispatch.fallback_batch_size = 3;

    let report = Orchestrator::new(&cfg, classifier.clone(), None)
        .unwrap()
        .run(items(7), CancellationToken::new())
        .await
        .unwrap();

    let sizes: Vec<usize> = report.batches.iter().map(|b| b.items).collect();
    assert_eq!(sizes.iter().sum::<usize>(), 7);
    assert!(sizes.iter().all(|&n| n <= 3));
    assert_eq!(report.categorized.len(), 7);
}

#[tokio::test]
async fn test_configuration_errors_are_fatal() {
    let mut cfg = config(2, None);
    cfg.model = "gpt-9".to_string();
    let err = Orchestrator::new(&cfg, Arc::new(double()), Some(estimator()))
        .err()
        .unwrap();
    assert!(matches!(
        err,
        DispatchError::Config(ConfigError::Token(TokenError::UnknownModel(_)))
    ));

    let mut cfg = config(2, None);
    cfg.categories = vec![" ".to_string()];
    assert!(Orchestrator::new(&cfg, Arc::new(double()), Some(estimator())).is_err());
}

#[tokio::test]
async fn test_duplicate_ids_rejected_before_dispatch() {
    let classifier = Arc::new(double());
    let orchestrator = Orchestrator::new(&config(2, None), classifier.clone(), Some(estimator())).unwrap();

    let mut input = items(3);
    input[2].id = "idea-0".to_string();
    let err = orchestrator.run(input, CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, DispatchError::Input(ideacat_core::Error::DuplicateItemId(_))));
    assert_eq!(classifier.call_count(), 0);
}

#[tokio::test]
async fn test_report_serializes() {
    let classifier = Arc::new(double().with_fault(FaultTrigger::Always, Fault::RateLimited));
    let mut cfg = config(2, None);
    cfg.dispatch.rate_limit_cooldown_secs = 0;
    cfg.dispatch.max_retry_rounds = 1;

    let report = run(&cfg, classifier, items(2)).await;
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["failed"][0]["reason"]["kind"], "rate_limited");
    assert_eq!(json["batches"][0]["status"], "failed");
    assert_eq!(json["total_items"], 2);
}

fn fault_for(kind: u8) -> Fault {
    match kind {
        0 => Fault::Malformed,
        1 => Fault::Provider("boom".to_string()),
        2 => Fault::RateLimited,
        3 => Fault::Truncated {
            completion_tokens: 4096,
        },
        _ => Fault::DropEntries,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_no_item_is_silently_lost(
        n in 0usize..20,
        cap in 1usize..5,
        workers in 1usize..4,
        max_rounds in 0u32..4,
        faults in proptest::collection::vec((0u8..5, 1u64..15), 0..6),
        poison in proptest::option::of(0usize..20),
    ) {
        let mut classifier = double();
        if let Some(p) = poison {
            classifier = classifier.with_fault(FaultTrigger::Item(format!("idea-{}", p)), Fault::Malformed);
        }
        for (kind, batch) in faults {
            classifier = classifier.with_fault(FaultTrigger::Batch(batch), fault_for(kind));
        }

        let mut cfg = config(workers, Some(cap));
        cfg.dispatch.max_retry_rounds = max_rounds;
        cfg.dispatch.rate_limit_cooldown_secs = 0;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();
        let report = runtime.block_on(run(&cfg, Arc::new(classifier), items(n)));

        prop_assert!(report.accounts_for_all_items());
        prop_assert!(report.rounds.len() <= max_rounds as usize + 1);
        prop_assert!(!report.cancelled);

        let (categorized, failed, incomplete) = ids(&report);
        prop_assert_eq!(categorized.len(), report.categorized.len());
        prop_assert!(categorized.is_disjoint(&failed));
        prop_assert!(incomplete.is_empty());

        let all: HashSet<String> = categorized.union(&failed).cloned().collect();
        let expected: HashSet<String> = items(n).into_iter().map(|i| i.id).collect();
        prop_assert_eq!(all, expected);
    }
}
