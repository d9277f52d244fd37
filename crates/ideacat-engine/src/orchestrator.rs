//! Bounded-concurrency dispatch with retry rounds

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use ideacat_client::Classifier;
use ideacat_config::{Config, DispatchConfig};
use ideacat_core::{
    Batch, BatchRecord, BatchResult, BatchStatus, CategorizedItem, FailedItem, FailureReason,
    Item, RequestMetrics, RoundSummary, RunReport, validate_items,
};
use ideacat_tokens::{ModelSpec, TokenEstimator};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::plan::RoundPlan;
use crate::progress::{NoProgress, ProgressSink};
use crate::{BatchLimits, Batcher, Result, worker};

pub struct Orchestrator {
    model: String,
    spec: ModelSpec,
    dispatch: DispatchConfig,
    categories: Arc<Vec<String>>,
    classifier: Arc<dyn Classifier>,
    batcher: Batcher,
    progress: Arc<dyn ProgressSink>,
}

/// Items waiting for another round, each with the reason it was requeued
#[derive(Debug, Default)]
struct RetryQueue {
    entries: Vec<(Item, FailureReason)>,
}

impl RetryQueue {
    fn push(&mut self, item: Item, reason: FailureReason) {
        self.entries.push((item, reason));
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn into_items(self) -> Vec<Item> {
        self.entries.into_iter().map(|(item, _)| item).collect()
    }
}

/// Everything the coordinator accumulates; workers never touch it
#[derive(Default)]
struct RunState {
    categorized: Vec<CategorizedItem>,
    attempts: HashMap<String, u32>,
    requests: Vec<RequestMetrics>,
    batches: Vec<BatchRecord>,
    incomplete: Vec<String>,
    /// A rate-limited batch asked for a cool-down before the next submission
    cooldown_pending: bool,
}

struct RoundOutcome {
    summary: RoundSummary,
    retry: RetryQueue,
    largest_batch: usize,
    interrupted: bool,
}

impl Orchestrator {
    /// Fails on configuration problems: unknown model, no categories,
    /// zero-sized limits.
    pub fn new(
        config: &Config,
        classifier: Arc<dyn Classifier>,
        estimator: Option<Arc<TokenEstimator>>,
    ) -> Result<Self> {
        config.validate()?;
        let spec = config.model_spec()?.clone();

        let categories = config.active_categories();

        let batcher = Batcher::new(estimator, &categories, config.dispatch.fallback_batch_size);

        Ok(Self {
            model: config.model.clone(),
            spec,
            dispatch: config.dispatch.clone(),
            categories: Arc::new(categories),
            classifier,
            batcher,
            progress: Arc::new(NoProgress),
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    fn initial_limits(&self) -> BatchLimits {
        BatchLimits::new(
            self.dispatch.max_tokens_per_batch,
            self.dispatch.max_items_per_batch,
        )
    }

    fn plan_round(&self, round: u32, items: &[Item], limits: BatchLimits, first_number: u64) -> RoundPlan {
        let batches = self.batcher.build_batches(items, limits, round, first_number);
        RoundPlan::new(
            round,
            limits,
            batches,
            &self.spec,
            self.dispatch.skip_rate_limit_delay,
        )
    }

    /// The first round as it would be dispatched, without sending anything
    pub fn initial_plan(&self, items: &[Item]) -> RoundPlan {
        self.plan_round(0, items, self.initial_limits(), 1)
    }

    /// Categorize `items`, retrying failed batches in smaller batches.
    ///
    /// Returns `Err` only for invalid input, before any request is sent. Every
    /// input id ends up in exactly one of the report's `categorized`, `failed`
    /// or `incomplete` lists.
    pub async fn run(&self, items: Vec<Item>, cancel: CancellationToken) -> Result<RunReport> {
        validate_items(&items)?;

        let started = Instant::now();
        let mut report = RunReport::new(&self.model, items.len());
        info!(
            "Categorizing {} ideas with {} via {} ({} workers)",
            items.len(),
            self.model,
            self.classifier.name(),
            self.dispatch.max_workers
        );

        let cancel = cancel.child_token();
        let deadline = self.dispatch.run_timeout().map(|limit| {
            let token = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                warn!("Run deadline of {}s reached, stopping submissions", limit.as_secs());
                token.cancel();
            })
        });

        let mut state = RunState::default();
        let mut round_input = items;
        let mut limits = self.initial_limits();
        let mut next_number = 1u64;
        let mut round = 0u32;

        // `exhausted` leftovers failed for good; otherwise they never got their retries
        let (leftover, exhausted, cancelled) = loop {
            if round_input.is_empty() {
                break (RetryQueue::default(), true, false);
            }

            let plan = self.plan_round(round, &round_input, limits, next_number);
            next_number += plan.batches.len() as u64;
            plan.log();

            let outcome = self.dispatch_round(plan, &mut state, &cancel).await;
            info!(
                "Round {} finished: {} categorized, {} requeued in {:.2}s",
                round,
                outcome.summary.categorized,
                outcome.summary.requeued,
                outcome.summary.elapsed_secs
            );
            report.rounds.push(outcome.summary);

            if outcome.retry.is_empty() || round >= self.dispatch.max_retry_rounds {
                break (outcome.retry, true, outcome.interrupted);
            }
            if outcome.interrupted || cancel.is_cancelled() {
                break (outcome.retry, false, true);
            }

            round += 1;
            limits = limits.halved(outcome.largest_batch);
            info!(
                "Retrying {} ideas in round {} of {}",
                outcome.retry.len(),
                round,
                self.dispatch.max_retry_rounds
            );
            round_input = outcome.retry.into_items();
        };

        if let Some(handle) = deadline {
            handle.abort();
        }

        if !exhausted {
            state
                .incomplete
                .extend(leftover.entries.into_iter().map(|(item, _)| item.id));
        } else {
            for (item, reason) in leftover.entries {
                let attempts = state.attempts.get(&item.id).copied().unwrap_or(0);
                error!(
                    "Idea {} failed permanently after {} attempts: {}",
                    item.id, attempts, reason
                );
                report.failed.push(FailedItem {
                    id: item.id,
                    reason,
                    attempts,
                });
            }
        }

        report.categorized = state.categorized;
        report.incomplete = state.incomplete;
        report.batches = state.batches;
        report.requests = state.requests;
        report.cancelled = cancelled;
        report.elapsed_secs = started.elapsed().as_secs_f64();

        let metrics = report.metrics();
        let batches = report.batch_outcomes();
        info!(
            "Batches: {} ok, {} truncated, {} failed",
            batches.succeeded, batches.truncated, batches.failed
        );
        info!(
            "Run finished: {} categorized, {} failed, {} incomplete of {} ideas in {:.2}s",
            report.categorized.len(),
            report.failed.len(),
            report.incomplete.len(),
            report.total_items,
            report.elapsed_secs
        );
        info!(
            "Requests: {} answered, {} transport errors; tokens: {} prompt + {} completion; cost ${:.4}; {:.2} ideas/s",
            metrics.successful_requests,
            metrics.failed_requests,
            metrics.total_prompt_tokens,
            metrics.total_completion_tokens,
            metrics.total_cost,
            report.items_per_second()
        );

        Ok(report)
    }

    async fn dispatch_round(
        &self,
        plan: RoundPlan,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> RoundOutcome {
        let round_started = Instant::now();
        let mut summary = plan.summary();
        let largest_batch = plan.largest_batch();
        let delay = plan.delay;

        let mut queue: VecDeque<Batch> = plan.batches.into();
        let mut in_flight: HashMap<u64, Arc<Batch>> = HashMap::new();
        let mut workers: JoinSet<BatchResult> = JoinSet::new();
        let mut retry = RetryQueue::default();
        let mut interrupted = false;

        let initial = self.dispatch.max_workers.min(queue.len());
        for _ in 0..initial {
            let wait = self.take_cooldown(state, Duration::ZERO);
            if !pause(wait, cancel).await {
                interrupted = true;
                break;
            }
            if let Some(batch) = queue.pop_front() {
                self.submit(batch, &mut workers, &mut in_flight, state, &mut summary);
            }
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(result) => {
                    self.absorb(result, &mut in_flight, state, &mut retry, &mut summary)
                        .await
                }
                Err(e) => error!("Worker task failed: {}", e),
            }

            if queue.is_empty() || interrupted {
                continue;
            }

            let wait = self.take_cooldown(state, delay);
            if !pause(wait, cancel).await {
                info!("Cancellation requested, draining {} in-flight batches", workers.len());
                interrupted = true;
                continue;
            }
            if let Some(batch) = queue.pop_front() {
                self.submit(batch, &mut workers, &mut in_flight, state, &mut summary);
            }
        }

        // Tasks that vanished without reporting back
        for (_, batch) in in_flight.drain() {
            warn!("Batch {} produced no result, requeueing", batch.number);
            for item in batch.items.iter() {
                retry.push(
                    item.clone(),
                    FailureReason::WorkerLost {
                        message: "worker task ended without a result".to_string(),
                    },
                );
            }
            summary.requeued += batch.len();
        }

        if !queue.is_empty() {
            let unsubmitted: usize = queue.iter().map(Batch::len).sum();
            warn!(
                "Round {} stopped with {} batches ({} ideas) unsubmitted",
                summary.round,
                queue.len(),
                unsubmitted
            );
            state
                .incomplete
                .extend(queue.into_iter().flat_map(|b| b.items).map(|item| item.id));
        }

        summary.elapsed_secs = round_started.elapsed().as_secs_f64();
        RoundOutcome {
            summary,
            retry,
            largest_batch,
            interrupted,
        }
    }

    /// Wait before the next submission, including any pending cool-down
    fn take_cooldown(&self, state: &mut RunState, delay: Duration) -> Duration {
        if state.cooldown_pending {
            state.cooldown_pending = false;
            let cooldown = self.dispatch.rate_limit_cooldown();
            warn!(
                "Rate limit hit, cooling down for {}s before the next batch",
                cooldown.as_secs()
            );
            delay + cooldown
        } else {
            delay
        }
    }

    fn submit(
        &self,
        batch: Batch,
        workers: &mut JoinSet<BatchResult>,
        in_flight: &mut HashMap<u64, Arc<Batch>>,
        state: &mut RunState,
        summary: &mut RoundSummary,
    ) {
        for item in &batch.items {
            *state.attempts.entry(item.id.clone()).or_insert(0) += 1;
        }
        summary.submitted += 1;

        let batch = Arc::new(batch);
        in_flight.insert(batch.number, batch.clone());
        workers.spawn(worker::run_batch(
            self.classifier.clone(),
            batch,
            self.categories.clone(),
            self.dispatch.completion_token_ceiling,
        ));
    }

    async fn absorb(
        &self,
        result: BatchResult,
        in_flight: &mut HashMap<u64, Arc<Batch>>,
        state: &mut RunState,
        retry: &mut RetryQueue,
        summary: &mut RoundSummary,
    ) {
        let Some(batch) = in_flight.remove(&result.batch_number) else {
            error!("Result for unknown batch {} ignored", result.batch_number);
            return;
        };

        state.requests.push(result.metrics);
        let categorized = result.categorized.len();
        let mut requeued = 0;

        match &result.status {
            BatchStatus::Success => {
                let returned: HashSet<&str> =
                    result.categorized.iter().map(|c| c.id.as_str()).collect();
                for item in batch.items.iter().filter(|item| !returned.contains(item.id.as_str())) {
                    retry.push(item.clone(), FailureReason::MissingFromResponse);
                    requeued += 1;
                }
                if requeued > 0 {
                    warn!(
                        "Batch {} response left out {} ideas, requeueing them",
                        batch.number, requeued
                    );
                }
            }
            status => {
                if status.is_rate_limited() {
                    state.cooldown_pending = true;
                }
                if let Some(reason) = status.failure_reason() {
                    warn!(
                        "Batch {} failed ({}), requeueing {} ideas",
                        batch.number,
                        reason,
                        batch.len()
                    );
                    for item in batch.items.iter() {
                        retry.push(item.clone(), reason.clone());
                    }
                    requeued = batch.len();
                }
            }
        }

        summary.categorized += categorized;
        summary.requeued += requeued;
        state.batches.push(BatchRecord {
            batch_number: batch.number,
            round: batch.round,
            items: batch.len(),
            categorized,
            requeued,
            status: result.status,
        });

        if categorized > 0 {
            state.categorized.extend(result.categorized);
            if let Err(e) = self.progress.save_progress(&state.categorized).await {
                warn!("Failed to save progress: {}", e);
            }
        }
    }
}

/// Sleep for `wait` unless cancelled first. Returns false on cancellation.
async fn pause(wait: Duration, cancel: &CancellationToken) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    if wait.is_zero() {
        return true;
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(wait) => true,
    }
}
