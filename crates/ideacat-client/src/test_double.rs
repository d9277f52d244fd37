//! Offline classifier with deterministic labels and injectable faults

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use ideacat_core::{Batch, RequestMetrics, UsageMetrics};
use ideacat_tokens::{ModelPrice, TokenEstimator};
use serde_json::{Value, json};
use tokio::time::Instant;

use crate::classifier::{ClassifyAttempt, Classifier, Completion};
use crate::{ClientError, prompt};

/// Misbehaviour to inject into a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Reply with prose instead of JSON
    Malformed,
    Provider(String),
    RateLimited,
    /// Reply normally but report `completion_tokens` of usage
    Truncated { completion_tokens: u64 },
    /// Leave the last item of the batch out of the reply
    DropEntries,
}

/// Which calls a fault applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultTrigger {
    Batch(u64),
    /// Any batch containing this item id
    Item(String),
    /// Any batch with more than this many items
    LargerThan(usize),
    Always,
}

impl FaultTrigger {
    fn matches(&self, batch: &Batch) -> bool {
        match self {
            FaultTrigger::Batch(number) => batch.number == *number,
            FaultTrigger::Item(id) => batch.contains(id),
            FaultTrigger::LargerThan(size) => batch.len() > *size,
            FaultTrigger::Always => true,
        }
    }
}

#[derive(Debug, Clone)]
struct FaultRule {
    trigger: FaultTrigger,
    fault: Fault,
    remaining: Option<usize>,
}

/// One observed call, in arrival order
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub batch_number: u64,
    pub item_ids: Vec<String>,
    pub started_at: Instant,
}

pub struct TestDoubleClassifier {
    estimator: Arc<TokenEstimator>,
    price: ModelPrice,
    latency: Duration,
    rules: Mutex<Vec<FaultRule>>,
    calls: Mutex<Vec<CallRecord>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl TestDoubleClassifier {
    pub fn new(estimator: Arc<TokenEstimator>, price: ModelPrice) -> Self {
        Self {
            estimator,
            price,
            latency: Duration::ZERO,
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Inject `fault` on every matching call. Earlier rules win.
    pub fn with_fault(self, trigger: FaultTrigger, fault: Fault) -> Self {
        self.push_rule(trigger, fault, None)
    }

    /// Inject `fault` on the first `times` matching calls only
    pub fn with_fault_times(self, trigger: FaultTrigger, fault: Fault, times: usize) -> Self {
        self.push_rule(trigger, fault, Some(times))
    }

    fn push_rule(self, trigger: FaultTrigger, fault: Fault, remaining: Option<usize>) -> Self {
        lock(&self.rules).push(FaultRule {
            trigger,
            fault,
            remaining,
        });
        self
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Highest number of overlapping calls observed
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Category assigned to `id` when no fault applies
    pub fn label_for(id: &str, categories: &[String]) -> String {
        let usable: Vec<&String> = categories.iter().filter(|c| !c.trim().is_empty()).collect();
        if usable.is_empty() {
            return "Other".to_string();
        }
        let hash = blake3::hash(id.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&hash.as_bytes()[..8]);
        let idx = (u64::from_le_bytes(prefix) % usable.len() as u64) as usize;
        usable[idx].clone()
    }

    fn take_fault(&self, batch: &Batch) -> Option<Fault> {
        let mut rules = lock(&self.rules);
        for rule in rules.iter_mut() {
            if !rule.trigger.matches(batch) {
                continue;
            }
            match rule.remaining {
                Some(0) => continue,
                Some(ref mut n) => *n -= 1,
                None => {}
            }
            return Some(rule.fault.clone());
        }
        None
    }

    fn render_reply(batch: &Batch, categories: &[String], drop_last: bool) -> String {
        let keep = if drop_last {
            batch.len().saturating_sub(1)
        } else {
            batch.len()
        };
        let entries: Vec<Value> = batch.items[..keep]
            .iter()
            .map(|item| json!({ "_id": item.id, "category": Self::label_for(&item.id, categories) }))
            .collect();
        format!("```json\n{:#}\n```", Value::Array(entries))
    }

    fn respond(&self, batch: &Batch, categories: &[String], fault: Option<Fault>) -> Result<Completion, ClientError> {
        let prompt_tokens = self
            .estimator
            .estimate_message_tokens(&prompt::build_messages(categories, &batch.items))
            as u64;

        let (raw_text, completion_override) = match fault {
            Some(Fault::Provider(message)) => return Err(ClientError::Provider(message)),
            Some(Fault::RateLimited) => {
                return Err(ClientError::RateLimited(
                    "Rate limit reached for requests".to_string(),
                ));
            }
            Some(Fault::Malformed) => (
                "I'm sorry, but I can't categorize these ideas right now.".to_string(),
                None,
            ),
            Some(Fault::Truncated { completion_tokens }) => (
                Self::render_reply(batch, categories, false),
                Some(completion_tokens),
            ),
            Some(Fault::DropEntries) => (Self::render_reply(batch, categories, true), None),
            None => (Self::render_reply(batch, categories, false), None),
        };

        let completion_tokens = completion_override
            .unwrap_or_else(|| self.estimator.count_tokens(&raw_text) as u64);

        Ok(Completion {
            raw_text,
            usage: UsageMetrics::new(prompt_tokens, completion_tokens),
        })
    }
}

#[async_trait]
impl Classifier for TestDoubleClassifier {
    async fn classify(&self, batch: &Batch, categories: &[String]) -> ClassifyAttempt {
        let started_at = Instant::now();
        lock(&self.calls).push(CallRecord {
            batch_number: batch.number,
            item_ids: batch.items.iter().map(|item| item.id.clone()).collect(),
            started_at,
        });

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let fault = self.take_fault(batch);
        let outcome = self.respond(batch, categories, fault);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let elapsed = started_at.elapsed().as_secs_f64();
        let payload_bytes = prompt::render_batch(&batch.items).len();
        let metrics = match &outcome {
            Ok(completion) => RequestMetrics::success(
                batch.number,
                completion.usage,
                elapsed,
                payload_bytes,
                self.price
                    .cost(completion.usage.prompt_tokens, completion.usage.completion_tokens),
                batch.len(),
            ),
            Err(e) => RequestMetrics::failure(batch.number, elapsed, payload_bytes, batch.len(), e.to_string()),
        };

        ClassifyAttempt { outcome, metrics }
    }

    fn name(&self) -> &str {
        "test-double"
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
