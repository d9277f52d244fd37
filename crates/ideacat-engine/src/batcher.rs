//! Token-aware batch construction

use std::sync::Arc;

use ideacat_client::prompt;
use ideacat_core::{Batch, Item};
use ideacat_tokens::TokenEstimator;
use tracing::{debug, warn};

/// Size ceilings for the batches of one round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_tokens: usize,
    pub max_items: Option<usize>,
}

impl BatchLimits {
    pub fn new(max_tokens: usize, max_items: Option<usize>) -> Self {
        Self {
            max_tokens: max_tokens.max(1),
            max_items: max_items.map(|n| n.max(1)),
        }
    }

    /// Limits for a retry round.
    ///
    /// Both ceilings halve; the item cap is taken from the largest batch
    /// actually sent, so retried items always land in smaller batches.
    pub fn halved(&self, largest_batch: usize) -> Self {
        let from_previous = (largest_batch / 2).max(1);
        Self {
            max_tokens: (self.max_tokens / 2).max(1),
            max_items: Some(match self.max_items {
                Some(cap) => from_previous.min((cap / 2).max(1)),
                None => from_previous,
            }),
        }
    }
}

pub struct Batcher {
    estimator: Option<Arc<TokenEstimator>>,
    categories: Vec<String>,
    fallback_batch_size: usize,
}

impl Batcher {
    pub fn new(
        estimator: Option<Arc<TokenEstimator>>,
        categories: &[String],
        fallback_batch_size: usize,
    ) -> Self {
        Self {
            estimator,
            categories: categories.to_vec(),
            fallback_batch_size: fallback_batch_size.max(1),
        }
    }

    /// Tokens spent on the prompt before any item is added
    pub fn prompt_overhead(&self) -> Option<usize> {
        self.estimator.as_ref().map(|estimator| {
            estimator.estimate_message_tokens(&prompt::build_messages(&self.categories, &[]))
        })
    }

    pub fn item_tokens(&self, item: &Item) -> Option<usize> {
        self.estimator
            .as_ref()
            .map(|estimator| estimator.count_tokens(&prompt::render_item(item)))
    }

    /// Split `items` into batches numbered from `first_number`.
    ///
    /// Input order is preserved. An item too large for any batch still gets a
    /// batch of its own.
    pub fn build_batches(
        &self,
        items: &[Item],
        limits: BatchLimits,
        round: u32,
        first_number: u64,
    ) -> Vec<Batch> {
        if items.is_empty() {
            return Vec::new();
        }

        let groups = match self.estimator.as_deref() {
            Some(estimator) => self.group_by_tokens(estimator, items, limits),
            None => Vec::new(),
        };

        if groups.is_empty() {
            let size = limits
                .max_items
                .map_or(self.fallback_batch_size, |cap| cap.min(self.fallback_batch_size));
            warn!(
                "Token-aware batching unavailable; using fixed batches of {} items",
                size
            );
            return items
                .chunks(size)
                .zip(first_number..)
                .map(|(chunk, number)| Batch::new(number, round, chunk.to_vec()))
                .collect();
        }

        groups
            .into_iter()
            .zip(first_number..)
            .map(|((items, prompt_tokens), number)| {
                let completion_tokens = self
                    .estimator
                    .as_ref()
                    .map_or(0, |estimator| estimator.estimate_response_tokens(items.len()));
                Batch::new(number, round, items).with_estimates(prompt_tokens, completion_tokens)
            })
            .collect()
    }

    fn group_by_tokens(
        &self,
        estimator: &TokenEstimator,
        items: &[Item],
        limits: BatchLimits,
    ) -> Vec<(Vec<Item>, usize)> {
        let overhead =
            estimator.estimate_message_tokens(&prompt::build_messages(&self.categories, &[]));

        let mut groups = Vec::new();
        let mut current: Vec<Item> = Vec::new();
        let mut running = overhead;

        for item in items {
            let tokens = estimator.count_tokens(&prompt::render_item(item));
            let full = limits.max_items.is_some_and(|cap| current.len() >= cap);

            if !current.is_empty() && (full || running + tokens > limits.max_tokens) {
                groups.push((std::mem::take(&mut current), running));
                running = overhead;
            }

            if current.is_empty() && overhead + tokens > limits.max_tokens {
                debug!(
                    "Item {} ({} tokens) exceeds the batch ceiling on its own",
                    item.id, tokens
                );
            }

            running += tokens;
            current.push(item.clone());
        }

        if !current.is_empty() {
            groups.push((current, running));
        }

        groups
    }
}
