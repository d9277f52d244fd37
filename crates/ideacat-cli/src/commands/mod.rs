pub mod categorize;
pub mod estimate;
pub mod init;

use std::sync::Arc;

use ideacat_config::Config;
use ideacat_tokens::TokenEstimator;
use tracing::warn;

use crate::cli::PlanArgs;

/// Apply command-line overrides shared by every planning command
pub fn apply_plan_overrides(config: &mut Config, args: &PlanArgs) {
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(max_tokens) = args.max_tokens {
        config.dispatch.max_tokens_per_batch = max_tokens;
    }
    if let Some(max_items) = args.max_items {
        config.dispatch.max_items_per_batch = Some(max_items);
    }
}

/// Token estimator for the configured model, or `None` to batch by item count
pub fn load_estimator(config: &Config) -> Option<Arc<TokenEstimator>> {
    match config.token_estimator() {
        Ok(estimator) => Some(Arc::new(estimator)),
        Err(e) => {
            warn!("Token estimator unavailable ({}), falling back to fixed-size batches", e);
            None
        }
    }
}
