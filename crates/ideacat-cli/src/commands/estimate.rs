use anyhow::Result;
use ideacat_config::Config;
use ideacat_core::validate_items;
use ideacat_engine::{BatchLimits, Batcher, RoundPlan};

use super::{apply_plan_overrides, load_estimator};
use crate::cli::EstimateArgs;
use crate::output;

pub fn handle(args: EstimateArgs, mut config: Config) -> Result<()> {
    apply_plan_overrides(&mut config, &args.plan);
    config.validate()?;

    let items = output::load_items(&args.plan.input)?;
    validate_items(&items)?;

    let plan = build_plan(&config, &items)?;
    print_plan(&config, &plan, args.verbose);
    Ok(())
}

pub fn build_plan(config: &Config, items: &[ideacat_core::Item]) -> Result<RoundPlan> {
    let spec = config.model_spec()?;
    let batcher = Batcher::new(
        load_estimator(config),
        &config.active_categories(),
        config.dispatch.fallback_batch_size,
    );
    let limits = BatchLimits::new(
        config.dispatch.max_tokens_per_batch,
        config.dispatch.max_items_per_batch,
    );
    let batches = batcher.build_batches(items, limits, 0, 1);
    Ok(RoundPlan::new(
        0,
        limits,
        batches,
        spec,
        config.dispatch.skip_rate_limit_delay,
    ))
}

fn print_plan(config: &Config, plan: &RoundPlan, verbose: bool) {
    println!("Model: {}", config.model);
    println!("Ideas: {}", plan.item_count());
    println!(
        "Batches: {} (max {} tokens per batch)",
        plan.batches.len(),
        plan.limits.max_tokens
    );

    if verbose {
        for batch in &plan.batches {
            println!(
                "  Batch {:>4}: {:>5} ideas, ~{} prompt + ~{} completion tokens",
                batch.number,
                batch.len(),
                batch.estimated_prompt_tokens,
                batch.estimated_completion_tokens
            );
        }
    }

    println!(
        "Estimated tokens: {} prompt + {} completion",
        plan.estimated_prompt_tokens, plan.estimated_completion_tokens
    );
    println!("Estimated cost: ${:.4}", plan.estimated_cost);
    println!("Delay between requests: {:.2}s", plan.delay.as_secs_f64());

    let paced = plan.delay.as_secs_f64() * plan.batches.len().saturating_sub(1) as f64;
    if paced > 0.0 {
        println!("Minimum paced duration: {:.1}s", paced);
    }

    if let Some(daily) = plan.daily_limit.filter(|_| plan.exceeds_daily_limit()) {
        println!(
            "⚠ {} requests exceeds the model's daily limit of {}",
            plan.batches.len(),
            daily
        );
    }
}
