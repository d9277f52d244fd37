use std::sync::Arc;

use anyhow::{Context, Result};
use ideacat_client::{Classifier, OpenAiClient, OpenAiSettings, TestDoubleClassifier};
use ideacat_config::Config;
use ideacat_core::RunReport;
use ideacat_engine::Orchestrator;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{apply_plan_overrides, load_estimator};
use crate::cli::CategorizeArgs;
use crate::output::{self, JsonProgressFile, MetricsFile, RunPaths};

/// How many failed ids to print before summarizing the rest
const MAX_LISTED_IDS: usize = 20;

pub async fn handle(args: CategorizeArgs, config: Config) -> Result<()> {
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, waiting for in-flight batches to finish");
            interrupt.cancel();
        }
    });

    let (report, paths) = run(args, config, cancel).await?;
    print_summary(&report, &paths);
    Ok(())
}

pub async fn run(
    args: CategorizeArgs,
    mut config: Config,
    cancel: CancellationToken,
) -> Result<(RunReport, RunPaths)> {
    apply_overrides(&mut config, &args);
    config.validate()?;

    let items = output::load_items(&args.plan.input)?;
    info!(
        "Loaded {} ideas from {}",
        items.len(),
        args.plan.input.display()
    );

    let estimator = load_estimator(&config);
    let classifier = build_classifier(&config, estimator.clone())?;

    let paths = RunPaths::new(&args.output_dir, &config.model, &output::timestamp()?);
    let orchestrator = Orchestrator::new(&config, classifier, estimator)?
        .with_progress(Arc::new(JsonProgressFile::new(paths.checkpoint.clone())));

    let report = orchestrator.run(items, cancel).await?;

    output::write_json(&paths.results, &report.categorized)?;
    output::write_json(&paths.metrics, &MetricsFile::new(&report))?;
    info!("Results saved to {}", paths.results.display());

    Ok((report, paths))
}

fn apply_overrides(config: &mut Config, args: &CategorizeArgs) {
    apply_plan_overrides(config, &args.plan);
    if let Some(workers) = args.max_workers {
        config.dispatch.max_workers = workers;
    }
    if let Some(rounds) = args.max_retry_rounds {
        config.dispatch.max_retry_rounds = rounds;
    }
    if let Some(timeout) = args.timeout {
        config.dispatch.run_timeout_secs = Some(timeout);
    }
    if args.test {
        config.provider.use_test_double = true;
    }
    if args.no_rate_limit {
        config.dispatch.skip_rate_limit_delay = true;
    }
}

fn build_classifier(
    config: &Config,
    estimator: Option<Arc<ideacat_tokens::TokenEstimator>>,
) -> Result<Arc<dyn Classifier>> {
    let spec = config.model_spec()?;

    if config.provider.use_test_double {
        let estimator = estimator.context("The test classifier needs a token estimator")?;
        info!("Using the offline test classifier");
        return Ok(Arc::new(
            TestDoubleClassifier::new(estimator, spec.price)
                .with_latency(config.provider.test_double_latency()),
        ));
    }

    let settings = OpenAiSettings {
        api_base: config.provider.api_base.clone(),
        api_key: OpenAiSettings::api_key_from_env(&config.provider.api_key_env)?,
        model: config.model.clone(),
        temperature: config.provider.temperature,
        timeout: config.provider.request_timeout(),
        price: spec.price,
    };
    Ok(Arc::new(OpenAiClient::new(settings)?))
}

fn print_summary(report: &RunReport, paths: &RunPaths) {
    let metrics = report.metrics();

    println!();
    if report.cancelled {
        println!("⚠ Run cancelled before completion");
    }
    println!(
        "✓ Categorized {} of {} ideas in {:.1}s ({:.2} ideas/s)",
        report.categorized.len(),
        report.total_items,
        report.elapsed_secs,
        report.items_per_second()
    );
    let batches = report.batch_outcomes();
    println!(
        "  Batches: {} ok, {} truncated, {} failed, rounds: {}",
        batches.succeeded,
        batches.truncated,
        batches.failed,
        report.rounds.len()
    );
    println!(
        "  Requests: {} ({} with transport errors)",
        metrics.requests, metrics.failed_requests
    );
    println!(
        "  Tokens: {} prompt + {} completion, cost ${:.4}",
        metrics.total_prompt_tokens, metrics.total_completion_tokens, metrics.total_cost
    );
    println!("  Results: {}", paths.results.display());
    println!("  Metrics: {}", paths.metrics.display());

    if !report.failed.is_empty() {
        println!("✗ {} ideas failed after all retries:", report.failed.len());
        for failed in report.failed.iter().take(MAX_LISTED_IDS) {
            println!(
                "    {} ({} attempts): {}",
                failed.id, failed.attempts, failed.reason
            );
        }
        if report.failed.len() > MAX_LISTED_IDS {
            println!("    ... and {} more", report.failed.len() - MAX_LISTED_IDS);
        }
    }

    if !report.incomplete.is_empty() {
        println!(
            "  {} ideas were not processed; rerun them from the input file",
            report.incomplete.len()
        );
    }
}
