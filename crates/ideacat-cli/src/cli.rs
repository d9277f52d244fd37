use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ideacat")]
#[command(about = "Batch categorization of ideas through a rate-limited LLM API", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (default: platform config directory)
    #[arg(long, global = true, env = "IDEACAT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Categorize ideas from a JSON file
    Categorize(CategorizeArgs),

    /// Plan batches and estimate tokens and cost without sending anything
    Estimate(EstimateArgs),

    /// Write the default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Settings shared by every command that plans batches
#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    /// JSON array of ideas with `_id`/`id` and `text`/`title`
    pub input: PathBuf,

    /// Model name from the config's model table
    #[arg(long)]
    pub model: Option<String>,

    /// Token ceiling per batch
    #[arg(long)]
    pub max_tokens: Option<usize>,

    /// Item ceiling per batch
    #[arg(long)]
    pub max_items: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct CategorizeArgs {
    #[command(flatten)]
    pub plan: PlanArgs,

    /// Directory for results, checkpoints and metrics
    #[arg(long, default_value = "output")]
    pub output_dir: PathBuf,

    /// Concurrent requests
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Retry rounds after the first pass
    #[arg(long)]
    pub max_retry_rounds: Option<u32>,

    /// Use the offline test classifier instead of the API
    #[arg(long)]
    pub test: bool,

    /// Do not pace requests against the model's rate limits
    #[arg(long)]
    pub no_rate_limit: bool,

    /// Stop submitting new batches after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct EstimateArgs {
    #[command(flatten)]
    pub plan: PlanArgs,

    /// Print every batch, not just the totals
    #[arg(long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_categorize() {
        let cli = Cli::parse_from([
            "ideacat",
            "categorize",
            "ideas.json",
            "--model",
            "gpt-4o",
            "--max-workers",
            "4",
            "--test",
            "--no-rate-limit",
        ]);
        match cli.command {
            Commands::Categorize(args) => {
                assert_eq!(args.plan.input, PathBuf::from("ideas.json"));
                assert_eq!(args.plan.model.as_deref(), Some("gpt-4o"));
                assert_eq!(args.max_workers, Some(4));
                assert!(args.test);
                assert!(args.no_rate_limit);
                assert_eq!(args.output_dir, PathBuf::from("output"));
            }
            _ => panic!("expected categorize"),
        }
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::parse_from(["ideacat", "estimate", "ideas.json", "--config", "/tmp/c.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
    }
}
