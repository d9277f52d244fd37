mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use ideacat_config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = cli::Cli::parse();

    match cli.command {
        cli::Commands::Init { force } => commands::init::handle(cli.config.as_deref(), force),
        cli::Commands::Categorize(args) => {
            let config = Config::load(cli.config.as_deref())?;
            commands::categorize::handle(args, config).await
        }
        cli::Commands::Estimate(args) => {
            let config = Config::load(cli.config.as_deref())?;
            commands::estimate::handle(args, config)
        }
    }
}
