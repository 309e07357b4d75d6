use anyhow::Result;
use clap::Parser;
use script_runner::cli::{Cli, Commands};
use script_runner::RunnerConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();
    let verbosity = cli.verbosity();

    // Logs go to stderr; stdout carries the event stream
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| verbosity.to_log_level().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Run(args) => {
            let config = RunnerConfig::load(cli.config.as_deref())?;
            script_runner::cli::commands::run(args, config, verbosity)?;
        }
        Commands::Instrument(args) => {
            script_runner::cli::commands::instrument(args, verbosity)?;
        }
        Commands::Check(args) => {
            script_runner::cli::commands::check(args, verbosity)?;
        }
    }

    Ok(())
}
