//! unibench - Repeatable database cluster benchmarks

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    let Some(suite) = cli.suite.clone() else {
        return cli::print_usage();
    };

    tracing::info!(suite = %suite.display(), "unibench starting");

    match cli::run_suite(&cli, &suite).await {
        Ok(summary) => {
            if summary.variants_failed > 0 || summary.worker_failures > 0 {
                tracing::warn!(
                    variants_failed = summary.variants_failed,
                    worker_failures = summary.worker_failures,
                    "Suite finished with failures"
                );
            }
            Ok(())
        }
        Err(e) => {
            let chain = format!("{e:#}");
            tracing::error!(error = %chain, "Benchmark run aborted");
            Err(e)
        }
    }
}
