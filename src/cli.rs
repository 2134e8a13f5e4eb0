//! Command line interface of the `cat-cache` binary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use cat_cache::config::Config;
use cat_cache::{logging, service};

/// Serves HTTP status cats through an expiring single-flight cache.
#[derive(Debug, Parser)]
#[command(name = "cat-cache", version)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, short, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address to listen on, overriding `bind` from the configuration.
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,
}

/// Runs the application until interrupted.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::get(cli.config.as_deref()).context("failed loading config")?;
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }

    logging::init_logging(&config.logging);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the tokio runtime")?;

    runtime.block_on(service::run(config, shutdown_signal()))
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received interrupt, shutting down"),
        Err(error) => tracing::error!(%error, "failed to listen for interrupt"),
    }
}
