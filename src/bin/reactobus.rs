//! reactobus: the bus daemon
//!
//! Loads the configuration, builds every stage and runs them until SIGINT
//! or SIGTERM.
//!
//! ## Usage
//! ```text
//! reactobus --config /etc/reactobus.yaml --level DEBUG --log-file -
//! ```

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use reactobus::config::{Config, CONFIG_ENV_VAR};
use reactobus::utils::bootstrap::{init_tracing, STDOUT};
use reactobus::{Context, Pipeline, Registry};

#[derive(Parser)]
#[command(name = "reactobus")]
#[command(about = "Message bus relaying envelopes to outputs, the reactor and the archive")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = CONFIG_ENV_VAR, default_value = reactobus::config::DEFAULT_CONFIG_FILE)]
    config: String,

    /// Log level
    #[arg(
        short,
        long,
        default_value = "INFO",
        value_parser = ["DEBUG", "INFO", "WARN", "ERROR"],
        ignore_case = true
    )]
    level: String,

    /// Log file, "-" for stdout
    #[arg(long, default_value = STDOUT)]
    log_file: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli.level, &cli.log_file)?;

    let config = Config::load(Some(&cli.config)).map_err(|e| {
        error!(path = %cli.config, "Failed to load configuration: {}", e);
        e
    })?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting reactobus");

    let ctx = Context::new();
    let pipeline = Pipeline::build(&config, &ctx, &Registry::default())
        .await
        .map_err(|e| {
            error!("Failed to build pipeline: {}", e);
            e
        })?;
    info!(stages = ?pipeline.stage_names(), "Pipeline ready");

    let cancel = CancellationToken::new();
    let running = tokio::spawn(pipeline.run(cancel.clone()));

    shutdown_signal().await?;
    info!("Shutdown requested, stopping stages");
    cancel.cancel();
    running.await?;

    info!("Stopped");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
