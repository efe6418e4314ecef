//! `wlm-scpi-server`: SCPI daemon for HighFinesse wavemeters.
//!
//! Starts one TCP server per configured wavemeter. All servers share a
//! single wlmData driver instance.
//!
//! # Usage
//!
//! ```bash
//! wlm-scpi-server --config config/wlm_scpi.toml
//! WAVEMETERS='[[4711, null, 5000]]' wlm-scpi-server --simulate
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use wlm_scpi::config::{parse_log_level, DEFAULT_CONFIG_PATH};
use wlm_scpi::driver::{SimulatedDriver, WavemeterDriver};
use wlm_scpi::{DriverHub, Settings, WavemeterServer};

#[derive(Parser)]
#[command(name = "wlm-scpi-server")]
#[command(version, about = "SCPI network server for HighFinesse wavemeters", long_about = None)]
struct Cli {
    /// Configuration file (TOML format)
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Serve simulated wavemeters instead of the wlmData driver
    #[arg(long)]
    simulate: bool,

    /// Log level, overrides the configuration (name or numeric level)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        if parse_log_level(&level).is_none() {
            bail!("Invalid log level '{level}'");
        }
        settings.application.log_level = level;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(settings.log_level().into())
                .from_env_lossy(),
        )
        .init();

    tracing::warn!("#################################################");
    tracing::warn!("Starting SCPI daemon v{}...", env!("CARGO_PKG_VERSION"));
    tracing::warn!("#################################################");

    let result = run(settings, cli.simulate).await;

    tracing::warn!("#################################################");
    tracing::warn!("Stopping SCPI daemon...");
    tracing::warn!("#################################################");
    result
}

async fn run(settings: Settings, simulate: bool) -> Result<()> {
    let driver = create_driver(&settings, simulate)?;
    let hub = Arc::new(DriverHub::new(driver));
    let shutdown = CancellationToken::new();

    tracing::info!(
        "Wavemeter configurations found for {:?}",
        settings.product_ids()
    );

    let mut servers = Vec::new();
    let mut bind_error = None;
    for endpoint in &settings.wavemeters {
        match WavemeterServer::bind(endpoint, Arc::clone(&hub), settings.server.clone()).await {
            Ok(server) => servers.push(server),
            Err(err) => {
                bind_error = Some(anyhow::Error::new(err).context(format!(
                    "Failed to start server for wavemeter {}",
                    endpoint.product_id
                )));
                break;
            }
        }
    }

    if bind_error.is_some() {
        shutdown.cancel();
    } else {
        let token = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Received Ctrl-C, shutting down"),
                Err(err) => tracing::error!("Failed to listen for Ctrl-C: {}", err),
            }
            token.cancel();
        });
    }

    let tasks: Vec<_> = servers
        .into_iter()
        .map(|server| tokio::spawn(server.serve(shutdown.clone())))
        .collect();

    for task in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::error!("Server stopped with error: {}", err),
            Err(err) => tracing::error!("Server task failed: {}", err),
        }
    }

    match bind_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn create_driver(settings: &Settings, simulate: bool) -> Result<Arc<dyn WavemeterDriver>> {
    if simulate {
        tracing::warn!("Using simulated wavemeters");
        return Ok(Arc::new(SimulatedDriver::with_wavemeters(
            settings.product_ids(),
        )));
    }

    #[cfg(feature = "wlm-sdk")]
    {
        tracing::info!(
            connection_type = ?settings.application.connection_type,
            "Using the wlmData driver"
        );
        Ok(Arc::new(wlm_scpi::driver::WlmDriver::new()))
    }

    #[cfg(not(feature = "wlm-sdk"))]
    {
        bail!("Built without the wlm-sdk feature; run with --simulate")
    }
}
