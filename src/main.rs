//! CLI Entry Point for fbg-daq
//!
//! Provides command-line interface for:
//! - Running the acquisition service (control channel + pipeline)
//! - Checking an instrument description file offline
//!
//! # Usage
//!
//! Start the service:
//! ```bash
//! fbg-daq serve --config config/fbg_daq.toml --listen 0.0.0.0:7681
//! ```
//!
//! Check a description message:
//! ```bash
//! fbg-daq check line-12.json
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fbg_daq::config::{Settings, DEFAULT_CONFIG_PATH};
use fbg_daq::control::ControlServer;
use fbg_daq::description::InstrumentDescription;
use fbg_daq::logging;
use fbg_daq::pipeline::{simulated_source_factory, Pipeline, PipelineContext};
use std::path::PathBuf;
use tokio::signal;
use tracing::info;

#[derive(Parser)]
#[command(name = "fbg-daq")]
#[command(
    about = "FBG line monitoring: peaks to temperature, tension, bending and ice",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the acquisition service
    Serve {
        /// Settings file (TOML format)
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Control channel address, overrides the settings file
        #[arg(long)]
        listen: Option<String>,
    },

    /// Decode an instrument description and report every device
    Check {
        /// Path to the JSON description message
        description: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => serve(config, listen).await,
        Commands::Check { description } => check(description).await,
    }
}

async fn serve(config: PathBuf, listen: Option<String>) -> Result<()> {
    let mut settings = Settings::load_from(&config)
        .with_context(|| format!("loading settings from {}", config.display()))?;
    if let Some(listen) = listen {
        settings.server.listen_address = listen;
        settings.validate()?;
    }
    logging::init_from_settings(&settings).map_err(anyhow::Error::msg)?;

    info!(name = %settings.application.name, "starting");
    let ctx = PipelineContext::new(&settings);
    let server = ControlServer::bind(&settings.server.listen_address, ctx.clone()).await?;
    let pipeline = Pipeline::spawn(ctx, simulated_source_factory(&settings.source));

    tokio::select! {
        () = server.run() => {}
        result = signal::ctrl_c() => {
            result.context("waiting for Ctrl+C")?;
            info!("shutdown signal received");
        }
    }

    pipeline.shutdown();
    Ok(())
}

async fn check(path: PathBuf) -> Result<()> {
    let message = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let report = InstrumentDescription::decode(&message)?.into_configuration()?;
    let config = &report.configuration;

    println!(
        "Instrument {} | scan {} Hz | output {} Hz",
        config.instrument_address, config.scan_rate_hz, config.sample_rate_hz
    );
    for device in &config.devices {
        println!("  ok   ch{} {}", device.channel(), device);
    }
    for error in &report.rejected {
        println!("  FAIL {error}");
    }

    if report.rejected.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("{} device(s) rejected", report.rejected.len())
    }
}
