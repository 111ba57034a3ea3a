//! # Courier - command-line entry point
//!
//! `courier demo` wires a sender session and a receiver session back to back
//! in one process and pushes messages through persistence and settlement.
//! `courier config` prints the effective configuration.
//!
//! Log output is controlled by `RUST_LOG` (default `info`).

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use courier::cli::{Cli, Commands};
use courier::demo::run_demo;
use courier::load_config;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Demo {
            config,
            qos,
            prefetch,
            messages,
        } => {
            let start = Instant::now();
            let config = load_config(config.as_deref(), qos, prefetch)?;
            info!(qos = %config.link.qos, prefetch = config.link.prefetch, messages, "starting demo");

            let report = run_demo(&config, messages)?;
            println!(
                "qos={} sent={} accepted={} presettled={} failed={} acknowledged={} frames={}",
                report.qos,
                report.sent,
                report.accepted,
                report.presettled,
                report.failed,
                report.acknowledged,
                report.frames
            );
            info!("demo completed in {:?}", start.elapsed());
        }
        Commands::Config { config } => {
            let config = load_config(config.as_deref(), None, None)?;
            print!("{}", config.to_toml()?);
        }
    }
    Ok(())
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
