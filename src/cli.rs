//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use courier_core::QosLevel;

/// Courier - delivery and acknowledgment core
#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(version)]
#[command(about = "Delivery and acknowledgment core for a multi-protocol message broker")]
#[command(
    long_about = "Courier moves records over credit-based links with at-most-once, at-least-once or exactly-once guarantees. The demo command runs a sender and a receiver session back to back in one process."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send messages through an in-process link pair
    Demo {
        /// Configuration file (TOML, or JSON with a .json extension)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Delivery guarantee (at-most-once, at-least-once, exactly-once)
        #[arg(short, long)]
        qos: Option<QosLevel>,

        /// Receiver prefetch
        #[arg(short, long)]
        prefetch: Option<u32>,

        /// Number of messages to send
        #[arg(short, long, default_value_t = 10)]
        messages: usize,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Configuration file (TOML, or JSON with a .json extension)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
