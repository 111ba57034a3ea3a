#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # Courier
//!
//! Delivery and acknowledgment core for a multi-protocol message broker.
//!
//! This library re-exports the workspace crates and hosts the loopback
//! harness behind the `courier` binary.

pub use courier_core;
pub use courier_link;

pub mod cli;
pub mod demo;
pub mod loopback;

use std::path::Path;

use anyhow::{Context, Result};
use courier_core::{QosLevel, SessionConfig};

/// Resolve the effective configuration: file, then `COURIER_*` variables,
/// then command-line overrides.
///
/// # Errors
///
/// Fails if the file cannot be loaded or a value is invalid.
pub fn load_config(
    path: Option<&Path>,
    qos: Option<QosLevel>,
    prefetch: Option<u32>,
) -> Result<SessionConfig> {
    let config = match path {
        Some(path) => SessionConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => SessionConfig::default(),
    };
    let mut config = config
        .apply_env()
        .context("applying COURIER_* environment variables")?;

    if let Some(qos) = qos {
        config = config.with_qos(qos);
    }
    if let Some(prefetch) = prefetch {
        config = config.with_prefetch(prefetch);
    }
    config.validate()?;
    Ok(config)
}
