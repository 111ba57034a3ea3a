//! Core types shared by the Courier crates.
//!
//! - **Errors**: the typed failure taxonomy carried by results and chains
//! - **Results**: the `Result` alias and logging combinators
//! - **Configuration**: link and session defaults (qos, prefetch, link name)

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod error;
pub mod result;

pub use config::{CreditMode, DEFAULT_PREFETCH, LinkConfig, QosLevel, SessionConfig};
pub use error::Error;
pub use result::{Result, ResultExt};
