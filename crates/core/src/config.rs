//! Link and session configuration.
//!
//! Recognized options are the delivery guarantee, the receiver prefetch and
//! the link name. Everything carries a serde default so partial files load.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::result::Result;

/// Default receiver prefetch (maximum outstanding unacknowledged deliveries).
pub const DEFAULT_PREFETCH: u32 = 100;

/// Logical delivery guarantee negotiated per link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QosLevel {
    /// Fire and forget; a delivery may be lost.
    AtMostOnce,
    /// No loss; a delivery may be duplicated.
    #[default]
    AtLeastOnce,
    /// No loss and no duplication (dedup is outside this core).
    ExactlyOnce,
}

impl QosLevel {
    /// All levels, in declaration order.
    pub const ALL: [Self; 3] = [Self::AtMostOnce, Self::AtLeastOnce, Self::ExactlyOnce];
}

impl fmt::Display for QosLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AtMostOnce => "at_most_once",
            Self::AtLeastOnce => "at_least_once",
            Self::ExactlyOnce => "exactly_once",
        };
        write!(f, "{s}")
    }
}

impl FromStr for QosLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "at_most_once" => Ok(Self::AtMostOnce),
            "at_least_once" => Ok(Self::AtLeastOnce),
            "exactly_once" => Ok(Self::ExactlyOnce),
            other => Err(Error::invalid_config(format!("unknown qos '{other}'"))),
        }
    }
}

/// How a receiver hands credit back to its peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditMode {
    /// Top credit back up after every completed delivery.
    #[default]
    Incremental,
    /// Let credit drain to zero and refill the full prefetch once every
    /// outstanding delivery has completed.
    DrainAndRefill,
}

impl FromStr for CreditMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "incremental" => Ok(Self::Incremental),
            "drain_and_refill" => Ok(Self::DrainAndRefill),
            other => Err(Error::invalid_config(format!("unknown credit mode '{other}'"))),
        }
    }
}

/// Per-link defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Delivery guarantee.
    #[serde(default)]
    pub qos: QosLevel,

    /// Receiver prefetch.
    #[serde(default = "default_prefetch")]
    pub prefetch: u32,

    /// Fixed link name. Generated when absent.
    #[serde(default)]
    pub link_name: Option<String>,

    /// Receiver credit replenishment policy.
    #[serde(default)]
    pub credit_mode: CreditMode,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            qos: QosLevel::default(),
            prefetch: default_prefetch(),
            link_name: None,
            credit_mode: CreditMode::default(),
        }
    }
}

const fn default_prefetch() -> u32 {
    DEFAULT_PREFETCH
}

const fn default_durable() -> bool {
    true
}

/// Session-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Persistence flag given to records built by the session constructors.
    #[serde(default = "default_durable")]
    pub durable_messages: bool,

    /// Maximum total flow cost a receiver buffers before withholding credit.
    #[serde(default)]
    pub flow_window: Option<u64>,

    /// Defaults applied to links created without explicit options.
    #[serde(default)]
    pub link: LinkConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            durable_messages: default_durable(),
            flow_window: None,
            link: LinkConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Set the default delivery guarantee.
    #[must_use]
    pub const fn with_qos(mut self, qos: QosLevel) -> Self {
        self.link.qos = qos;
        self
    }

    /// Set the default receiver prefetch.
    #[must_use]
    pub const fn with_prefetch(mut self, prefetch: u32) -> Self {
        self.link.prefetch = prefetch;
        self
    }

    /// Set a fixed link name.
    #[must_use]
    pub fn with_link_name(mut self, name: impl Into<String>) -> Self {
        self.link.link_name = Some(name.into());
        self
    }

    /// Set the credit replenishment policy.
    #[must_use]
    pub const fn with_credit_mode(mut self, mode: CreditMode) -> Self {
        self.link.credit_mode = mode;
        self
    }

    /// Set the persistence flag for session-built records.
    #[must_use]
    pub const fn with_durable_messages(mut self, durable: bool) -> Self {
        self.durable_messages = durable;
        self
    }

    /// Bound the flow cost a receiver may buffer.
    #[must_use]
    pub const fn with_flow_window(mut self, window: u64) -> Self {
        self.flow_window = Some(window);
        self
    }

    /// Load configuration from a file. JSON when the extension is `.json`,
    /// TOML otherwise.
    ///
    /// # Errors
    ///
    /// Returns `ConfigRead` if the file cannot be read and `InvalidConfig` if
    /// it does not parse or fails validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config_read(path, e.to_string()))?;

        let config: Self = if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content).map_err(|e| Error::invalid_config(e.to_string()))?
        } else {
            toml::from_str(&content).map_err(|e| Error::invalid_config(e.to_string()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Overlay `COURIER_*` environment variables on this configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if a variable is present but malformed.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Overlay variables from an arbitrary lookup.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if a variable is present but malformed.
    pub fn apply_vars<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(qos) = lookup("COURIER_QOS") {
            self.link.qos = qos.parse()?;
        }

        if let Some(prefetch) = lookup("COURIER_PREFETCH") {
            self.link.prefetch = prefetch
                .trim()
                .parse()
                .map_err(|_| Error::invalid_config(format!("invalid prefetch '{prefetch}'")))?;
        }

        if let Some(name) = lookup("COURIER_LINK_NAME") {
            self.link.link_name = Some(name);
        }

        if let Some(mode) = lookup("COURIER_CREDIT_MODE") {
            self.link.credit_mode = mode.parse()?;
        }

        if let Some(durable) = lookup("COURIER_DURABLE") {
            self.durable_messages = match durable.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(Error::invalid_config(format!(
                        "invalid COURIER_DURABLE '{other}'"
                    )));
                }
            };
        }

        self.validate()?;
        Ok(self)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an empty link name or a zero flow window.
    pub fn validate(&self) -> Result<()> {
        if self
            .link
            .link_name
            .as_deref()
            .is_some_and(|n| n.trim().is_empty())
        {
            return Err(Error::invalid_config("link_name must not be empty"));
        }
        if self.flow_window == Some(0) {
            return Err(Error::invalid_config("flow_window must be greater than zero"));
        }
        Ok(())
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::internal(e.to_string()))
    }
}
