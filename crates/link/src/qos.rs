//! Quality-of-service to settle-mode mapping.

use courier_core::QosLevel;
use serde::{Deserialize, Serialize};

/// Settle mode advertised for one side of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettleMode {
    /// Deliveries are settled when sent.
    Settled,
    /// Deliveries stay unsettled until the other side settles them.
    Unsettled,
    /// The sender decides per delivery; used for two-phase settlement.
    Mixed,
}

impl std::fmt::Display for SettleMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Settled => write!(f, "settled"),
            Self::Unsettled => write!(f, "unsettled"),
            Self::Mixed => write!(f, "mixed"),
        }
    }
}

/// Sender and receiver settle modes for one QoS level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QosPolicy {
    pub sender: SettleMode,
    pub receiver: SettleMode,
}

const POLICIES: [(QosLevel, QosPolicy); 3] = [
    (
        QosLevel::AtMostOnce,
        QosPolicy {
            sender: SettleMode::Settled,
            receiver: SettleMode::Unsettled,
        },
    ),
    (
        QosLevel::AtLeastOnce,
        QosPolicy {
            sender: SettleMode::Unsettled,
            receiver: SettleMode::Settled,
        },
    ),
    (
        QosLevel::ExactlyOnce,
        QosPolicy {
            sender: SettleMode::Unsettled,
            receiver: SettleMode::Mixed,
        },
    ),
];

impl QosPolicy {
    /// Settle modes for `level`.
    pub const fn for_level(level: QosLevel) -> Self {
        let index = match level {
            QosLevel::AtMostOnce => 0,
            QosLevel::AtLeastOnce => 1,
            QosLevel::ExactlyOnce => 2,
        };
        POLICIES[index].1
    }

    /// True when transfers go out already settled.
    pub const fn presettles(&self) -> bool {
        matches!(self.sender, SettleMode::Settled)
    }

    /// True when the receiver's disposition is itself left unsettled and the
    /// sender confirms it.
    pub const fn two_phase(&self) -> bool {
        matches!(self.receiver, SettleMode::Mixed)
    }
}

impl From<QosLevel> for QosPolicy {
    fn from(level: QosLevel) -> Self {
        Self::for_level(level)
    }
}
