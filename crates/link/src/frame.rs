//! Link-level frames exchanged with the peer.
//!
//! [`Frame`] is what a session emits; [`PeerFrame`] is what it is fed.
//! Encoding onto a real wire is the job of whatever implements [`FrameSink`].

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::qos::SettleMode;
use crate::record::{Destination, DeliveryRecord};
use crate::types::{DeliveryTag, LinkHandle};

/// Which end of a link a frame speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Sender,
    Receiver,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sender => write!(f, "sender"),
            Self::Receiver => write!(f, "receiver"),
        }
    }
}

/// Terminal or intermediate state of a delivery as reported by a disposition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Accepted,
    Rejected { reason: String },
    Released,
    Modified { delivery_failed: bool },
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::Rejected { reason } => write!(f, "rejected: {reason}"),
            Self::Released => write!(f, "released"),
            Self::Modified { delivery_failed } => {
                write!(f, "modified (delivery failed: {delivery_failed})")
            }
        }
    }
}

/// Outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Attach {
        handle: LinkHandle,
        name: String,
        role: Role,
        address: Destination,
        snd_settle_mode: SettleMode,
        rcv_settle_mode: SettleMode,
    },
    /// Receiver credit. `delivery_count` is how many transfers the receiver
    /// had seen when it granted `link_credit`.
    Flow {
        handle: LinkHandle,
        delivery_count: u32,
        link_credit: u32,
    },
    Transfer {
        handle: LinkHandle,
        tag: DeliveryTag,
        settled: bool,
        record: DeliveryRecord,
    },
    Disposition {
        handle: LinkHandle,
        role: Role,
        tag: DeliveryTag,
        state: DeliveryState,
        settled: bool,
    },
    Detach {
        handle: LinkHandle,
        closed: bool,
    },
}

impl Frame {
    /// Link the frame belongs to.
    pub const fn handle(&self) -> LinkHandle {
        match self {
            Self::Attach { handle, .. }
            | Self::Flow { handle, .. }
            | Self::Transfer { handle, .. }
            | Self::Disposition { handle, .. }
            | Self::Detach { handle, .. } => *handle,
        }
    }

    /// Short frame name for logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Attach { .. } => "attach",
            Self::Flow { .. } => "flow",
            Self::Transfer { .. } => "transfer",
            Self::Disposition { .. } => "disposition",
            Self::Detach { .. } => "detach",
        }
    }

    /// The frame as the other end of the link sees it, retargeted at
    /// `handle`. Attach has no inbound counterpart.
    pub fn into_peer(self, handle: LinkHandle) -> Option<PeerFrame> {
        match self {
            Self::Attach { .. } => None,
            Self::Flow {
                delivery_count,
                link_credit,
                ..
            } => Some(PeerFrame::Flow {
                handle,
                delivery_count,
                link_credit,
            }),
            Self::Transfer {
                tag,
                settled,
                record,
                ..
            } => Some(PeerFrame::Transfer {
                handle,
                tag,
                settled,
                record: record.into_inbound(),
            }),
            Self::Disposition {
                tag,
                state,
                settled,
                ..
            } => Some(PeerFrame::Disposition {
                handle,
                tag,
                state,
                settled,
            }),
            Self::Detach { .. } => Some(PeerFrame::Detach { handle }),
        }
    }
}

/// Inbound frame from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerFrame {
    /// Credit the peer grants our sender, counted from `delivery_count`
    /// transfers received.
    Flow {
        handle: LinkHandle,
        delivery_count: u32,
        link_credit: u32,
    },
    /// A delivery for one of our receivers.
    Transfer {
        handle: LinkHandle,
        tag: DeliveryTag,
        settled: bool,
        record: DeliveryRecord,
    },
    /// Outcome of one of our sends.
    Disposition {
        handle: LinkHandle,
        tag: DeliveryTag,
        state: DeliveryState,
        settled: bool,
    },
    Detach {
        handle: LinkHandle,
    },
}

impl PeerFrame {
    /// Link the frame is addressed to.
    pub const fn handle(&self) -> LinkHandle {
        match self {
            Self::Flow { handle, .. }
            | Self::Transfer { handle, .. }
            | Self::Disposition { handle, .. }
            | Self::Detach { handle } => *handle,
        }
    }

    /// Short frame name for logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Flow { .. } => "flow",
            Self::Transfer { .. } => "transfer",
            Self::Disposition { .. } => "disposition",
            Self::Detach { .. } => "detach",
        }
    }
}

/// Destination for outbound frames.
pub trait FrameSink: Send {
    fn write_frame(&mut self, frame: Frame);
}

impl FrameSink for Vec<Frame> {
    fn write_frame(&mut self, frame: Frame) {
        self.push(frame);
    }
}

/// Cloneable sink that records frames for later inspection.
#[derive(Debug, Clone, Default)]
pub struct FrameRecorder {
    frames: Arc<Mutex<Vec<Frame>>>,
}

impl FrameRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every recorded frame.
    pub fn frames(&self) -> Vec<Frame> {
        self.frames
            .lock()
            .map(|frames| frames.clone())
            .unwrap_or_default()
    }

    /// Remove and return every recorded frame.
    pub fn take(&self) -> Vec<Frame> {
        self.frames
            .lock()
            .map(|mut frames| std::mem::take(&mut *frames))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().map(|frames| frames.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recorded transfers as `(handle, tag, settled)`.
    pub fn transfers(&self) -> Vec<(LinkHandle, DeliveryTag, bool)> {
        self.frames()
            .into_iter()
            .filter_map(|frame| match frame {
                Frame::Transfer {
                    handle,
                    tag,
                    settled,
                    ..
                } => Some((handle, tag, settled)),
                _ => None,
            })
            .collect()
    }

    /// Recorded dispositions as `(handle, tag, state, settled)`.
    pub fn dispositions(&self) -> Vec<(LinkHandle, DeliveryTag, DeliveryState, bool)> {
        self.frames()
            .into_iter()
            .filter_map(|frame| match frame {
                Frame::Disposition {
                    handle,
                    tag,
                    state,
                    settled,
                    ..
                } => Some((handle, tag, state, settled)),
                _ => None,
            })
            .collect()
    }
}

impl FrameSink for FrameRecorder {
    fn write_frame(&mut self, frame: Frame) {
        if let Ok(mut frames) = self.frames.lock() {
            frames.push(frame);
        }
    }
}
