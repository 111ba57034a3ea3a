//! Sender and receiver links.
//!
//! Links are owned by a [`Session`](crate::session::Session) and only ever
//! mutated on its execution context. Callers hold lightweight [`Sender`] and
//! [`Receiver`] handles.

mod receiver;
mod sender;

use std::collections::VecDeque;

use courier_core::{Error, QosLevel, Result};
use serde::{Deserialize, Serialize};

pub use receiver::{Delivery, DeliveryConsumer, Receiver};
pub(crate) use receiver::ReceiverLink;
pub use sender::{Sender, SettlementOutcome};
pub(crate) use sender::SenderLink;

use crate::callback::Outcome;
use crate::context::ContextSender;
use crate::frame::{Frame, Role};
use crate::qos::QosPolicy;
use crate::record::Destination;
use crate::store::StoreGateway;
use crate::types::{DeliveryTag, LinkHandle};

/// Link lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Created,
    Open,
    /// Detach sent; in-flight results may still resolve.
    Closing,
    Closed,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Completions marshaled back onto the session's context.
#[derive(Debug)]
pub(crate) enum LinkEvent {
    SendPersisted {
        link: LinkHandle,
        tag: DeliveryTag,
        outcome: Outcome<()>,
    },
    AckPersisted {
        link: LinkHandle,
        tag: DeliveryTag,
        outcome: Outcome<()>,
    },
}

/// Session resources a link borrows while it runs an operation.
pub(crate) struct LinkEnv<'a> {
    pub outbox: &'a mut VecDeque<Frame>,
    pub store: &'a dyn StoreGateway,
    pub mailbox: &'a ContextSender<LinkEvent>,
}

/// State common to both link roles.
#[derive(Debug)]
pub(crate) struct LinkCore {
    pub handle: LinkHandle,
    pub name: String,
    pub address: Destination,
    pub role: Role,
    pub qos: QosLevel,
    pub policy: QosPolicy,
    pub state: LinkState,
}

impl LinkCore {
    pub fn new(
        handle: LinkHandle,
        name: String,
        address: Destination,
        role: Role,
        qos: QosLevel,
    ) -> Self {
        Self {
            handle,
            name,
            address,
            role,
            qos,
            policy: QosPolicy::for_level(qos),
            state: LinkState::Created,
        }
    }

    /// Emit the attach frame and move to `Open`.
    pub fn open(&mut self, outbox: &mut VecDeque<Frame>) {
        outbox.push_back(Frame::Attach {
            handle: self.handle,
            name: self.name.clone(),
            role: self.role,
            address: self.address.clone(),
            snd_settle_mode: self.policy.sender,
            rcv_settle_mode: self.policy.receiver,
        });
        self.state = LinkState::Open;
        tracing::debug!(
            link = %self.name,
            handle = %self.handle,
            role = %self.role,
            qos = %self.qos,
            "link opened"
        );
    }

    pub fn ensure_open(&self) -> Result<()> {
        match self.state {
            LinkState::Open => Ok(()),
            state => Err(Error::link_not_open(self.name.clone(), state)),
        }
    }

    /// Emit detach and move to `Closing`. No-op unless open.
    pub fn begin_close(&mut self, outbox: &mut VecDeque<Frame>) {
        if matches!(self.state, LinkState::Created | LinkState::Open) {
            outbox.push_back(Frame::Detach {
                handle: self.handle,
                closed: true,
            });
            self.state = LinkState::Closing;
            tracing::debug!(link = %self.name, "link closing");
        }
    }

    /// Move from `Closing` to `Closed` once nothing is in flight.
    pub fn finish_close_if_idle(&mut self, in_flight: usize) {
        if self.state == LinkState::Closing && in_flight == 0 {
            self.state = LinkState::Closed;
            tracing::debug!(link = %self.name, "link closed");
        }
    }

    /// The peer detached: answer if we had not, and close immediately.
    pub fn peer_detached(&mut self, outbox: &mut VecDeque<Frame>) {
        if self.state != LinkState::Closing && self.state != LinkState::Closed {
            outbox.push_back(Frame::Detach {
                handle: self.handle,
                closed: true,
            });
        }
        self.state = LinkState::Closed;
        tracing::debug!(link = %self.name, "link detached by peer");
    }

    pub fn unknown_delivery(&self, tag: DeliveryTag) -> Error {
        Error::unknown_delivery(self.name.clone(), tag.to_string())
    }
}

/// A link owned by a session.
#[derive(Debug)]
pub(crate) enum Link {
    Sender(SenderLink),
    Receiver(ReceiverLink),
}

impl Link {
    pub const fn core(&self) -> &LinkCore {
        match self {
            Self::Sender(sender) => &sender.core,
            Self::Receiver(receiver) => &receiver.core,
        }
    }

    pub fn in_flight(&self) -> usize {
        match self {
            Self::Sender(sender) => sender.in_flight(),
            Self::Receiver(receiver) => receiver.in_flight(),
        }
    }

    pub fn begin_close(&mut self, outbox: &mut VecDeque<Frame>) {
        match self {
            Self::Sender(sender) => sender.begin_close(outbox),
            Self::Receiver(receiver) => receiver.begin_close(outbox),
        }
    }

    pub fn finish_close_if_idle(&mut self) {
        let in_flight = self.in_flight();
        match self {
            Self::Sender(sender) => sender.core.finish_close_if_idle(in_flight),
            Self::Receiver(receiver) => receiver.core.finish_close_if_idle(in_flight),
        }
    }

    /// Sender: queued plus unsettled. Receiver: delivered but unacknowledged.
    pub fn outstanding(&self) -> usize {
        match self {
            Self::Sender(sender) => sender.in_flight(),
            Self::Receiver(receiver) => receiver.unacked(),
        }
    }

    pub const fn flow_in_use(&self) -> u64 {
        match self {
            Self::Sender(sender) => sender.flow_in_use(),
            Self::Receiver(receiver) => receiver.flow_in_use(),
        }
    }

    pub fn credit(&self) -> u32 {
        match self {
            Self::Sender(sender) => sender.credit(),
            Self::Receiver(receiver) => receiver.credit(),
        }
    }
}
