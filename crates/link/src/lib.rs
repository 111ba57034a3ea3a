//! Delivery and acknowledgment core for the Courier broker.
//!
//! # Architecture
//!
//! - **Records**: [`DeliveryRecord`] and its [`FlowToken`] cost
//! - **QoS**: [`QosPolicy`] maps a [`QosLevel`](courier_core::QosLevel) to settle modes
//! - **Results**: [`AsyncResult`] one-shot completions and their chains
//! - **Links**: [`Sender`] and [`Receiver`] handles over session-owned link state
//! - **Sessions**: [`Session`] owns links, frames and the store completion mailbox
//! - **Store**: [`StoreGateway`] is the persistence boundary
//!
//! All link state is mutated on one execution context, entered through a
//! [`DispatchQueue`]. Store completions from other threads are marshaled back
//! and applied by [`Session::run_pending`].

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod callback;
pub mod context;
pub mod flow;
pub mod frame;
pub mod link;
pub mod names;
pub mod qos;
pub mod record;
pub mod session;
pub mod store;
pub mod types;

pub use callback::{AsyncResult, Outcome, ResultFuture};
pub use context::{ContextSender, DispatchQueue, Executing, Mailbox, assert_executing};
pub use flow::{CreditWindow, FlowController};
pub use frame::{DeliveryState, Frame, FrameRecorder, FrameSink, PeerFrame, Role};
pub use link::{Delivery, DeliveryConsumer, LinkState, Receiver, Sender, SettlementOutcome};
pub use names::{NameGenerator, SequentialNameGenerator, UlidNameGenerator};
pub use qos::{QosPolicy, SettleMode};
pub use record::{
    DeliveryRecord, DeliveryRecordBuilder, Destination, FlowToken, MessageBody, StoreRecord,
    byte_range,
};
pub use session::{LinkInfo, ReceiverOptions, SenderOptions, Session};
pub use store::{InMemoryStoreGateway, StoreGateway, TracingStoreGateway};
pub use types::{ContextId, DeliveryTag, LinkHandle, RecordHandle};
