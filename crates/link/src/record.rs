//! Delivery records.
//!
//! A [`DeliveryRecord`] is one message moving through a link, together with
//! the routing and durability metadata the broker needs. Its [`FlowToken`] is
//! computed once when the record is built and never changes.

use chrono::{DateTime, Utc};
use courier_core::{Error, Result};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::callback::AsyncResult;
use crate::store::StoreGateway;
use crate::types::RecordHandle;

/// Fixed per-record cost added to the payload and header sizes.
pub const RECORD_OVERHEAD: u64 = 64;

/// Priority given to records that do not set one.
pub const DEFAULT_PRIORITY: u8 = 4;

/// Highest accepted priority; larger values are clamped.
pub const MAX_PRIORITY: u8 = 9;

/// Flow-control cost of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowToken {
    cost: u64,
}

impl FlowToken {
    /// A token with no cost.
    pub const ZERO: Self = Self { cost: 0 };

    /// Create a token with the given cost.
    pub const fn new(cost: u64) -> Self {
        Self { cost }
    }

    /// Cost in flow units (bytes plus fixed overhead).
    pub const fn cost(&self) -> u64 {
        self.cost
    }
}

/// Opaque routing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Destination(String);

impl Destination {
    /// Create a destination.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Address text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when no address is set.
    pub fn is_unrouted(&self) -> bool {
        self.0.is_empty()
    }

    fn byte_len(&self) -> u64 {
        byte_len(self.0.len())
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Destination {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for Destination {
    fn from(address: String) -> Self {
        Self(address)
    }
}

/// Message payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MessageBody {
    Text(String),
    Binary(Vec<u8>),
}

impl MessageBody {
    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// True for an empty payload.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Text payload, if this is a text body.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Binary payload, if this is a binary body.
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(bytes) => Some(bytes),
            Self::Text(_) => None,
        }
    }
}

/// One message moving through a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    destination: Destination,
    priority: u8,
    flow: FlowToken,
    message_id: Vec<u8>,
    producer_id: Vec<u8>,
    persistent: bool,
    response_required: bool,
    persisted: bool,
    body: MessageBody,
    created_at: DateTime<Utc>,
}

impl DeliveryRecord {
    /// Start building a text record.
    pub fn text(text: impl Into<String>) -> DeliveryRecordBuilder {
        DeliveryRecordBuilder::new(MessageBody::Text(text.into()))
    }

    /// Start building a binary record.
    pub fn binary(bytes: impl Into<Vec<u8>>) -> DeliveryRecordBuilder {
        DeliveryRecordBuilder::new(MessageBody::Binary(bytes.into()))
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub const fn priority(&self) -> u8 {
        self.priority
    }

    pub const fn flow_token(&self) -> FlowToken {
        self.flow
    }

    pub fn message_id(&self) -> &[u8] {
        &self.message_id
    }

    pub fn producer_id(&self) -> &[u8] {
        &self.producer_id
    }

    /// True when the record must be persisted before it is settled.
    pub const fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub const fn is_response_required(&self) -> bool {
        self.response_required
    }

    /// True once the store confirmed persistence.
    pub const fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub const fn body(&self) -> &MessageBody {
        &self.body
    }

    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Text view of the body, if any.
    pub fn as_text(&self) -> Option<&str> {
        self.body.as_text()
    }

    /// Binary view of the body, if any.
    pub fn as_binary(&self) -> Option<&[u8]> {
        self.body.as_binary()
    }

    /// Latch the persisted flag. Only called from the owning context.
    pub(crate) fn mark_persisted(&mut self) {
        self.persisted = true;
    }

    /// The record as the far end of a link first sees it. Persistence is
    /// local to each side.
    pub(crate) fn into_inbound(mut self) -> Self {
        self.persisted = false;
        self
    }

    /// Snapshot the store writes.
    pub fn create_store_record(&self) -> StoreRecord {
        StoreRecord {
            message_id: self.message_id.clone(),
            producer_id: self.producer_id.clone(),
            destination: self.destination.clone(),
            priority: self.priority,
            flow_cost: self.flow.cost(),
            response_required: self.response_required,
            body: self.body.clone(),
            created_at: self.created_at,
        }
    }

    /// Create the store record for this delivery and request persistence,
    /// forwarding the store's outcome into `done`.
    ///
    /// Never blocks; `done` may be resolved on a store thread.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the store handed back a result that already has
    /// a listener.
    pub fn attach_persist_completion(
        &self,
        store: &dyn StoreGateway,
        done: AsyncResult<()>,
    ) -> Result<RecordHandle> {
        let handle = store.create_record(self);
        tracing::trace!(
            record = %handle,
            cost = self.flow.cost(),
            "requesting persistence"
        );
        store.request_persist(handle).forward_to(done)?;
        Ok(handle)
    }
}

/// Builder for [`DeliveryRecord`]. The flow cost is computed by [`Self::build`].
#[derive(Debug, Clone)]
pub struct DeliveryRecordBuilder {
    body: MessageBody,
    destination: Destination,
    priority: u8,
    message_id: Option<Vec<u8>>,
    producer_id: Vec<u8>,
    persistent: bool,
    response_required: bool,
}

impl DeliveryRecordBuilder {
    fn new(body: MessageBody) -> Self {
        Self {
            body,
            destination: Destination::default(),
            priority: DEFAULT_PRIORITY,
            message_id: None,
            producer_id: Vec::new(),
            persistent: false,
            response_required: false,
        }
    }

    #[must_use]
    pub fn with_destination(mut self, destination: impl Into<Destination>) -> Self {
        self.destination = destination.into();
        self
    }

    /// Set the priority, clamped to [`MAX_PRIORITY`].
    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(MAX_PRIORITY);
        self
    }

    #[must_use]
    pub fn with_message_id(mut self, id: impl Into<Vec<u8>>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_producer_id(mut self, id: impl Into<Vec<u8>>) -> Self {
        self.producer_id = id.into();
        self
    }

    /// Require persistence before settlement.
    #[must_use]
    pub const fn durable(self) -> Self {
        self.with_durable(true)
    }

    #[must_use]
    pub const fn with_durable(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    #[must_use]
    pub const fn with_response_required(mut self, required: bool) -> Self {
        self.response_required = required;
        self
    }

    /// Finish the record, assigning its message ID and flow token.
    pub fn build(self) -> DeliveryRecord {
        let message_id = self
            .message_id
            .unwrap_or_else(|| Ulid::new().to_bytes().to_vec());
        let cost = flow_cost(
            &self.body,
            &self.destination,
            &message_id,
            &self.producer_id,
        );
        DeliveryRecord {
            destination: self.destination,
            priority: self.priority,
            flow: FlowToken::new(cost),
            message_id,
            producer_id: self.producer_id,
            persistent: self.persistent,
            response_required: self.response_required,
            persisted: false,
            body: self.body,
            created_at: Utc::now(),
        }
    }
}

/// What a store gateway persists for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub message_id: Vec<u8>,
    pub producer_id: Vec<u8>,
    pub destination: Destination,
    pub priority: u8,
    pub flow_cost: u64,
    pub response_required: bool,
    pub body: MessageBody,
    pub created_at: DateTime<Utc>,
}

/// Copy `length` bytes starting at `offset`.
///
/// # Errors
///
/// Returns `Range` when the window overflows or extends past the buffer.
pub fn byte_range(bytes: &[u8], offset: usize, length: usize) -> Result<Vec<u8>> {
    let end = offset
        .checked_add(length)
        .ok_or_else(|| Error::range(offset, length, bytes.len()))?;
    bytes
        .get(offset..end)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| Error::range(offset, length, bytes.len()))
}

fn flow_cost(
    body: &MessageBody,
    destination: &Destination,
    message_id: &[u8],
    producer_id: &[u8],
) -> u64 {
    RECORD_OVERHEAD
        .saturating_add(byte_len(body.len()))
        .saturating_add(destination.byte_len())
        .saturating_add(byte_len(message_id.len()))
        .saturating_add(byte_len(producer_id.len()))
}

fn byte_len(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // ==========================================================================
    // Construction
    // ==========================================================================

    #[test]
    fn should_default_to_transient_priority_four() {
        let record = DeliveryRecord::text("hello").build();

        assert_eq!(record.priority(), DEFAULT_PRIORITY);
        assert!(!record.is_persistent());
        assert!(!record.is_persisted());
        assert!(record.destination().is_unrouted());
        assert_eq!(record.message_id().len(), 16);
        assert_eq!(record.as_text(), Some("hello"));
        assert_eq!(record.as_binary(), None);
    }

    #[test]
    fn should_clamp_priority() {
        let record = DeliveryRecord::binary(vec![1]).with_priority(200).build();
        assert_eq!(record.priority(), MAX_PRIORITY);
    }

    #[test]
    fn should_compute_flow_cost_from_sizes() {
        let record = DeliveryRecord::text("abcd")
            .with_destination("q1")
            .with_message_id(vec![0; 3])
            .with_producer_id(vec![0; 5])
            .build();

        assert_eq!(record.flow_token().cost(), RECORD_OVERHEAD + 4 + 2 + 3 + 5);
    }

    #[test]
    fn should_keep_flow_cost_once_persisted() {
        let mut record = DeliveryRecord::binary(vec![0; 10]).durable().build();
        let before = record.flow_token();

        record.mark_persisted();

        assert_eq!(record.flow_token(), before);
        assert!(record.is_persistent());
        assert!(record.is_persisted());
    }

    #[test]
    fn should_snapshot_store_record() {
        let record = DeliveryRecord::text("x")
            .with_destination("orders")
            .with_priority(7)
            .with_response_required(true)
            .build();

        let stored = record.create_store_record();

        assert_eq!(stored.message_id, record.message_id());
        assert_eq!(stored.destination.as_str(), "orders");
        assert_eq!(stored.priority, 7);
        assert!(stored.response_required);
        assert_eq!(stored.flow_cost, record.flow_token().cost());
    }

    // ==========================================================================
    // Byte ranges
    // ==========================================================================

    #[test]
    fn should_copy_valid_range() {
        assert_eq!(byte_range(&[1, 2, 3], 1, 2).unwrap(), vec![2, 3]);
        assert_eq!(byte_range(&[1, 2, 3], 3, 0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn should_reject_range_past_end() {
        assert_eq!(byte_range(&[1, 2, 3], 1, 5), Err(Error::range(1, 5, 3)));
    }

    #[test]
    fn should_reject_overflowing_range() {
        assert!(matches!(
            byte_range(&[1], usize::MAX, 2),
            Err(Error::Range { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_range_accepts_exactly_windows_inside_buffer(
            bytes in proptest::collection::vec(any::<u8>(), 0..64),
            offset in 0_usize..80,
            length in 0_usize..80,
        ) {
            let result = byte_range(&bytes, offset, length);
            if offset + length <= bytes.len() {
                prop_assert_eq!(result, Ok(bytes[offset..offset + length].to_vec()));
            } else {
                prop_assert_eq!(result, Err(Error::range(offset, length, bytes.len())));
            }
        }

        #[test]
        fn prop_flow_cost_covers_payload_and_overhead(body in proptest::collection::vec(any::<u8>(), 0..256)) {
            let size = body.len() as u64;
            let record = DeliveryRecord::binary(body).build();
            prop_assert!(record.flow_token().cost() >= RECORD_OVERHEAD + size);
        }
    }
}
