//! Receiving side of a link.
//!
//! Incoming transfers are buffered and handed to the consumer while the
//! number of delivered-but-unacknowledged records stays below the prefetch.
//! Acknowledging a durable record persists it first and only then settles,
//! returns its flow cost and refills credit.

use std::collections::{BTreeMap, VecDeque};

use courier_core::{CreditMode, Error, QosLevel, Result};
use tokio::sync::mpsc;

use super::{LinkCore, LinkEnv, LinkEvent, LinkState};
use crate::callback::{AsyncResult, Outcome};
use crate::flow::{CreditWindow, FlowController};
use crate::frame::{DeliveryState, Frame, Role};
use crate::record::{DeliveryRecord, Destination, FlowToken};
use crate::types::{DeliveryTag, LinkHandle};

/// Caller-side handle to a receiver link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receiver {
    handle: LinkHandle,
    name: String,
    source: Destination,
    qos: QosLevel,
    prefetch: u32,
}

impl Receiver {
    pub const fn handle(&self) -> LinkHandle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn source(&self) -> &Destination {
        &self.source
    }

    pub const fn qos(&self) -> QosLevel {
        self.qos
    }

    pub const fn prefetch(&self) -> u32 {
        self.prefetch
    }
}

/// A record handed to a consumer. Hand it back to
/// [`Session::acknowledge`](crate::session::Session::acknowledge) exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct Delivery {
    link: LinkHandle,
    tag: DeliveryTag,
    settled: bool,
    record: DeliveryRecord,
}

impl Delivery {
    pub const fn link(&self) -> LinkHandle {
        self.link
    }

    pub const fn tag(&self) -> DeliveryTag {
        self.tag
    }

    /// True when the delivery was already settled on receipt.
    pub const fn is_settled(&self) -> bool {
        self.settled
    }

    pub const fn record(&self) -> &DeliveryRecord {
        &self.record
    }
}

/// Receives deliveries dispatched by a receiver link.
pub trait DeliveryConsumer: Send {
    fn on_delivery(&mut self, delivery: Delivery);
}

impl<F> DeliveryConsumer for F
where
    F: FnMut(Delivery) + Send,
{
    fn on_delivery(&mut self, delivery: Delivery) {
        self(delivery);
    }
}

impl DeliveryConsumer for mpsc::UnboundedSender<Delivery> {
    fn on_delivery(&mut self, delivery: Delivery) {
        if let Err(mpsc::error::SendError(lost)) = self.send(delivery) {
            tracing::warn!(
                link = %lost.link,
                tag = %lost.tag,
                "delivery consumer channel closed; delivery stays unacknowledged"
            );
        }
    }
}

struct Incoming {
    tag: DeliveryTag,
    settled: bool,
    record: DeliveryRecord,
}

struct Unacked {
    cost: FlowToken,
    settled: bool,
    /// Set while acknowledgement waits on the store.
    awaiting: Option<(DeliveryRecord, AsyncResult<()>)>,
}

pub(crate) struct ReceiverLink {
    pub(crate) core: LinkCore,
    credit: CreditWindow,
    /// Transfers received so far, wrapping. Sent with every credit grant.
    delivery_count: u32,
    flow: FlowController,
    buffered: VecDeque<Incoming>,
    unacked: BTreeMap<DeliveryTag, Unacked>,
    consumer: Option<Box<dyn DeliveryConsumer>>,
}

impl std::fmt::Debug for ReceiverLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiverLink")
            .field("core", &self.core)
            .field("credit", &self.credit)
            .field("buffered", &self.buffered.len())
            .field("unacked", &self.unacked.len())
            .field("has_consumer", &self.consumer.is_some())
            .finish_non_exhaustive()
    }
}

impl ReceiverLink {
    pub fn new(core: LinkCore, prefetch: u32, mode: CreditMode, flow_window: Option<u64>) -> Self {
        Self {
            core,
            credit: CreditWindow::new(prefetch, mode),
            delivery_count: 0,
            flow: FlowController::new(flow_window),
            buffered: VecDeque::new(),
            unacked: BTreeMap::new(),
            consumer: None,
        }
    }

    pub fn handle(&self) -> Receiver {
        Receiver {
            handle: self.core.handle,
            name: self.core.name.clone(),
            source: self.core.address.clone(),
            qos: self.core.qos,
            prefetch: self.credit.prefetch(),
        }
    }

    /// Attach and advertise the initial credit.
    pub fn open(&mut self, outbox: &mut VecDeque<Frame>) {
        self.core.open(outbox);
        if self.credit.credit() > 0 {
            outbox.push_back(Frame::Flow {
                handle: self.core.handle,
                delivery_count: self.delivery_count,
                link_credit: self.credit.credit(),
            });
        }
    }

    /// Emit detach and drop transfers no consumer has taken yet; the peer
    /// still owns them. Delivered ones may still be acknowledged.
    pub fn begin_close(&mut self, outbox: &mut VecDeque<Frame>) {
        self.core.begin_close(outbox);
        if self.buffered.is_empty() {
            return;
        }
        tracing::debug!(
            link = %self.core.name,
            dropped = self.buffered.len(),
            "releasing undelivered transfers at close"
        );
        for held in self.buffered.drain(..) {
            self.flow.release(held.record.flow_token());
        }
    }

    pub const fn credit(&self) -> u32 {
        self.credit.credit()
    }

    /// Delivered to the consumer and not yet acknowledged.
    pub fn unacked(&self) -> usize {
        self.unacked.len()
    }

    pub fn buffered(&self) -> usize {
        self.buffered.len()
    }

    pub fn in_flight(&self) -> usize {
        self.buffered.len().saturating_add(self.unacked.len())
    }

    /// Flow cost of buffered and unacknowledged transfers.
    pub const fn flow_in_use(&self) -> u64 {
        self.flow.in_use()
    }

    pub fn set_consumer(&mut self, consumer: Box<dyn DeliveryConsumer>) {
        self.consumer = Some(consumer);
        self.dispatch();
    }

    pub fn on_transfer(
        &mut self,
        tag: DeliveryTag,
        settled: bool,
        record: DeliveryRecord,
        env: &mut LinkEnv<'_>,
    ) -> Result<()> {
        self.core.ensure_open()?;
        if self.unacked.contains_key(&tag) || self.buffered.iter().any(|held| held.tag == tag) {
            return Err(Error::internal(format!(
                "duplicate delivery tag {tag} on link '{}'",
                self.core.name
            )));
        }
        self.delivery_count = self.delivery_count.wrapping_add(1);
        if !self.credit.consume() {
            tracing::warn!(link = %self.core.name, tag = %tag, "peer sent a transfer without credit");
        }
        self.flow.reserve(record.flow_token());

        let settled = if !settled && self.core.policy.presettles() {
            env.outbox.push_back(Frame::Disposition {
                handle: self.core.handle,
                role: Role::Receiver,
                tag,
                state: DeliveryState::Accepted,
                settled: true,
            });
            true
        } else {
            settled
        };

        tracing::trace!(link = %self.core.name, tag = %tag, settled, "transfer received");
        self.buffered.push_back(Incoming {
            tag,
            settled,
            record,
        });
        self.dispatch();
        Ok(())
    }

    pub fn acknowledge(
        &mut self,
        delivery: Delivery,
        env: &mut LinkEnv<'_>,
    ) -> Result<AsyncResult<()>> {
        if self.core.state == LinkState::Closed {
            return Err(Error::link_not_open(self.core.name.clone(), self.core.state));
        }
        let Delivery { tag, record, .. } = delivery;
        let entry = self
            .unacked
            .get_mut(&tag)
            .ok_or_else(|| self.core.unknown_delivery(tag))?;
        if entry.awaiting.is_some() {
            return Err(Error::already_resolved(format!("ack {}#{tag}", self.core.name)));
        }

        let done = AsyncResult::labeled(format!("ack {}#{tag}", self.core.name));
        if record.is_persistent() && !record.is_persisted() {
            let link = self.core.handle;
            let persisted = env
                .mailbox
                .marshal(move |outcome| LinkEvent::AckPersisted { link, tag, outcome });
            record.attach_persist_completion(env.store, persisted)?;
            entry.awaiting = Some((record, done.clone()));
            tracing::debug!(link = %self.core.name, tag = %tag, "acknowledgement waiting on persistence");
        } else {
            self.settle(tag, env);
            done.on_success(())?;
        }
        Ok(done)
    }

    /// Persistence for an acknowledged delivery finished.
    pub fn on_ack_persisted(&mut self, tag: DeliveryTag, outcome: Outcome<()>, env: &mut LinkEnv<'_>) {
        let Some((mut record, done)) = self
            .unacked
            .get_mut(&tag)
            .and_then(|entry| entry.awaiting.take())
        else {
            tracing::warn!(link = %self.core.name, tag = %tag, "persistence completed for an unknown acknowledgement");
            return;
        };

        match outcome {
            Ok(()) if self.core.state == LinkState::Closed => {
                record.mark_persisted();
                if let Some(entry) = self.unacked.remove(&tag) {
                    self.flow.release(entry.cost);
                }
                let _already_logged =
                    done.on_failure(Error::link_not_open(self.core.name.clone(), self.core.state));
            }
            Ok(()) => {
                record.mark_persisted();
                self.settle(tag, env);
                let _already_logged = done.on_success(());
            }
            Err(e) => {
                tracing::warn!(
                    link = %self.core.name,
                    tag = %tag,
                    error = %e,
                    "acknowledgement failed: record was not persisted"
                );
                if let Some(entry) = self.unacked.remove(&tag) {
                    self.flow.release(entry.cost);
                }
                self.refill(env);
                let _already_logged = done.on_failure(e);
            }
        }
    }

    /// The peer detached. Undelivered transfers are dropped; the peer still
    /// owns them.
    pub fn on_peer_detach(&mut self, env: &mut LinkEnv<'_>) {
        self.core.peer_detached(env.outbox);
        for held in self.buffered.drain(..) {
            self.flow.release(held.record.flow_token());
        }
    }

    /// Emit settlement (unless settled on receipt), return the cost and
    /// refill credit.
    fn settle(&mut self, tag: DeliveryTag, env: &mut LinkEnv<'_>) {
        let Some(entry) = self.unacked.remove(&tag) else {
            return;
        };
        if !entry.settled {
            env.outbox.push_back(Frame::Disposition {
                handle: self.core.handle,
                role: Role::Receiver,
                tag,
                state: DeliveryState::Accepted,
                settled: !self.core.policy.two_phase(),
            });
        }
        self.flow.release(entry.cost);
        tracing::debug!(link = %self.core.name, tag = %tag, "delivery acknowledged");
        self.refill(env);
    }

    fn refill(&mut self, env: &mut LinkEnv<'_>) {
        if self.core.state == LinkState::Open {
            let outstanding = self.in_flight();
            if let Some(link_credit) = self
                .credit
                .replenish(outstanding, self.flow.is_saturated())
            {
                env.outbox.push_back(Frame::Flow {
                    handle: self.core.handle,
                    delivery_count: self.delivery_count,
                    link_credit,
                });
            }
        }
        self.dispatch();
    }

    fn dispatch(&mut self) {
        let Some(consumer) = self.consumer.as_mut() else {
            return;
        };
        let prefetch = usize::try_from(self.credit.prefetch()).unwrap_or(usize::MAX);
        while self.unacked.len() < prefetch {
            let Some(held) = self.buffered.pop_front() else {
                break;
            };
            self.unacked.insert(
                held.tag,
                Unacked {
                    cost: held.record.flow_token(),
                    settled: held.settled,
                    awaiting: None,
                },
            );
            consumer.on_delivery(Delivery {
                link: self.core.handle,
                tag: held.tag,
                settled: held.settled,
                record: held.record,
            });
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::context::Mailbox;
    use crate::store::InMemoryStoreGateway;
    use crate::types::ContextId;

    struct Fixture {
        outbox: VecDeque<Frame>,
        store: InMemoryStoreGateway,
        mailbox: Mailbox<LinkEvent>,
        delivered: Arc<Mutex<Vec<Delivery>>>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                outbox: VecDeque::new(),
                store: InMemoryStoreGateway::new(),
                mailbox: Mailbox::new(ContextId::new()),
                delivered: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn receiver(&mut self, qos: QosLevel, prefetch: u32) -> ReceiverLink {
            self.receiver_with_window(qos, prefetch, None)
        }

        fn receiver_with_window(
            &mut self,
            qos: QosLevel,
            prefetch: u32,
            flow_window: Option<u64>,
        ) -> ReceiverLink {
            let mut link = self.unconsumed_receiver(qos, prefetch, flow_window);
            let sink = Arc::clone(&self.delivered);
            link.set_consumer(Box::new(move |delivery: Delivery| {
                sink.lock().unwrap().push(delivery);
            }));
            link
        }

        fn unconsumed_receiver(
            &mut self,
            qos: QosLevel,
            prefetch: u32,
            flow_window: Option<u64>,
        ) -> ReceiverLink {
            let core = LinkCore::new(
                LinkHandle::new(0),
                String::from("in"),
                Destination::new("q"),
                Role::Receiver,
                qos,
            );
            let mut link = ReceiverLink::new(core, prefetch, CreditMode::Incremental, flow_window);
            link.open(&mut self.outbox);
            self.outbox.clear();
            link
        }

        fn next_delivery(&self) -> Delivery {
            self.delivered.lock().unwrap().remove(0)
        }
    }

    macro_rules! link_env {
        ($fixture:expr) => {
            LinkEnv {
                outbox: &mut $fixture.outbox,
                store: &$fixture.store,
                mailbox: &$fixture.mailbox.sender(),
            }
        };
    }

    fn transfer(link: &mut ReceiverLink, fx: &mut Fixture, tag: u64, record: DeliveryRecord) {
        link.on_transfer(DeliveryTag::new(tag), false, record, &mut link_env!(fx))
            .unwrap();
    }

    #[test]
    fn should_advertise_prefetch_on_open() {
        let core = LinkCore::new(
            LinkHandle::new(3),
            String::from("in"),
            Destination::new("q"),
            Role::Receiver,
            QosLevel::AtLeastOnce,
        );
        let mut link = ReceiverLink::new(core, 7, CreditMode::Incremental, None);
        let mut outbox = VecDeque::new();

        link.open(&mut outbox);

        assert_eq!(
            outbox.back(),
            Some(&Frame::Flow {
                handle: LinkHandle::new(3),
                delivery_count: 0,
                link_credit: 7
            })
        );
    }

    #[test]
    fn should_settle_transient_ack_immediately() {
        let mut fx = Fixture::new();
        let mut link = fx.receiver(QosLevel::AtLeastOnce, 10);
        transfer(&mut link, &mut fx, 0, DeliveryRecord::text("a").build());

        let done = link
            .acknowledge(fx.next_delivery(), &mut link_env!(fx))
            .unwrap();

        assert_eq!(done.peek(), Some(Ok(())));
        assert!(matches!(
            fx.outbox.pop_front(),
            Some(Frame::Disposition {
                state: DeliveryState::Accepted,
                settled: true,
                ..
            })
        ));
        assert_eq!(link.unacked(), 0);
    }

    #[test]
    fn should_settle_durable_ack_only_after_persistence() {
        let mut fx = Fixture::new();
        let mut link = fx.receiver(QosLevel::AtLeastOnce, 10);
        let record = DeliveryRecord::text("d").durable().build();
        transfer(&mut link, &mut fx, 0, record);

        let done = link
            .acknowledge(fx.next_delivery(), &mut link_env!(fx))
            .unwrap();

        assert!(fx.outbox.is_empty());
        assert!(!done.is_resolved());
        assert_eq!(link.unacked(), 1);

        fx.store.complete_all().unwrap();
        link.on_ack_persisted(DeliveryTag::new(0), Ok(()), &mut link_env!(fx));

        assert!(matches!(
            fx.outbox.pop_front(),
            Some(Frame::Disposition { settled: true, .. })
        ));
        assert_eq!(done.peek(), Some(Ok(())));
        assert_eq!(link.unacked(), 0);
    }

    #[test]
    fn should_release_slot_without_settling_on_store_failure() {
        let mut fx = Fixture::new();
        let mut link = fx.receiver(QosLevel::AtLeastOnce, 1);
        transfer(&mut link, &mut fx, 0, DeliveryRecord::text("d").durable().build());
        let done = link
            .acknowledge(fx.next_delivery(), &mut link_env!(fx))
            .unwrap();

        let failure = Error::store_failure("fsync");
        link.on_ack_persisted(DeliveryTag::new(0), Err(failure.clone()), &mut link_env!(fx));

        assert_eq!(done.peek(), Some(Err(failure)));
        assert!(
            !fx.outbox
                .iter()
                .any(|frame| matches!(frame, Frame::Disposition { .. }))
        );
        assert_eq!(link.unacked(), 0);
    }

    #[test]
    fn should_leave_exactly_once_disposition_unsettled() {
        let mut fx = Fixture::new();
        let mut link = fx.receiver(QosLevel::ExactlyOnce, 10);
        transfer(&mut link, &mut fx, 0, DeliveryRecord::text("x").build());

        link.acknowledge(fx.next_delivery(), &mut link_env!(fx))
            .unwrap();

        assert!(matches!(
            fx.outbox.pop_front(),
            Some(Frame::Disposition { settled: false, .. })
        ));
    }

    #[test]
    fn should_settle_at_most_once_on_receipt() {
        let mut fx = Fixture::new();
        let mut link = fx.receiver(QosLevel::AtMostOnce, 10);
        transfer(&mut link, &mut fx, 0, DeliveryRecord::text("x").durable().build());

        assert!(matches!(
            fx.outbox.pop_front(),
            Some(Frame::Disposition { settled: true, .. })
        ));
        assert_eq!(fx.store.persist_calls(), 0);

        link.acknowledge(fx.next_delivery(), &mut link_env!(fx))
            .unwrap();
        link.on_ack_persisted(DeliveryTag::new(0), Ok(()), &mut link_env!(fx));

        assert!(
            !fx.outbox
                .iter()
                .any(|frame| matches!(frame, Frame::Disposition { .. }))
        );
    }

    #[test]
    fn should_cap_dispatch_at_prefetch() {
        let mut fx = Fixture::new();
        let mut link = fx.receiver(QosLevel::AtLeastOnce, 2);
        for tag in 0..3 {
            transfer(&mut link, &mut fx, tag, DeliveryRecord::text("m").build());
        }

        assert_eq!(fx.delivered.lock().unwrap().len(), 2);
        assert_eq!(link.buffered(), 1);

        link.acknowledge(fx.next_delivery(), &mut link_env!(fx))
            .unwrap();

        assert_eq!(fx.delivered.lock().unwrap().len(), 2);
        assert_eq!(link.buffered(), 0);
    }

    #[test]
    fn should_reject_unknown_and_closed_acks() {
        let mut fx = Fixture::new();
        let mut link = fx.receiver(QosLevel::AtLeastOnce, 2);
        transfer(&mut link, &mut fx, 0, DeliveryRecord::text("m").build());
        let delivery = fx.next_delivery();

        link.on_peer_detach(&mut link_env!(fx));

        assert!(matches!(
            link.acknowledge(delivery, &mut link_env!(fx)),
            Err(Error::LinkNotOpen { .. })
        ));
        assert!(
            link.on_transfer(DeliveryTag::new(1), false, DeliveryRecord::text("late").build(), &mut link_env!(fx))
                .is_err()
        );
    }

    #[test]
    fn should_reject_duplicate_tag() {
        let mut fx = Fixture::new();
        let mut link = fx.receiver(QosLevel::AtLeastOnce, 2);
        transfer(&mut link, &mut fx, 0, DeliveryRecord::text("m").build());

        let duplicate = link.on_transfer(
            DeliveryTag::new(0),
            false,
            DeliveryRecord::text("m").build(),
            &mut link_env!(fx),
        );

        assert!(matches!(duplicate, Err(Error::Internal(_))));
    }

    #[test]
    fn should_grant_credit_against_received_count() {
        let mut fx = Fixture::new();
        let mut link = fx.receiver(QosLevel::AtLeastOnce, 2);
        transfer(&mut link, &mut fx, 0, DeliveryRecord::text("m").build());

        link.acknowledge(fx.next_delivery(), &mut link_env!(fx))
            .unwrap();

        assert_eq!(
            fx.outbox.back(),
            Some(&Frame::Flow {
                handle: LinkHandle::new(0),
                delivery_count: 1,
                link_credit: 2
            })
        );
    }

    #[test]
    fn should_withhold_credit_while_flow_window_is_full() {
        let mut fx = Fixture::new();
        let mut link = fx.receiver_with_window(QosLevel::AtLeastOnce, 10, Some(1));
        transfer(&mut link, &mut fx, 0, DeliveryRecord::text("a").build());
        transfer(&mut link, &mut fx, 1, DeliveryRecord::text("b").build());
        let first = fx.next_delivery();
        let second = fx.next_delivery();

        link.acknowledge(first, &mut link_env!(fx)).unwrap();

        assert!(!fx.outbox.iter().any(|frame| matches!(frame, Frame::Flow { .. })));
        assert!(link.flow_in_use() > 0);

        link.acknowledge(second, &mut link_env!(fx)).unwrap();

        assert!(matches!(
            fx.outbox.back(),
            Some(Frame::Flow {
                delivery_count: 2,
                link_credit: 10,
                ..
            })
        ));
        assert_eq!(link.flow_in_use(), 0);
    }

    #[test]
    fn should_drop_undelivered_transfers_when_close_begins() {
        let mut fx = Fixture::new();
        let mut link = fx.unconsumed_receiver(QosLevel::AtLeastOnce, 4, None);
        transfer(&mut link, &mut fx, 0, DeliveryRecord::text("m").build());
        assert_eq!(link.buffered(), 1);

        link.begin_close(&mut fx.outbox);
        let in_flight = link.in_flight();
        link.core.finish_close_if_idle(in_flight);

        assert_eq!(link.buffered(), 0);
        assert_eq!(link.flow_in_use(), 0);
        assert_eq!(link.core.state, LinkState::Closed);
    }
}
