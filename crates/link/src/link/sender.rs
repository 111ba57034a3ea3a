//! Sending side of a link.
//!
//! Sends leave in submission order. A durable send under an unsettled mode
//! waits at its queue position until the store confirms persistence; later
//! sends queue behind it even if their own persistence finished first.
//!
//! Credit follows the peer's delivery count: a grant covers the transfers the
//! receiver had seen, so transfers still on the wire are charged against it.
//! With a flow window set, framing stops while the cost of unsettled
//! transfers fills the window.

use std::collections::{BTreeMap, VecDeque};

use courier_core::{Error, QosLevel, Result, ResultExt};
use serde::{Deserialize, Serialize};

use super::{LinkCore, LinkEnv, LinkEvent, LinkState};
use crate::callback::{AsyncResult, Outcome};
use crate::flow::FlowController;
use crate::frame::{DeliveryState, Frame, Role};
use crate::record::{DeliveryRecord, Destination, FlowToken};
use crate::types::{DeliveryTag, LinkHandle};

/// How a send was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementOutcome {
    /// Pre-settled on send (at-most-once); no peer confirmation.
    Settled,
    /// The peer accepted the delivery.
    Accepted,
}

/// Caller-side handle to a sender link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    handle: LinkHandle,
    name: String,
    target: Destination,
    qos: QosLevel,
}

impl Sender {
    pub const fn handle(&self) -> LinkHandle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn target(&self) -> &Destination {
        &self.target
    }

    pub const fn qos(&self) -> QosLevel {
        self.qos
    }
}

struct Outgoing {
    tag: DeliveryTag,
    record: DeliveryRecord,
    /// False while persistence is outstanding.
    ready: bool,
    /// `None` for pre-settled sends, whose caller result is already resolved.
    peer: Option<AsyncResult<DeliveryState>>,
}

struct InFlight {
    cost: FlowToken,
    peer: AsyncResult<DeliveryState>,
}

pub(crate) struct SenderLink {
    pub(crate) core: LinkCore,
    credit: u32,
    /// Transfers framed so far, wrapping.
    delivery_count: u32,
    next_tag: DeliveryTag,
    queue: VecDeque<Outgoing>,
    unsettled: BTreeMap<DeliveryTag, InFlight>,
    flow: FlowController,
}

impl std::fmt::Debug for SenderLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SenderLink")
            .field("core", &self.core)
            .field("credit", &self.credit)
            .field("delivery_count", &self.delivery_count)
            .field("queued", &self.queue.len())
            .field("unsettled", &self.unsettled.len())
            .finish_non_exhaustive()
    }
}

impl SenderLink {
    pub fn new(core: LinkCore, flow_window: Option<u64>) -> Self {
        Self {
            core,
            credit: 0,
            delivery_count: 0,
            next_tag: DeliveryTag::new(0),
            queue: VecDeque::new(),
            unsettled: BTreeMap::new(),
            flow: FlowController::new(flow_window),
        }
    }

    pub fn handle(&self) -> Sender {
        Sender {
            handle: self.core.handle,
            name: self.core.name.clone(),
            target: self.core.address.clone(),
            qos: self.core.qos,
        }
    }

    pub const fn credit(&self) -> u32 {
        self.credit
    }

    pub fn in_flight(&self) -> usize {
        self.queue.len().saturating_add(self.unsettled.len())
    }

    /// Flow cost of transfers awaiting settlement.
    pub const fn flow_in_use(&self) -> u64 {
        self.flow.in_use()
    }

    pub fn send(
        &mut self,
        record: DeliveryRecord,
        env: &mut LinkEnv<'_>,
    ) -> Result<AsyncResult<SettlementOutcome>> {
        self.core.ensure_open()?;
        let tag = self.next_tag;
        self.next_tag = tag.next();
        let result = AsyncResult::labeled(format!("send {}#{tag}", self.core.name));

        if self.core.policy.presettles() {
            result.on_success(SettlementOutcome::Settled)?;
            if record.is_persistent() {
                self.persist_best_effort(&record, tag, env);
            }
            self.queue.push_back(Outgoing {
                tag,
                record,
                ready: true,
                peer: None,
            });
        } else {
            let ready = !record.is_persistent() || record.is_persisted();
            if !ready {
                let link = self.core.handle;
                let persisted = env
                    .mailbox
                    .marshal(move |outcome| LinkEvent::SendPersisted { link, tag, outcome });
                record.attach_persist_completion(env.store, persisted)?;
            }
            self.queue.push_back(Outgoing {
                tag,
                record,
                ready,
                peer: Some(settlement_stage(result.clone(), tag)),
            });
        }

        tracing::debug!(
            link = %self.core.name,
            tag = %tag,
            queued = self.queue.len(),
            credit = self.credit,
            "send queued"
        );
        self.flush(env);
        Ok(result)
    }

    /// Apply credit granted by the peer after it had seen `delivery_count`
    /// transfers.
    pub fn on_flow(&mut self, delivery_count: u32, link_credit: u32, env: &mut LinkEnv<'_>) {
        let in_transit = self.delivery_count.wrapping_sub(delivery_count);
        self.credit = link_credit.saturating_sub(in_transit);
        tracing::trace!(
            link = %self.core.name,
            link_credit,
            in_transit,
            credit = self.credit,
            "credit granted"
        );
        self.flush(env);
    }

    /// Persistence of a queued send finished.
    pub fn on_persisted(&mut self, tag: DeliveryTag, outcome: Outcome<()>, env: &mut LinkEnv<'_>) {
        let Some(index) = self.queue.iter().position(|entry| entry.tag == tag) else {
            tracing::debug!(link = %self.core.name, tag = %tag, "persistence completed for a send no longer queued");
            return;
        };

        match outcome {
            Ok(()) => {
                if let Some(entry) = self.queue.get_mut(index) {
                    entry.record.mark_persisted();
                    entry.ready = true;
                }
            }
            Err(e) => {
                if let Some(entry) = self.queue.remove(index) {
                    tracing::warn!(
                        link = %self.core.name,
                        tag = %tag,
                        error = %e,
                        "send failed: record was not persisted"
                    );
                    if let Some(peer) = entry.peer {
                        let _already_logged = peer.on_failure(e);
                    }
                }
            }
        }
        self.flush(env);
    }

    /// The peer reported the outcome of a transfer.
    pub fn on_disposition(
        &mut self,
        tag: DeliveryTag,
        state: DeliveryState,
        settled: bool,
        env: &mut LinkEnv<'_>,
    ) -> Result<()> {
        let in_flight = self
            .unsettled
            .remove(&tag)
            .ok_or_else(|| self.core.unknown_delivery(tag))?;
        self.flow.release(in_flight.cost);

        if !settled {
            env.outbox.push_back(Frame::Disposition {
                handle: self.core.handle,
                role: Role::Sender,
                tag,
                state: state.clone(),
                settled: true,
            });
        }
        tracing::debug!(link = %self.core.name, tag = %tag, state = %state, "send settled");
        let _already_logged = in_flight.peer.on_success(state);
        self.flush(env);
        Ok(())
    }

    /// Emit detach. Sends never transferred fail now; transferred ones keep
    /// waiting for the peer's disposition.
    pub fn begin_close(&mut self, outbox: &mut VecDeque<Frame>) {
        self.core.begin_close(outbox);
        if self.queue.is_empty() {
            return;
        }
        tracing::debug!(
            link = %self.core.name,
            dropped = self.queue.len(),
            "failing sends queued at close"
        );
        for entry in self.queue.drain(..) {
            if let Some(peer) = entry.peer {
                let _already_logged =
                    peer.on_failure(Error::link_not_open(self.core.name.clone(), self.core.state));
            }
        }
    }

    /// The peer detached. Every unresolved send fails.
    pub fn on_peer_detach(&mut self, env: &mut LinkEnv<'_>) {
        self.core.peer_detached(env.outbox);
        let name = self.core.name.clone();
        let detached = |tag: DeliveryTag| {
            Error::settlement_failure(tag.to_string(), format!("link '{name}' detached"))
        };

        for entry in self.queue.drain(..) {
            if let Some(peer) = entry.peer {
                let _already_logged = peer.on_failure(detached(entry.tag));
            }
        }
        for (tag, in_flight) in std::mem::take(&mut self.unsettled) {
            self.flow.release(in_flight.cost);
            let _already_logged = in_flight.peer.on_failure(detached(tag));
        }
    }

    /// Frame ready sends from the head of the queue while credit and flow
    /// window last. Nothing is framed once the link leaves `Open`.
    fn flush(&mut self, env: &mut LinkEnv<'_>) {
        if self.core.state != LinkState::Open {
            return;
        }
        while self.credit > 0
            && !self.flow.is_saturated()
            && self.queue.front().is_some_and(|entry| entry.ready)
        {
            let Some(entry) = self.queue.pop_front() else {
                break;
            };
            self.credit = self.credit.saturating_sub(1);
            self.delivery_count = self.delivery_count.wrapping_add(1);
            let cost = entry.record.flow_token();
            env.outbox.push_back(Frame::Transfer {
                handle: self.core.handle,
                tag: entry.tag,
                settled: entry.peer.is_none(),
                record: entry.record,
            });
            if let Some(peer) = entry.peer {
                self.flow.reserve(cost);
                self.unsettled.insert(entry.tag, InFlight { cost, peer });
            }
        }
    }

    fn persist_best_effort(&self, record: &DeliveryRecord, tag: DeliveryTag, env: &LinkEnv<'_>) {
        let name = self.core.name.clone();
        let logged = AsyncResult::with_listener(move |outcome: Outcome<()>| {
            if let Err(e) = outcome {
                tracing::warn!(link = %name, tag = %tag, error = %e, "best-effort persistence failed");
            }
        });
        record
            .attach_persist_completion(env.store, logged)
            .map(|_| ())
            .warn_on_error("best-effort persistence");
    }
}

/// Peer disposition stage feeding the caller's send result.
fn settlement_stage(
    result: AsyncResult<SettlementOutcome>,
    tag: DeliveryTag,
) -> AsyncResult<DeliveryState> {
    AsyncResult::chained(result, move |state: DeliveryState, next| {
        let outcome = match state {
            DeliveryState::Accepted => Ok(SettlementOutcome::Accepted),
            other => Err(Error::settlement_failure(tag.to_string(), other.to_string())),
        };
        let _already_logged = next.complete(outcome);
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::context::Mailbox;
    use crate::store::InMemoryStoreGateway;
    use crate::types::ContextId;

    struct Fixture {
        outbox: VecDeque<Frame>,
        store: InMemoryStoreGateway,
        mailbox: Mailbox<LinkEvent>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                outbox: VecDeque::new(),
                store: InMemoryStoreGateway::new(),
                mailbox: Mailbox::new(ContextId::new()),
            }
        }

        fn sender(&mut self, qos: QosLevel) -> SenderLink {
            self.sender_with_window(qos, None)
        }

        fn sender_with_window(&mut self, qos: QosLevel, flow_window: Option<u64>) -> SenderLink {
            let mut core = LinkCore::new(
                LinkHandle::new(0),
                String::from("out"),
                Destination::new("q"),
                Role::Sender,
                qos,
            );
            core.open(&mut self.outbox);
            self.outbox.clear();
            SenderLink::new(core, flow_window)
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

    fn transient() -> DeliveryRecord {
        DeliveryRecord::text("t").build()
    }

    #[test]
    fn should_hold_transfers_until_credit_arrives() {
        let mut fx = Fixture::new();
        let mut link = fx.sender(QosLevel::AtLeastOnce);

        let result = link.send(transient(), &mut link_env!(fx)).unwrap();
        assert!(fx.outbox.is_empty());

        link.on_flow(0, 1, &mut link_env!(fx));

        assert!(matches!(
            fx.outbox.pop_front(),
            Some(Frame::Transfer { settled: false, .. })
        ));
        assert!(!result.is_resolved());
        assert_eq!(link.credit(), 0);
        assert_eq!(link.in_flight(), 1);
    }

    #[test]
    fn should_presettle_at_most_once_without_store() {
        let mut fx = Fixture::new();
        let mut link = fx.sender(QosLevel::AtMostOnce);
        link.on_flow(0, 5, &mut link_env!(fx));

        let result = link.send(transient(), &mut link_env!(fx)).unwrap();

        assert_eq!(result.peek(), Some(Ok(SettlementOutcome::Settled)));
        assert!(matches!(
            fx.outbox.pop_front(),
            Some(Frame::Transfer { settled: true, .. })
        ));
        assert_eq!(link.in_flight(), 0);
        assert_eq!(fx.store.persist_calls(), 0);
    }

    #[test]
    fn should_map_rejection_to_settlement_failure() {
        let mut fx = Fixture::new();
        let mut link = fx.sender(QosLevel::AtLeastOnce);
        link.on_flow(0, 1, &mut link_env!(fx));
        let result = link.send(transient(), &mut link_env!(fx)).unwrap();

        let rejected = DeliveryState::Rejected {
            reason: String::from("no route"),
        };
        link.on_disposition(DeliveryTag::new(0), rejected, true, &mut link_env!(fx))
            .unwrap();

        assert!(matches!(
            result.peek(),
            Some(Err(Error::SettlementFailure { .. }))
        ));
    }

    #[test]
    fn should_confirm_unsettled_disposition_exactly_once() {
        let mut fx = Fixture::new();
        let mut link = fx.sender(QosLevel::ExactlyOnce);
        link.on_flow(0, 1, &mut link_env!(fx));
        let result = link.send(transient(), &mut link_env!(fx)).unwrap();
        fx.outbox.clear();

        link.on_disposition(
            DeliveryTag::new(0),
            DeliveryState::Accepted,
            false,
            &mut link_env!(fx),
        )
        .unwrap();

        assert!(matches!(
            fx.outbox.pop_front(),
            Some(Frame::Disposition {
                role: Role::Sender,
                settled: true,
                ..
            })
        ));
        assert_eq!(result.peek(), Some(Ok(SettlementOutcome::Accepted)));
    }

    #[test]
    fn should_reject_disposition_for_unknown_tag() {
        let mut fx = Fixture::new();
        let mut link = fx.sender(QosLevel::AtLeastOnce);
        let outcome = link.on_disposition(
            DeliveryTag::new(9),
            DeliveryState::Accepted,
            true,
            &mut link_env!(fx),
        );
        assert!(matches!(outcome, Err(Error::UnknownDelivery { .. })));
    }

    #[test]
    fn should_fail_everything_on_peer_detach() {
        let mut fx = Fixture::new();
        let mut link = fx.sender(QosLevel::AtLeastOnce);
        link.on_flow(0, 1, &mut link_env!(fx));
        let framed = link.send(transient(), &mut link_env!(fx)).unwrap();
        let queued = link.send(transient(), &mut link_env!(fx)).unwrap();

        link.on_peer_detach(&mut link_env!(fx));

        assert!(matches!(framed.peek(), Some(Err(Error::SettlementFailure { .. }))));
        assert!(matches!(queued.peek(), Some(Err(Error::SettlementFailure { .. }))));
        assert_eq!(link.in_flight(), 0);
        assert!(link.send(transient(), &mut link_env!(fx)).is_err());
    }

    #[test]
    fn should_charge_in_transit_transfers_against_new_credit() {
        let mut fx = Fixture::new();
        let mut link = fx.sender(QosLevel::AtLeastOnce);
        link.on_flow(0, 2, &mut link_env!(fx));
        link.send(transient(), &mut link_env!(fx)).unwrap();
        link.send(transient(), &mut link_env!(fx)).unwrap();

        // The peer had seen only the first transfer when it granted 2.
        link.on_flow(1, 2, &mut link_env!(fx));

        assert_eq!(link.credit(), 1);
    }

    #[test]
    fn should_grant_nothing_for_a_stale_delivery_count() {
        let mut fx = Fixture::new();
        let mut link = fx.sender(QosLevel::AtLeastOnce);
        link.on_flow(0, 3, &mut link_env!(fx));
        for _ in 0..3 {
            link.send(transient(), &mut link_env!(fx)).unwrap();
        }

        link.on_flow(0, 2, &mut link_env!(fx));

        assert_eq!(link.credit(), 0);
    }

    #[test]
    fn should_hold_transfers_while_flow_window_is_full() {
        let mut fx = Fixture::new();
        let mut link = fx.sender_with_window(QosLevel::AtLeastOnce, Some(1));
        link.on_flow(0, 5, &mut link_env!(fx));

        let first = link.send(transient(), &mut link_env!(fx)).unwrap();
        link.send(transient(), &mut link_env!(fx)).unwrap();

        assert_eq!(fx.outbox.len(), 1);
        assert_eq!(link.flow_in_use(), transient().flow_token().cost());
        fx.outbox.clear();

        link.on_disposition(
            DeliveryTag::new(0),
            DeliveryState::Accepted,
            true,
            &mut link_env!(fx),
        )
        .unwrap();

        assert_eq!(first.peek(), Some(Ok(SettlementOutcome::Accepted)));
        assert!(matches!(
            fx.outbox.pop_front(),
            Some(Frame::Transfer { tag, .. }) if tag == DeliveryTag::new(1)
        ));
        assert_eq!(link.credit(), 3);
    }

    #[test]
    fn should_not_charge_presettled_transfers_to_flow_window() {
        let mut fx = Fixture::new();
        let mut link = fx.sender_with_window(QosLevel::AtMostOnce, Some(1));
        link.on_flow(0, 5, &mut link_env!(fx));

        link.send(transient(), &mut link_env!(fx)).unwrap();
        link.send(transient(), &mut link_env!(fx)).unwrap();

        assert_eq!(fx.outbox.len(), 2);
        assert_eq!(link.flow_in_use(), 0);
    }

    #[test]
    fn should_fail_untransferred_sends_when_close_begins() {
        let mut fx = Fixture::new();
        let mut link = fx.sender(QosLevel::AtLeastOnce);
        link.on_flow(0, 1, &mut link_env!(fx));
        let framed = link.send(transient(), &mut link_env!(fx)).unwrap();
        let queued = link.send(transient(), &mut link_env!(fx)).unwrap();
        fx.outbox.clear();

        link.begin_close(&mut fx.outbox);
        link.on_flow(1, 5, &mut link_env!(fx));

        assert!(matches!(fx.outbox.pop_front(), Some(Frame::Detach { .. })));
        assert!(fx.outbox.is_empty());
        assert!(matches!(queued.peek(), Some(Err(Error::LinkNotOpen { .. }))));
        assert!(!framed.is_resolved());
        assert_eq!(link.in_flight(), 1);

        link.on_disposition(
            DeliveryTag::new(0),
            DeliveryState::Accepted,
            true,
            &mut link_env!(fx),
        )
        .unwrap();
        assert_eq!(framed.peek(), Some(Ok(SettlementOutcome::Accepted)));
        assert_eq!(link.in_flight(), 0);
    }
}
