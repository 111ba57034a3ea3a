//! Sessions: the owner of a set of links bound to one execution context.
//!
//! Every mutating operation takes the caller's [`Executing`] token and fails
//! with `NotExecuting` when it belongs to another context. Store completions
//! are marshaled into the session's mailbox and applied by [`Session::run_pending`].

use std::collections::VecDeque;
use std::sync::Arc;

use courier_core::{CreditMode, Error, QosLevel, Result, ResultExt, SessionConfig};
use ulid::Ulid;

use crate::callback::AsyncResult;
use crate::context::{ContextSender, DispatchQueue, Executing, Mailbox, assert_executing};
use crate::frame::{Frame, FrameSink, PeerFrame, Role};
use crate::link::{
    Delivery, DeliveryConsumer, Link, LinkCore, LinkEnv, LinkEvent, LinkState, Receiver,
    ReceiverLink, Sender, SenderLink, SettlementOutcome,
};
use crate::names::{NameGenerator, UlidNameGenerator};
use crate::record::{DeliveryRecord, DeliveryRecordBuilder, Destination, byte_range};
use crate::store::StoreGateway;
use crate::types::{ContextId, LinkHandle};

/// Per-call overrides for [`Session::create_sender`].
#[derive(Debug, Clone, Default)]
pub struct SenderOptions {
    pub qos: Option<QosLevel>,
    pub name: Option<String>,
}

impl SenderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_qos(mut self, qos: QosLevel) -> Self {
        self.qos = Some(qos);
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Per-call overrides for [`Session::create_receiver`].
#[derive(Debug, Clone, Default)]
pub struct ReceiverOptions {
    pub qos: Option<QosLevel>,
    pub prefetch: Option<u32>,
    pub name: Option<String>,
    pub credit_mode: Option<CreditMode>,
}

impl ReceiverOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_qos(mut self, qos: QosLevel) -> Self {
        self.qos = Some(qos);
        self
    }

    #[must_use]
    pub const fn with_prefetch(mut self, prefetch: u32) -> Self {
        self.prefetch = Some(prefetch);
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub const fn with_credit_mode(mut self, mode: CreditMode) -> Self {
        self.credit_mode = Some(mode);
        self
    }
}

/// Snapshot of one link, in creation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub handle: LinkHandle,
    pub name: String,
    pub role: Role,
    pub qos: QosLevel,
    pub state: LinkState,
}

/// A set of links sharing one execution context and one frame channel.
pub struct Session {
    name: String,
    context: ContextId,
    config: SessionConfig,
    store: Arc<dyn StoreGateway>,
    sink: Box<dyn FrameSink>,
    names: Box<dyn NameGenerator>,
    producer_id: Vec<u8>,
    links: Vec<Link>,
    outbox: VecDeque<Frame>,
    mailbox: Mailbox<LinkEvent>,
    marshal: ContextSender<LinkEvent>,
    closed: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("context", &self.context)
            .field("links", &self.links)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session bound to `queue`.
    pub fn new(
        queue: &DispatchQueue,
        config: SessionConfig,
        store: Arc<dyn StoreGateway>,
        sink: impl FrameSink + 'static,
    ) -> Self {
        let mailbox = Mailbox::new(queue.id());
        let marshal = mailbox.sender();
        Self {
            name: queue.label().to_string(),
            context: queue.id(),
            config,
            store,
            sink: Box::new(sink),
            names: Box::new(UlidNameGenerator),
            producer_id: Ulid::new().to_bytes().to_vec(),
            links: Vec::new(),
            outbox: VecDeque::new(),
            mailbox,
            marshal,
            closed: false,
        }
    }

    /// Replace the generator used for unnamed links.
    #[must_use]
    pub fn with_name_generator(mut self, names: impl NameGenerator + 'static) -> Self {
        self.names = Box::new(names);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn context_id(&self) -> ContextId {
        self.context
    }

    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Producer identity stamped on records this session creates.
    pub fn producer_id(&self) -> &[u8] {
        &self.producer_id
    }

    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    // ==========================================================================
    // Link creation
    // ==========================================================================

    /// Create, attach and open a sender.
    ///
    /// # Errors
    ///
    /// `NotExecuting` outside the session's context, `SessionClosed` after
    /// [`Self::close`], `InvalidConfig` for an empty or duplicate name.
    pub fn create_sender(
        &mut self,
        cx: &Executing<'_>,
        target: impl Into<Destination>,
        options: SenderOptions,
    ) -> Result<Sender> {
        self.ensure_active(cx)?;
        let qos = options.qos.unwrap_or(self.config.link.qos);
        let name = self.link_name(options.name)?;
        let handle = self.next_handle()?;

        let mut link = SenderLink::new(
            LinkCore::new(handle, name, target.into(), Role::Sender, qos),
            self.config.flow_window,
        );
        link.core.open(&mut self.outbox);
        let sender = link.handle();
        self.links.push(Link::Sender(link));
        self.flush_outbox();
        Ok(sender)
    }

    /// Create, attach and open a receiver with initial credit = prefetch.
    ///
    /// # Errors
    ///
    /// Same as [`Self::create_sender`].
    pub fn create_receiver(
        &mut self,
        cx: &Executing<'_>,
        source: impl Into<Destination>,
        options: ReceiverOptions,
    ) -> Result<Receiver> {
        self.ensure_active(cx)?;
        let qos = options.qos.unwrap_or(self.config.link.qos);
        let prefetch = options.prefetch.unwrap_or(self.config.link.prefetch);
        let credit_mode = options.credit_mode.unwrap_or(self.config.link.credit_mode);
        let name = self.link_name(options.name)?;
        let handle = self.next_handle()?;

        let mut link = ReceiverLink::new(
            LinkCore::new(handle, name, source.into(), Role::Receiver, qos),
            prefetch,
            credit_mode,
            self.config.flow_window,
        );
        link.open(&mut self.outbox);
        let receiver = link.handle();
        self.links.push(Link::Receiver(link));
        self.flush_outbox();
        Ok(receiver)
    }

    // ==========================================================================
    // Link operations
    // ==========================================================================

    /// Queue a record on a sender.
    ///
    /// # Errors
    ///
    /// `NotExecuting`, `UnknownLink`, or `LinkNotOpen` once closing began.
    pub fn send(
        &mut self,
        cx: &Executing<'_>,
        sender: &Sender,
        record: DeliveryRecord,
    ) -> Result<AsyncResult<SettlementOutcome>> {
        assert_executing(cx, self.context)?;
        self.with_link(sender.handle(), |link, env| match link {
            Link::Sender(sender) => sender.send(record, env),
            Link::Receiver(receiver) => Err(not_a(Role::Sender, &receiver.core)),
        })
    }

    /// Install the consumer for a receiver and dispatch anything buffered.
    ///
    /// # Errors
    ///
    /// `NotExecuting` or `UnknownLink`.
    pub fn set_consumer(
        &mut self,
        cx: &Executing<'_>,
        receiver: &Receiver,
        consumer: impl DeliveryConsumer + 'static,
    ) -> Result<()> {
        assert_executing(cx, self.context)?;
        self.with_link(receiver.handle(), |link, _env| match link {
            Link::Receiver(receiver) => {
                receiver.set_consumer(Box::new(consumer));
                Ok(())
            }
            Link::Sender(sender) => Err(not_a(Role::Receiver, &sender.core)),
        })
    }

    /// Acknowledge a delivered record.
    ///
    /// The returned result resolves once the record is settled, after
    /// persistence when the record is durable.
    ///
    /// # Errors
    ///
    /// `NotExecuting`, `UnknownLink`, `UnknownDelivery`, or `LinkNotOpen`
    /// when the link is closed.
    pub fn acknowledge(
        &mut self,
        cx: &Executing<'_>,
        delivery: Delivery,
    ) -> Result<AsyncResult<()>> {
        assert_executing(cx, self.context)?;
        self.with_link(delivery.link(), |link, env| match link {
            Link::Receiver(receiver) => receiver.acknowledge(delivery, env),
            Link::Sender(sender) => Err(not_a(Role::Receiver, &sender.core)),
        })
    }

    /// Begin closing one link.
    ///
    /// # Errors
    ///
    /// `NotExecuting` or `UnknownLink`.
    pub fn close_link(&mut self, cx: &Executing<'_>, handle: LinkHandle) -> Result<()> {
        assert_executing(cx, self.context)?;
        self.with_link(handle, |link, env| {
            link.begin_close(env.outbox);
            Ok(())
        })
    }

    /// Close every link in creation order, then the session.
    ///
    /// # Errors
    ///
    /// `NotExecuting` outside the session's context.
    pub fn close(&mut self, cx: &Executing<'_>) -> Result<()> {
        assert_executing(cx, self.context)?;
        if self.closed {
            return Ok(());
        }
        for link in &mut self.links {
            link.begin_close(&mut self.outbox);
            link.finish_close_if_idle();
        }
        self.closed = true;
        self.flush_outbox();
        tracing::debug!(session = %self.name, links = self.links.len(), "session closed");
        Ok(())
    }

    // ==========================================================================
    // Inbound work
    // ==========================================================================

    /// Apply a frame from the peer.
    ///
    /// # Errors
    ///
    /// `NotExecuting`, `UnknownLink`, `UnknownDelivery`, `LinkNotOpen` for a
    /// transfer to a closing receiver, or `Internal` for a frame that does
    /// not fit the link's role.
    pub fn on_frame(&mut self, cx: &Executing<'_>, frame: PeerFrame) -> Result<()> {
        assert_executing(cx, self.context)?;
        let handle = frame.handle();
        let kind = frame.kind();
        tracing::trace!(session = %self.name, link = %handle, frame = kind, "frame received");
        self.with_link(handle, |link, env| match (link, frame) {
            (
                Link::Sender(sender),
                PeerFrame::Flow {
                    delivery_count,
                    link_credit,
                    ..
                },
            ) => {
                sender.on_flow(delivery_count, link_credit, env);
                Ok(())
            }
            (
                Link::Sender(sender),
                PeerFrame::Disposition {
                    tag,
                    state,
                    settled,
                    ..
                },
            ) => sender.on_disposition(tag, state, settled, env),
            (Link::Sender(sender), PeerFrame::Detach { .. }) => {
                sender.on_peer_detach(env);
                Ok(())
            }
            (
                Link::Receiver(receiver),
                PeerFrame::Transfer {
                    tag,
                    settled,
                    record,
                    ..
                },
            ) => receiver.on_transfer(tag, settled, record, env),
            (Link::Receiver(receiver), PeerFrame::Detach { .. }) => {
                receiver.on_peer_detach(env);
                Ok(())
            }
            // Sender-side echoes: flow state and settling dispositions.
            (Link::Receiver(_), PeerFrame::Flow { .. } | PeerFrame::Disposition { .. }) => Ok(()),
            (Link::Sender(sender), PeerFrame::Transfer { .. }) => Err(Error::internal(format!(
                "transfer frame addressed to sender link '{}'",
                sender.core.name
            ))),
        })
        .inspect_error(|e| {
            if e.is_invariant_violation() {
                tracing::error!(session = %self.name, link = %handle, frame = kind, error = %e, "frame rejected");
            } else {
                tracing::warn!(session = %self.name, link = %handle, frame = kind, error = %e, "frame rejected");
            }
        })
    }

    /// Apply store completions marshaled onto this context. Returns how many
    /// were applied.
    ///
    /// # Errors
    ///
    /// `NotExecuting` outside the session's context.
    pub fn run_pending(&mut self, cx: &Executing<'_>) -> Result<usize> {
        assert_executing(cx, self.context)?;
        let mut applied = 0_usize;
        while let Some(event) = self.mailbox.next_event(cx)? {
            applied = applied.saturating_add(1);
            let outcome = match event {
                LinkEvent::SendPersisted { link, tag, outcome } => {
                    self.with_link(link, |link, env| match link {
                        Link::Sender(sender) => {
                            sender.on_persisted(tag, outcome, env);
                            Ok(())
                        }
                        Link::Receiver(receiver) => Err(not_a(Role::Sender, &receiver.core)),
                    })
                }
                LinkEvent::AckPersisted { link, tag, outcome } => {
                    self.with_link(link, |link, env| match link {
                        Link::Receiver(receiver) => {
                            receiver.on_ack_persisted(tag, outcome, env);
                            Ok(())
                        }
                        Link::Sender(sender) => Err(not_a(Role::Receiver, &sender.core)),
                    })
                }
            };
            if let Err(e) = outcome {
                if e.is_invariant_violation() {
                    tracing::error!(session = %self.name, error = %e, "store completion broke an invariant");
                } else {
                    tracing::warn!(session = %self.name, error = %e, "store completion not applied");
                }
            }
        }
        Ok(applied)
    }

    /// Hand queued outbound frames to the sink.
    ///
    /// # Errors
    ///
    /// `NotExecuting` outside the session's context.
    pub fn pump_out(&mut self, cx: &Executing<'_>) -> Result<()> {
        assert_executing(cx, self.context)?;
        self.flush_outbox();
        Ok(())
    }

    // ==========================================================================
    // Queries
    // ==========================================================================

    pub fn link_state(&self, handle: LinkHandle) -> Option<LinkState> {
        self.link(handle).map(|link| link.core().state)
    }

    /// Sender: credit granted by the peer. Receiver: credit advertised.
    pub fn credit(&self, handle: LinkHandle) -> Option<u32> {
        self.link(handle).map(Link::credit)
    }

    /// Sender: queued plus unsettled sends. Receiver: delivered records not
    /// yet acknowledged.
    pub fn outstanding(&self, handle: LinkHandle) -> Option<usize> {
        self.link(handle).map(Link::outstanding)
    }

    /// Flow cost the link holds. Sender: unsettled transfers. Receiver:
    /// buffered and unacknowledged transfers.
    pub fn flow_in_use(&self, handle: LinkHandle) -> Option<u64> {
        self.link(handle).map(Link::flow_in_use)
    }

    /// Links in creation order.
    pub fn links(&self) -> Vec<LinkInfo> {
        self.links
            .iter()
            .map(|link| {
                let core = link.core();
                LinkInfo {
                    handle: core.handle,
                    name: core.name.clone(),
                    role: core.role,
                    qos: core.qos,
                    state: core.state,
                }
            })
            .collect()
    }

    // ==========================================================================
    // Message constructors
    // ==========================================================================

    pub fn create_text_message(&self, text: impl Into<String>) -> DeliveryRecord {
        self.stamp(DeliveryRecord::text(text)).build()
    }

    pub fn create_binary_message(&self, bytes: &[u8]) -> DeliveryRecord {
        self.stamp(DeliveryRecord::binary(bytes)).build()
    }

    /// Binary record holding `bytes[offset..offset + length]`.
    ///
    /// # Errors
    ///
    /// `Range` when the window does not fit inside `bytes`.
    pub fn create_binary_message_range(
        &self,
        bytes: &[u8],
        offset: usize,
        length: usize,
    ) -> Result<DeliveryRecord> {
        let window = byte_range(bytes, offset, length)?;
        Ok(self.stamp(DeliveryRecord::binary(window)).build())
    }

    // ==========================================================================
    // Internals
    // ==========================================================================

    fn stamp(&self, builder: DeliveryRecordBuilder) -> DeliveryRecordBuilder {
        builder
            .with_producer_id(self.producer_id.clone())
            .with_durable(self.config.durable_messages)
    }

    fn ensure_active(&self, cx: &Executing<'_>) -> Result<()> {
        assert_executing(cx, self.context)?;
        if self.closed {
            return Err(Error::session_closed(self.name.clone()));
        }
        Ok(())
    }

    fn link_name(&mut self, explicit: Option<String>) -> Result<String> {
        let name = match explicit.or_else(|| self.config.link.link_name.clone()) {
            Some(name) => name,
            None => self.names.next_name(),
        };
        if name.trim().is_empty() {
            return Err(Error::invalid_config("link name must not be empty"));
        }
        if self.links.iter().any(|link| link.core().name == name) {
            return Err(Error::invalid_config(format!(
                "link name '{name}' is already used in session '{}'",
                self.name
            )));
        }
        Ok(name)
    }

    fn next_handle(&self) -> Result<LinkHandle> {
        u32::try_from(self.links.len())
            .map(LinkHandle::new)
            .map_err(|_| Error::internal("link handle space exhausted"))
    }

    fn link(&self, handle: LinkHandle) -> Option<&Link> {
        self.links.get(handle.index())
    }

    fn with_link<R>(
        &mut self,
        handle: LinkHandle,
        op: impl FnOnce(&mut Link, &mut LinkEnv<'_>) -> Result<R>,
    ) -> Result<R> {
        let link = self
            .links
            .get_mut(handle.index())
            .ok_or_else(|| Error::unknown_link(handle.to_string()))?;
        let mut env = LinkEnv {
            outbox: &mut self.outbox,
            store: self.store.as_ref(),
            mailbox: &self.marshal,
        };
        let result = op(link, &mut env);
        link.finish_close_if_idle();
        self.flush_outbox();
        result
    }

    fn flush_outbox(&mut self) {
        while let Some(frame) = self.outbox.pop_front() {
            tracing::trace!(
                session = %self.name,
                link = %frame.handle(),
                frame = frame.kind(),
                "frame out"
            );
            self.sink.write_frame(frame);
        }
    }
}

fn not_a(expected: Role, core: &LinkCore) -> Error {
    Error::unknown_link(format!("{} (not a {expected} link)", core.name))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::frame::FrameRecorder;
    use crate::names::SequentialNameGenerator;
    use crate::store::InMemoryStoreGateway;

    fn session(queue: &DispatchQueue, config: SessionConfig) -> (Session, FrameRecorder) {
        let recorder = FrameRecorder::new();
        let session = Session::new(
            queue,
            config,
            Arc::new(InMemoryStoreGateway::auto_completing()),
            recorder.clone(),
        )
        .with_name_generator(SequentialNameGenerator::new("link"));
        (session, recorder)
    }

    // ==========================================================================
    // Link creation
    // ==========================================================================

    #[test]
    fn should_apply_config_defaults_to_new_links() -> Result<()> {
        let queue = DispatchQueue::new("s");
        let (mut session, recorder) = session(&queue, SessionConfig::default());
        let cx = queue.enter()?;

        let receiver = session.create_receiver(&cx, "in", ReceiverOptions::new())?;

        assert_eq!(receiver.name(), "link-0");
        assert_eq!(receiver.qos(), QosLevel::AtLeastOnce);
        assert_eq!(receiver.prefetch(), 100);
        assert_eq!(session.credit(receiver.handle()), Some(100));
        assert_eq!(session.link_state(receiver.handle()), Some(LinkState::Open));
        assert_eq!(
            recorder.frames().last(),
            Some(&Frame::Flow {
                handle: receiver.handle(),
                delivery_count: 0,
                link_credit: 100
            })
        );
        Ok(())
    }

    #[test]
    fn should_prefer_explicit_options() -> Result<()> {
        let queue = DispatchQueue::new("s");
        let (mut session, _) = session(&queue, SessionConfig::default());
        let cx = queue.enter()?;

        let sender = session.create_sender(
            &cx,
            "out",
            SenderOptions::new()
                .with_qos(QosLevel::ExactlyOnce)
                .with_name("orders"),
        )?;

        assert_eq!(sender.name(), "orders");
        assert_eq!(sender.qos(), QosLevel::ExactlyOnce);
        assert_eq!(sender.target().as_str(), "out");
        Ok(())
    }

    #[test]
    fn should_reject_duplicate_link_names() -> Result<()> {
        let queue = DispatchQueue::new("s");
        let (mut session, _) = session(&queue, SessionConfig::default().with_link_name("fixed"));
        let cx = queue.enter()?;

        session.create_sender(&cx, "a", SenderOptions::new())?;
        let second = session.create_sender(&cx, "b", SenderOptions::new());

        assert!(matches!(second, Err(Error::InvalidConfig { .. })));
        Ok(())
    }

    #[test]
    fn should_reject_creation_from_foreign_context() {
        let queue = DispatchQueue::new("owner");
        let other = DispatchQueue::new("other");
        let (mut session, recorder) = session(&queue, SessionConfig::default());
        let cx = other.enter().unwrap();

        let result = session.create_sender(&cx, "q", SenderOptions::new());

        assert!(matches!(result, Err(Error::NotExecuting { .. })));
        assert!(recorder.is_empty());
        assert!(session.links().is_empty());
    }

    // ==========================================================================
    // Lifecycle
    // ==========================================================================

    #[test]
    fn should_close_links_in_creation_order() -> Result<()> {
        let queue = DispatchQueue::new("s");
        let (mut session, recorder) = session(&queue, SessionConfig::default());
        let cx = queue.enter()?;
        session.create_sender(&cx, "a", SenderOptions::new())?;
        session.create_receiver(&cx, "b", ReceiverOptions::new())?;
        recorder.take();

        session.close(&cx)?;

        let detached: Vec<_> = recorder.frames().iter().map(Frame::handle).collect();
        assert_eq!(detached, vec![LinkHandle::new(0), LinkHandle::new(1)]);
        assert!(
            session
                .links()
                .iter()
                .all(|link| link.state == LinkState::Closed)
        );
        assert!(matches!(
            session.create_sender(&cx, "c", SenderOptions::new()),
            Err(Error::SessionClosed { .. })
        ));
        Ok(())
    }

    #[test]
    fn should_reject_send_once_closing() -> Result<()> {
        let queue = DispatchQueue::new("s");
        let (mut session, _) = session(&queue, SessionConfig::default());
        let cx = queue.enter()?;
        let sender = session.create_sender(&cx, "a", SenderOptions::new())?;
        let record = session.create_text_message("queued");
        let pending = session.send(&cx, &sender, record)?;
        session.run_pending(&cx)?;

        session.close_link(&cx, sender.handle())?;

        let late = session.create_text_message("late");
        assert!(matches!(
            session.send(&cx, &sender, late),
            Err(Error::LinkNotOpen { .. })
        ));
        assert!(matches!(pending.peek(), Some(Err(Error::LinkNotOpen { .. }))));
        assert_eq!(session.link_state(sender.handle()), Some(LinkState::Closed));
        Ok(())
    }

    #[test]
    fn should_reject_frames_for_unknown_links() -> Result<()> {
        let queue = DispatchQueue::new("s");
        let (mut session, _) = session(&queue, SessionConfig::default());
        let cx = queue.enter()?;

        let result = session.on_frame(
            &cx,
            PeerFrame::Flow {
                handle: LinkHandle::new(7),
                delivery_count: 0,
                link_credit: 1,
            },
        );

        assert!(matches!(result, Err(Error::UnknownLink { .. })));
        Ok(())
    }

    // ==========================================================================
    // Message constructors
    // ==========================================================================

    #[test]
    fn should_stamp_messages_with_session_defaults() {
        let queue = DispatchQueue::new("s");
        let (session, _) = session(&queue, SessionConfig::default().with_durable_messages(false));

        let record = session.create_text_message("hello");

        assert_eq!(record.as_text(), Some("hello"));
        assert_eq!(record.producer_id(), session.producer_id());
        assert!(!record.is_persistent());
    }

    #[test]
    fn should_copy_binary_window() -> Result<()> {
        let queue = DispatchQueue::new("s");
        let (session, _) = session(&queue, SessionConfig::default());

        let record = session.create_binary_message_range(&[1, 2, 3, 4], 1, 2)?;

        assert_eq!(record.as_binary(), Some(&[2_u8, 3][..]));
        assert!(record.is_persistent());
        Ok(())
    }

    #[test]
    fn should_reject_binary_window_past_end() {
        let queue = DispatchQueue::new("s");
        let (session, _) = session(&queue, SessionConfig::default());

        let result = session.create_binary_message_range(&[0x01, 0x02, 0x03], 1, 5);

        assert_eq!(result.map(|_| ()), Err(Error::range(1, 5, 3)));
    }
}
