//! In-process loopback: two sessions wired back to back.
//!
//! Frames recorded on one side are fed to the other as peer frames. Links are
//! created in pairs, so a sender on the outbound session and its receiver on
//! the inbound session share a handle value.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use courier_core::SessionConfig;
use courier_link::{
    AsyncResult, Delivery, DeliveryConsumer, DeliveryRecord, DispatchQueue, FrameRecorder,
    InMemoryStoreGateway, LinkState, Receiver, ReceiverOptions, Sender, SenderOptions, Session,
    SettlementOutcome, TracingStoreGateway,
};
use tracing::{debug, info};

/// Upper bound on exchange rounds before the loopback is considered stuck.
const MAX_ROUNDS: usize = 1_000;

pub struct Loopback {
    outbound_queue: DispatchQueue,
    inbound_queue: DispatchQueue,
    outbound: Session,
    inbound: Session,
    outbound_frames: FrameRecorder,
    inbound_frames: FrameRecorder,
    frames_exchanged: usize,
}

impl Loopback {
    /// Build both sessions over auto-completing, traced in-memory stores.
    pub fn new(config: &SessionConfig) -> Self {
        let outbound_queue = DispatchQueue::new("outbound");
        let inbound_queue = DispatchQueue::new("inbound");
        let outbound_frames = FrameRecorder::new();
        let inbound_frames = FrameRecorder::new();

        let outbound = Session::new(
            &outbound_queue,
            config.clone(),
            Arc::new(TracingStoreGateway::new(
                InMemoryStoreGateway::auto_completing(),
            )),
            outbound_frames.clone(),
        );
        let inbound = Session::new(
            &inbound_queue,
            config.clone(),
            Arc::new(TracingStoreGateway::new(
                InMemoryStoreGateway::auto_completing(),
            )),
            inbound_frames.clone(),
        );

        Self {
            outbound_queue,
            inbound_queue,
            outbound,
            inbound,
            outbound_frames,
            inbound_frames,
            frames_exchanged: 0,
        }
    }

    pub const fn outbound(&self) -> &Session {
        &self.outbound
    }

    pub const fn inbound(&self) -> &Session {
        &self.inbound
    }

    pub const fn frames_exchanged(&self) -> usize {
        self.frames_exchanged
    }

    /// Open a sender and its matching receiver on `address`.
    ///
    /// # Errors
    ///
    /// Fails if either link cannot be created or the handles diverge.
    pub fn pair(&mut self, address: &str) -> Result<(Sender, Receiver)> {
        let sender = {
            let cx = self.outbound_queue.enter()?;
            self.outbound
                .create_sender(&cx, address, SenderOptions::new())?
        };
        let receiver = {
            let cx = self.inbound_queue.enter()?;
            self.inbound
                .create_receiver(&cx, address, ReceiverOptions::new())?
        };
        if sender.handle() != receiver.handle() {
            bail!(
                "link handles diverged: sender {} vs receiver {}",
                sender.handle(),
                receiver.handle()
            );
        }
        self.run()?;
        Ok((sender, receiver))
    }

    /// Install the consumer for `receiver`.
    ///
    /// # Errors
    ///
    /// Fails if the receiver is unknown to the inbound session.
    pub fn set_consumer(
        &mut self,
        receiver: &Receiver,
        consumer: impl DeliveryConsumer + 'static,
    ) -> Result<()> {
        let cx = self.inbound_queue.enter()?;
        self.inbound.set_consumer(&cx, receiver, consumer)?;
        Ok(())
    }

    /// Send `body` as a session-stamped text record.
    ///
    /// # Errors
    ///
    /// Fails if the sender rejects the record.
    pub fn send_text(
        &mut self,
        sender: &Sender,
        body: impl Into<String>,
    ) -> Result<AsyncResult<SettlementOutcome>> {
        let record = self.outbound.create_text_message(body);
        self.send(sender, record)
    }

    /// Send a record and run the loopback until quiet.
    ///
    /// # Errors
    ///
    /// Fails if the sender rejects the record or the exchange gets stuck.
    pub fn send(
        &mut self,
        sender: &Sender,
        record: DeliveryRecord,
    ) -> Result<AsyncResult<SettlementOutcome>> {
        let result = {
            let cx = self.outbound_queue.enter()?;
            self.outbound.send(&cx, sender, record)?
        };
        self.run()?;
        Ok(result)
    }

    /// Acknowledge a delivery and run the loopback until quiet.
    ///
    /// # Errors
    ///
    /// Fails if the acknowledgement is rejected or the exchange gets stuck.
    pub fn acknowledge(&mut self, delivery: Delivery) -> Result<AsyncResult<()>> {
        let done = {
            let cx = self.inbound_queue.enter()?;
            self.inbound.acknowledge(&cx, delivery)?
        };
        self.run()?;
        Ok(done)
    }

    /// Close both sessions and exchange the detaches.
    ///
    /// # Errors
    ///
    /// Fails if either session rejects the close.
    pub fn close(&mut self) -> Result<()> {
        {
            let cx = self.outbound_queue.enter()?;
            self.outbound.close(&cx)?;
        }
        {
            let cx = self.inbound_queue.enter()?;
            self.inbound.close(&cx)?;
        }
        self.run()?;
        let open = self
            .outbound
            .links()
            .iter()
            .chain(self.inbound.links().iter())
            .filter(|link| link.state != LinkState::Closed)
            .count();
        info!(frames = self.frames_exchanged, open, "loopback closed");
        Ok(())
    }

    /// Apply store completions and move frames both ways until nothing moves.
    ///
    /// # Errors
    ///
    /// Fails if a side rejects a frame or the exchange does not settle.
    pub fn run(&mut self) -> Result<()> {
        for _ in 0..MAX_ROUNDS {
            let mut moved = 0_usize;
            {
                let cx = self.outbound_queue.enter()?;
                moved += self.outbound.run_pending(&cx)?;
            }
            {
                let cx = self.inbound_queue.enter()?;
                moved += self.inbound.run_pending(&cx)?;
            }
            moved += self.exchange()?;
            if moved == 0 {
                return Ok(());
            }
        }
        bail!("loopback did not settle after {MAX_ROUNDS} rounds")
    }

    fn exchange(&mut self) -> Result<usize> {
        let mut moved = 0_usize;
        {
            let cx = self.inbound_queue.enter()?;
            for frame in self.outbound_frames.take() {
                let kind = frame.kind();
                let handle = frame.handle();
                if let Some(peer) = frame.into_peer(handle) {
                    debug!(direction = "out->in", frame = kind, link = %handle, "loopback frame");
                    self.inbound
                        .on_frame(&cx, peer)
                        .with_context(|| format!("inbound rejected {kind} on {handle}"))?;
                    moved += 1;
                }
            }
        }
        {
            let cx = self.outbound_queue.enter()?;
            for frame in self.inbound_frames.take() {
                let kind = frame.kind();
                let handle = frame.handle();
                if let Some(peer) = frame.into_peer(handle) {
                    debug!(direction = "in->out", frame = kind, link = %handle, "loopback frame");
                    self.outbound
                        .on_frame(&cx, peer)
                        .with_context(|| format!("outbound rejected {kind} on {handle}"))?;
                    moved += 1;
                }
            }
        }
        self.frames_exchanged += moved;
        Ok(moved)
    }
}
