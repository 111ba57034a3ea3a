//! Execution contexts.
//!
//! Every session is bound to one [`DispatchQueue`]. Mutating operations take
//! an [`Executing`] token proving the caller is running on that queue;
//! [`assert_executing`] rejects a token from any other queue.
//!
//! Work finishing elsewhere (store completions on I/O threads) never touches
//! session state directly. It is posted through a [`ContextSender`] into the
//! owning queue's [`Mailbox`] and applied when the owner drains it.

use std::cell::Cell;

use courier_core::{Error, Result, ResultExt};
use tokio::sync::mpsc;

use crate::callback::{AsyncResult, Outcome};
use crate::types::ContextId;

/// A serial execution context.
#[derive(Debug)]
pub struct DispatchQueue {
    id: ContextId,
    label: String,
    active: Cell<bool>,
}

impl DispatchQueue {
    /// Create a new queue.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: ContextId::new(),
            label: label.into(),
            active: Cell::new(false),
        }
    }

    /// Queue identity.
    pub const fn id(&self) -> ContextId {
        self.id
    }

    /// Queue label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// True while an [`Executing`] token for this queue is alive.
    pub fn is_executing(&self) -> bool {
        self.active.get()
    }

    /// Begin executing on this queue.
    ///
    /// # Errors
    ///
    /// Returns `ContextBusy` if the queue is already executing.
    pub fn enter(&self) -> Result<Executing<'_>> {
        if self.active.replace(true) {
            return Err(Error::context_busy(self.label.clone()));
        }
        tracing::trace!(context = %self.label, "entered execution context");
        Ok(Executing { queue: self })
    }
}

/// Proof that the holder is running on a particular [`DispatchQueue`].
#[derive(Debug)]
pub struct Executing<'q> {
    queue: &'q DispatchQueue,
}

impl Executing<'_> {
    /// Identity of the queue being executed.
    pub const fn context_id(&self) -> ContextId {
        self.queue.id
    }

    /// Label of the queue being executed.
    pub fn label(&self) -> &str {
        &self.queue.label
    }
}

impl Drop for Executing<'_> {
    fn drop(&mut self) {
        self.queue.active.set(false);
    }
}

/// Check that `cx` belongs to the context identified by `expected`.
///
/// # Errors
///
/// Returns `NotExecuting` (and logs it) when the token is for another queue.
pub fn assert_executing(cx: &Executing<'_>, expected: ContextId) -> Result<()> {
    if cx.context_id() == expected {
        return Ok(());
    }
    tracing::error!(
        expected = %expected,
        actual = %cx.context_id(),
        actual_label = cx.label(),
        "operation issued outside its execution context"
    );
    Err(Error::not_executing(
        expected.to_string(),
        cx.context_id().to_string(),
    ))
}

/// Inbox of events destined for one execution context.
#[derive(Debug)]
pub struct Mailbox<E> {
    owner: ContextId,
    tx: mpsc::UnboundedSender<E>,
    rx: mpsc::UnboundedReceiver<E>,
}

impl<E: Send + 'static> Mailbox<E> {
    /// Create a mailbox owned by `owner`.
    pub fn new(owner: ContextId) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { owner, tx, rx }
    }

    /// A sendable handle for posting into this mailbox.
    pub fn sender(&self) -> ContextSender<E> {
        ContextSender {
            tx: self.tx.clone(),
        }
    }

    /// Take the next queued event, if any.
    ///
    /// # Errors
    ///
    /// Returns `NotExecuting` when `cx` is not the owning context.
    pub fn next_event(&mut self, cx: &Executing<'_>) -> Result<Option<E>> {
        assert_executing(cx, self.owner)?;
        Ok(self.rx.try_recv().ok())
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Thread-safe handle that posts events into a [`Mailbox`].
#[derive(Debug)]
pub struct ContextSender<E> {
    tx: mpsc::UnboundedSender<E>,
}

impl<E> Clone for ContextSender<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<E: Send + 'static> ContextSender<E> {
    /// Post an event.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the mailbox has been dropped.
    pub fn post(&self, event: E) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| Error::internal("execution context mailbox is closed"))
    }

    /// An [`AsyncResult`] whose outcome is posted back to the owning context,
    /// wrapped by `wrap`, no matter which thread resolves it.
    pub fn marshal<T, F>(&self, wrap: F) -> AsyncResult<T>
    where
        T: Send + 'static,
        F: FnOnce(Outcome<T>) -> E + Send + 'static,
    {
        let sender = self.clone();
        AsyncResult::with_listener(move |outcome| {
            sender.post(wrap(outcome)).warn_on_error("marshal to context");
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn should_reject_nested_enter() {
        let queue = DispatchQueue::new("session-a");
        let cx = queue.enter().unwrap();

        assert_eq!(
            queue.enter().map(|_| ()),
            Err(Error::context_busy("session-a"))
        );
        drop(cx);

        assert!(!queue.is_executing());
        assert!(queue.enter().is_ok());
    }

    #[test]
    fn should_accept_own_token() {
        let queue = DispatchQueue::new("a");
        let cx = queue.enter().unwrap();
        assert!(assert_executing(&cx, queue.id()).is_ok());
    }

    #[test]
    fn should_reject_foreign_token() {
        let ours = DispatchQueue::new("ours");
        let theirs = DispatchQueue::new("theirs");
        let cx = theirs.enter().unwrap();

        let result = assert_executing(&cx, ours.id());

        assert!(matches!(result, Err(Error::NotExecuting { .. })));
    }

    #[test]
    fn should_deliver_marshaled_outcome_through_mailbox() {
        let queue = DispatchQueue::new("owner");
        let mut mailbox = Mailbox::new(queue.id());
        let result = mailbox.sender().marshal(|outcome: Outcome<u32>| outcome.map(|n| n + 1));

        std::thread::spawn(move || result.on_success(41).unwrap())
            .join()
            .unwrap();

        let cx = queue.enter().unwrap();
        assert_eq!(mailbox.next_event(&cx).unwrap(), Some(Ok(42)));
        assert_eq!(mailbox.next_event(&cx).unwrap(), None);
    }

    #[test]
    fn should_refuse_drain_from_foreign_context() {
        let owner = DispatchQueue::new("owner");
        let other = DispatchQueue::new("other");
        let mut mailbox = Mailbox::<u8>::new(owner.id());
        mailbox.sender().post(1).unwrap();

        let cx = other.enter().unwrap();

        assert!(mailbox.next_event(&cx).is_err());
        assert_eq!(mailbox.len(), 1);
    }
}
