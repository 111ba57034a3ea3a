//! Single-resolution asynchronous results.
//!
//! An [`AsyncResult`] is resolved exactly once, with either a success value or
//! a failure, from any thread. Consumers observe the outcome through a
//! listener callback or by awaiting a [`ResultFuture`]. A second resolution is
//! rejected with [`Error::AlreadyResolved`] and logged; the first outcome
//! stands.
//!
//! [`AsyncResult::chained`] builds multi-stage pipelines: success hands the
//! value to the next stage, failure is forwarded to the next result verbatim.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context as TaskContext, Poll};

use courier_core::{Error, Result};
use tokio::sync::oneshot;

/// Outcome of an asynchronous operation.
pub type Outcome<T> = Result<T>;

type Listener<T> = Box<dyn FnOnce(Outcome<T>) + Send>;

enum Slot<T> {
    Pending { listener: Option<Listener<T>> },
    /// `outcome` is `None` once handed to a listener or taken.
    Resolved { outcome: Option<Outcome<T>> },
}

struct Inner<T> {
    label: String,
    slot: Slot<T>,
}

/// A once-resolvable result shared between its producer and its consumer.
///
/// Cloning yields another handle to the same slot.
pub struct AsyncResult<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for AsyncResult<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for AsyncResult<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (label, resolved) = match self.inner.lock() {
            Ok(inner) => (
                inner.label.clone(),
                matches!(inner.slot, Slot::Resolved { .. }),
            ),
            Err(_) => (String::from("<poisoned>"), false),
        };
        f.debug_struct("AsyncResult")
            .field("label", &label)
            .field("resolved", &resolved)
            .finish()
    }
}

impl<T: Send + 'static> Default for AsyncResult<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> AsyncResult<T> {
    /// Create an unresolved result.
    pub fn new() -> Self {
        Self::labeled("async result")
    }

    /// Create an unresolved result with a label used in logs and errors.
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                label: label.into(),
                slot: Slot::Pending { listener: None },
            })),
        }
    }

    /// Create an unresolved result that invokes `listener` on resolution.
    pub fn with_listener<F>(listener: F) -> Self
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                label: String::from("async result"),
                slot: Slot::Pending {
                    listener: Some(Box::new(listener)),
                },
            })),
        }
    }

    /// Create a result that is already resolved.
    pub fn resolved(outcome: Outcome<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                label: String::from("async result"),
                slot: Slot::Resolved {
                    outcome: Some(outcome),
                },
            })),
        }
    }

    /// Label used in logs and errors.
    pub fn label(&self) -> String {
        self.lock()
            .map(|inner| inner.label.clone())
            .unwrap_or_default()
    }

    /// Resolve with a success value.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyResolved` if the result was resolved before.
    pub fn on_success(&self, value: T) -> Result<()> {
        self.complete(Ok(value))
    }

    /// Resolve with a failure.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyResolved` if the result was resolved before.
    pub fn on_failure(&self, reason: Error) -> Result<()> {
        self.complete(Err(reason))
    }

    /// Resolve with an outcome. The listener, if any, runs on the calling
    /// thread after the internal lock is released.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyResolved` if the result was resolved before.
    pub fn complete(&self, outcome: Outcome<T>) -> Result<()> {
        let ready = {
            let mut guard = self.lock()?;
            let Inner { label, slot } = &mut *guard;
            match slot {
                Slot::Resolved { .. } => {
                    tracing::error!(result = %label, "async result resolved twice");
                    return Err(Error::already_resolved(label.clone()));
                }
                Slot::Pending { listener } => match listener.take() {
                    Some(listener) => {
                        *slot = Slot::Resolved { outcome: None };
                        Some((listener, outcome))
                    }
                    None => {
                        *slot = Slot::Resolved {
                            outcome: Some(outcome),
                        };
                        None
                    }
                },
            }
        };

        if let Some((listener, outcome)) = ready {
            listener(outcome);
        }
        Ok(())
    }

    /// Register the listener. If the result is already resolved the listener
    /// runs immediately on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if a listener is already registered or the outcome
    /// was already consumed.
    pub fn subscribe<F>(&self, listener: F) -> Result<()>
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        let outcome = {
            let mut guard = self.lock()?;
            let Inner { label, slot } = &mut *guard;
            match slot {
                Slot::Pending { listener: Some(_) } => {
                    return Err(Error::internal(format!(
                        "{label} already has a listener"
                    )));
                }
                Slot::Pending { listener: empty } => {
                    *empty = Some(Box::new(listener));
                    return Ok(());
                }
                Slot::Resolved { outcome } => outcome.take().ok_or_else(|| {
                    Error::internal(format!("{label} outcome was already consumed"))
                })?,
            }
        };

        listener(outcome);
        Ok(())
    }

    /// Forward this result's outcome into `next`.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if this result already has a listener.
    pub fn forward_to(&self, next: Self) -> Result<()> {
        self.subscribe(move |outcome| {
            // A duplicate resolution is already logged by `complete`.
            let _already_logged = next.complete(outcome);
        })
    }

    /// True once resolved.
    pub fn is_resolved(&self) -> bool {
        self.lock()
            .map(|inner| matches!(inner.slot, Slot::Resolved { .. }))
            .unwrap_or(false)
    }

    /// Take the stored outcome, if resolved and not yet consumed.
    pub fn take_outcome(&self) -> Option<Outcome<T>> {
        let mut guard = self.lock().ok()?;
        match &mut guard.slot {
            Slot::Resolved { outcome } => outcome.take(),
            Slot::Pending { .. } => None,
        }
    }

    /// Await the outcome. Consumes the listener slot.
    pub fn future(&self) -> ResultFuture<T> {
        let (tx, rx) = oneshot::channel();
        match self.subscribe(move |outcome| {
            let _receiver_gone = tx.send(outcome);
        }) {
            Ok(()) => ResultFuture::Waiting(rx),
            Err(e) => ResultFuture::Failed(Some(e)),
        }
    }

    /// Build a stage that feeds `next`.
    ///
    /// On success the returned result hands its value and `next` to `stage`,
    /// which is responsible for resolving `next`. On failure the error is
    /// forwarded to `next` unchanged.
    pub fn chained<In, F>(next: Self, stage: F) -> AsyncResult<In>
    where
        In: Send + 'static,
        F: FnOnce(In, Self) + Send + 'static,
    {
        let label = format!("{} (stage)", next.label());
        let stage_result = AsyncResult::with_listener(move |outcome: Outcome<In>| match outcome {
            Ok(value) => stage(value, next),
            Err(reason) => {
                let _already_logged = next.on_failure(reason);
            }
        });
        stage_result.relabel(label);
        stage_result
    }

    /// Build a stage that converts its success value and resolves `next`.
    pub fn mapped<In, F>(next: Self, convert: F) -> AsyncResult<In>
    where
        In: Send + 'static,
        F: FnOnce(In) -> T + Send + 'static,
    {
        Self::chained(next, move |value, next| {
            let _already_logged = next.on_success(convert(value));
        })
    }

    fn relabel(&self, label: String) {
        if let Ok(mut inner) = self.lock() {
            inner.label = label;
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner<T>>> {
        self.inner
            .lock()
            .map_err(|_| Error::internal("async result lock poisoned"))
    }
}

impl<T: Clone + Send + 'static> AsyncResult<T> {
    /// Copy of the stored outcome without consuming it.
    pub fn peek(&self) -> Option<Outcome<T>> {
        let guard = self.lock().ok()?;
        match &guard.slot {
            Slot::Resolved { outcome } => outcome.clone(),
            Slot::Pending { .. } => None,
        }
    }
}

/// Future returned by [`AsyncResult::future`].
pub enum ResultFuture<T> {
    /// Awaiting resolution.
    Waiting(oneshot::Receiver<Outcome<T>>),
    /// Subscription failed; yields the error once.
    Failed(Option<Error>),
}

impl<T> Future for ResultFuture<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        match self.get_mut() {
            Self::Waiting(rx) => Pin::new(rx).poll(cx).map(|received| {
                received.unwrap_or_else(|_| {
                    Err(Error::internal("async result dropped before resolution"))
                })
            }),
            Self::Failed(error) => Poll::Ready(Err(error
                .take()
                .unwrap_or_else(|| Error::internal("result future polled after completion")))),
        }
    }
}
