//! Store gateway boundary and implementations.
//!
//! The link layer only ever asks two things of durable storage: create a
//! record for a delivery, and persist it asynchronously. Completion may arrive
//! on any thread; callers marshal it back to their own context.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use courier_core::{Error, Result, ResultExt};

use crate::callback::{AsyncResult, Outcome};
use crate::record::{DeliveryRecord, StoreRecord};
use crate::types::RecordHandle;

/// Durable storage as seen by links.
pub trait StoreGateway: Send + Sync {
    /// Create the store-side record for a delivery.
    fn create_record(&self, record: &DeliveryRecord) -> RecordHandle;

    /// Request persistence of a created record. Must not block; the returned
    /// result may resolve on any thread.
    fn request_persist(&self, handle: RecordHandle) -> AsyncResult<()>;
}

#[derive(Default)]
struct StoreState {
    records: HashMap<RecordHandle, StoreRecord>,
    pending: VecDeque<(RecordHandle, AsyncResult<()>)>,
    persisted: HashSet<RecordHandle>,
    create_calls: usize,
    persist_calls: usize,
}

/// In-memory store gateway for testing and demos.
///
/// Persistence requests are parked until completed explicitly, unless the
/// gateway was built with [`Self::auto_completing`].
#[derive(Default)]
pub struct InMemoryStoreGateway {
    next_handle: AtomicU64,
    auto_complete: bool,
    state: Mutex<StoreState>,
}

impl InMemoryStoreGateway {
    /// Create a gateway that parks persistence requests.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a gateway that confirms persistence immediately.
    pub fn auto_completing() -> Self {
        Self {
            auto_complete: true,
            ..Self::default()
        }
    }

    /// Complete the parked request for `handle`.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if no request for `handle` is parked.
    pub fn complete(&self, handle: RecordHandle, outcome: Outcome<()>) -> Result<()> {
        let result = {
            let mut state = self.lock()?;
            let position = state
                .pending
                .iter()
                .position(|(pending, _)| *pending == handle)
                .ok_or_else(|| Error::internal(format!("no pending persist for {handle}")))?;
            let (_, result) = state
                .pending
                .remove(position)
                .ok_or_else(|| Error::internal(format!("no pending persist for {handle}")))?;
            if outcome.is_ok() {
                state.persisted.insert(handle);
            }
            result
        };
        result.complete(outcome)
    }

    /// Complete the oldest parked request.
    ///
    /// # Errors
    ///
    /// Propagates a duplicate resolution of the parked result.
    pub fn complete_next(&self, outcome: Outcome<()>) -> Result<Option<RecordHandle>> {
        let next = self.lock()?.pending.front().map(|(handle, _)| *handle);
        match next {
            Some(handle) => self.complete(handle, outcome).map(|()| Some(handle)),
            None => Ok(None),
        }
    }

    /// Complete every parked request successfully. Returns how many were
    /// completed.
    ///
    /// # Errors
    ///
    /// Propagates a duplicate resolution of a parked result.
    pub fn complete_all(&self) -> Result<usize> {
        let mut completed = 0_usize;
        while self.complete_next(Ok(()))?.is_some() {
            completed = completed.saturating_add(1);
        }
        Ok(completed)
    }

    /// Fail every parked request with a store failure.
    ///
    /// # Errors
    ///
    /// Propagates a duplicate resolution of a parked result.
    pub fn fail_all(&self, reason: &str) -> Result<usize> {
        let mut failed = 0_usize;
        while self
            .complete_next(Err(Error::store_failure(reason)))?
            .is_some()
        {
            failed = failed.saturating_add(1);
        }
        Ok(failed)
    }

    /// Handles of parked requests, oldest first.
    pub fn pending(&self) -> Vec<RecordHandle> {
        self.lock()
            .map(|state| state.pending.iter().map(|(handle, _)| *handle).collect())
            .unwrap_or_default()
    }

    /// Stored snapshot for `handle`.
    pub fn record(&self, handle: RecordHandle) -> Option<StoreRecord> {
        self.lock()
            .into_option_logged()?
            .records
            .get(&handle)
            .cloned()
    }

    /// True once `handle` was persisted successfully.
    pub fn is_persisted(&self, handle: RecordHandle) -> bool {
        self.lock()
            .map(|state| state.persisted.contains(&handle))
            .unwrap_or(false)
    }

    /// Number of `create_record` calls so far.
    pub fn create_calls(&self) -> usize {
        self.lock().map(|state| state.create_calls).unwrap_or(0)
    }

    /// Number of `request_persist` calls so far.
    pub fn persist_calls(&self) -> usize {
        self.lock().map(|state| state.persist_calls).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| Error::internal("store state lock poisoned"))
    }
}

impl StoreGateway for InMemoryStoreGateway {
    fn create_record(&self, record: &DeliveryRecord) -> RecordHandle {
        let handle = RecordHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut state) = self.state.lock() {
            state.records.insert(handle, record.create_store_record());
            state.create_calls = state.create_calls.saturating_add(1);
        }
        handle
    }

    fn request_persist(&self, handle: RecordHandle) -> AsyncResult<()> {
        let Ok(mut state) = self.state.lock() else {
            return AsyncResult::resolved(Err(Error::internal("store state lock poisoned")));
        };
        state.persist_calls = state.persist_calls.saturating_add(1);
        if !state.records.contains_key(&handle) {
            return AsyncResult::resolved(Err(Error::store_failure(format!(
                "{handle} was never created"
            ))));
        }
        if self.auto_complete {
            state.persisted.insert(handle);
            return AsyncResult::resolved(Ok(()));
        }
        let result = AsyncResult::labeled(format!("persist {handle}"));
        state.pending.push_back((handle, result.clone()));
        result
    }
}

/// A wrapper that adds tracing to a store gateway.
pub struct TracingStoreGateway<S: StoreGateway> {
    inner: S,
}

impl<S: StoreGateway> TracingStoreGateway<S> {
    /// Create a new tracing store gateway.
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }

    /// The wrapped gateway.
    pub const fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: StoreGateway> StoreGateway for TracingStoreGateway<S> {
    fn create_record(&self, record: &DeliveryRecord) -> RecordHandle {
        tracing::debug!(
            destination = %record.destination(),
            cost = record.flow_token().cost(),
            "Creating store record"
        );
        let handle = self.inner.create_record(record);
        tracing::trace!(record = %handle, "Store record created");
        handle
    }

    fn request_persist(&self, handle: RecordHandle) -> AsyncResult<()> {
        tracing::debug!(record = %handle, "Requesting persistence");
        let traced = AsyncResult::labeled(format!("persist {handle}"));
        let next = traced.clone();
        let subscribed = self.inner.request_persist(handle).subscribe(move |outcome| {
            match &outcome {
                Ok(()) => tracing::trace!(record = %handle, "Record persisted"),
                Err(e) => tracing::warn!(record = %handle, error = %e, "Persistence failed"),
            }
            let _already_logged = next.complete(outcome);
        });
        match subscribed {
            Ok(()) => traced,
            Err(e) => AsyncResult::resolved(Err(e)),
        }
    }
}
