//! Call Correlator - maps correlation ids to waiting callers.
//!
//! Flow:
//! 1. Facade calls `register()` and gets an id plus a oneshot receiver
//! 2. Facade sends the envelope carrying that id
//! 3. Dispatcher decodes the node's reply and calls `resolve()`
//! 4. Facade awaits the receiver or gives up at its deadline
//!
//! All map mutation happens under one mutex, so register, resolve and
//! `cancel_all` are atomic with respect to each other. Once `cancel_all` has
//! run, the correlator is closed and refuses new registrations.

use crate::domain::correlation::{CorrelationId, IdAllocator};
use crate::domain::envelope::RequestEnvelope;
use crate::domain::error::{CancelReason, RemoteError, RpcError};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

/// What a waiting caller eventually receives
pub type CallOutcome = Result<Value, RpcError>;

/// A call that has been registered but not yet resolved
struct PendingCall {
    /// Single-slot result channel
    sender: oneshot::Sender<CallOutcome>,
    /// When the call was registered
    created_at: Instant,
    /// Method name (for logging)
    method: String,
}

/// Caller side of a registered call.
#[derive(Debug)]
pub struct PendingHandle {
    /// Id embedded in the outbound envelope
    pub id: CorrelationId,
    /// Method name
    pub method: String,
    /// Serialized request envelope, ready for the transport
    pub payload: Vec<u8>,
    /// When the call was registered
    pub created_at: Instant,
    /// Fulfilled exactly once by the correlator
    pub receiver: oneshot::Receiver<CallOutcome>,
}

/// How a `resolve` was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Result handed to the waiting caller
    Delivered,
    /// Entry found but the caller had already stopped waiting
    CallerGone,
    /// No pending call with that id (late, duplicate or spurious)
    Unmatched,
}

/// Counters kept by the correlator
#[derive(Debug, Default)]
struct Counters {
    registered: AtomicU64,
    resolved: AtomicU64,
    timed_out: AtomicU64,
    abandoned: AtomicU64,
    cancelled: AtomicU64,
    unmatched: AtomicU64,
    expired: AtomicU64,
}

/// Point-in-time copy of the correlator counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrelatorStats {
    /// Total calls registered
    pub registered: u64,
    /// Responses delivered to a waiting caller
    pub resolved: u64,
    /// Calls withdrawn by their caller at the deadline
    pub timed_out: u64,
    /// Calls withdrawn because the caller's future was dropped
    pub abandoned: u64,
    /// Calls failed by `cancel_all`
    pub cancelled: u64,
    /// Responses with no matching pending call
    pub unmatched: u64,
    /// Calls expired by the stale sweep
    pub expired: u64,
    /// Calls currently in flight
    pub in_flight: usize,
}

struct Inner {
    calls: HashMap<CorrelationId, PendingCall>,
    /// Set by `cancel_all`; registrations fail with this reason afterwards
    closed: Option<CancelReason>,
}

/// Correlation map plus id allocation for one client instance.
pub struct Correlator {
    inner: Mutex<Inner>,
    ids: IdAllocator,
    counters: Counters,
}

impl Correlator {
    pub fn new() -> Self {
        Self::with_allocator(IdAllocator::new())
    }

    /// Correlator drawing ids from `ids`
    pub fn with_allocator(ids: IdAllocator) -> Self {
        Self {
            inner: Mutex::new(Inner {
                calls: HashMap::new(),
                closed: None,
            }),
            ids,
            counters: Counters::default(),
        }
    }

    /// Register a call and get the handle the caller will await.
    ///
    /// Fails with [`RpcError::Cancelled`] once the correlator has been
    /// closed by `cancel_all`, and with [`RpcError::IdSpaceExhausted`] if no
    /// fresh id is left.
    pub fn register(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<PendingHandle, RpcError> {
        let mut inner = self.inner.lock();
        if let Some(reason) = &inner.closed {
            return Err(RpcError::Cancelled(reason.clone()));
        }

        let id = self.ids.next().ok_or_else(|| {
            error!(method, "Correlation id space exhausted");
            RpcError::IdSpaceExhausted
        })?;

        let payload = RequestEnvelope::new(id, method, params).to_bytes()?;
        let (tx, rx) = oneshot::channel();
        let created_at = Instant::now();

        let previous = inner.calls.insert(
            id,
            PendingCall {
                sender: tx,
                created_at,
                method: method.to_string(),
            },
        );
        debug_assert!(previous.is_none(), "correlation id {id} reused while pending");
        drop(inner);

        self.counters.registered.fetch_add(1, Ordering::Relaxed);
        debug!(correlation_id = %id, method, "Registered pending call");

        Ok(PendingHandle {
            id,
            method: method.to_string(),
            payload,
            created_at,
            receiver: rx,
        })
    }

    /// Deliver the node's reply for `id`.
    ///
    /// Unknown ids are logged and dropped; this never fails.
    pub fn resolve(&self, id: CorrelationId, outcome: Result<Value, RemoteError>) -> Resolution {
        let Some(pending) = self.inner.lock().calls.remove(&id) else {
            self.counters.unmatched.fetch_add(1, Ordering::Relaxed);
            warn!(
                correlation_id = %id,
                "Response for unknown or expired correlation id"
            );
            return Resolution::Unmatched;
        };

        let response_time = pending.created_at.elapsed();
        match pending.sender.send(outcome.map_err(RpcError::Remote)) {
            Ok(()) => {
                self.counters.resolved.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %id,
                    method = pending.method,
                    response_time_ms = response_time.as_millis(),
                    "Resolved pending call"
                );
                Resolution::Delivered
            }
            Err(_) => {
                // Receiver was dropped between timeout and removal
                debug!(
                    correlation_id = %id,
                    method = pending.method,
                    "Pending call receiver dropped"
                );
                Resolution::CallerGone
            }
        }
    }

    /// Withdraw a call whose deadline elapsed.
    ///
    /// Returns false if a resolution got there first.
    pub fn expire(&self, id: &CorrelationId) -> bool {
        if self.inner.lock().calls.remove(id).is_some() {
            self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Withdraw a call whose caller stopped waiting.
    pub fn abandon(&self, id: &CorrelationId) -> bool {
        if self.inner.lock().calls.remove(id).is_some() {
            self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
            debug!(correlation_id = %id, "Abandoned pending call");
            true
        } else {
            false
        }
    }

    /// Fail every pending call with `reason` and close the correlator.
    ///
    /// Returns the number of calls failed. Later calls are no-ops.
    pub fn cancel_all(&self, reason: CancelReason) -> usize {
        let drained: Vec<(CorrelationId, PendingCall)> = {
            let mut inner = self.inner.lock();
            if inner.closed.is_none() {
                inner.closed = Some(reason.clone());
            }
            inner.calls.drain().collect()
        };

        let count = drained.len();
        for (id, pending) in drained {
            debug!(
                correlation_id = %id,
                method = pending.method,
                reason = %reason,
                "Cancelling pending call"
            );
            let _ = pending
                .sender
                .send(Err(RpcError::Cancelled(reason.clone())));
        }

        self.counters
            .cancelled
            .fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    /// Expire calls older than `max_age`, failing them with a timeout.
    ///
    /// Returns the number of calls removed.
    pub fn expire_stale(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<(CorrelationId, PendingCall)> = {
            let mut inner = self.inner.lock();
            let stale: Vec<CorrelationId> = inner
                .calls
                .iter()
                .filter(|(_, call)| now.duration_since(call.created_at) > max_age)
                .map(|(id, _)| *id)
                .collect();
            stale
                .into_iter()
                .filter_map(|id| inner.calls.remove(&id).map(|call| (id, call)))
                .collect()
        };

        let count = expired.len();
        for (id, pending) in expired {
            let elapsed = now.duration_since(pending.created_at);
            debug!(
                correlation_id = %id,
                method = pending.method,
                elapsed_ms = elapsed.as_millis(),
                max_age_ms = max_age.as_millis(),
                "Expired stale call"
            );
            let _ = pending.sender.send(Err(RpcError::Timeout {
                method: pending.method,
                elapsed,
            }));
        }

        self.counters
            .expired
            .fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    /// Number of calls currently in flight
    pub fn pending_count(&self) -> usize {
        self.inner.lock().calls.len()
    }

    pub fn is_pending(&self, id: &CorrelationId) -> bool {
        self.inner.lock().calls.contains_key(id)
    }

    /// Whether `cancel_all` has closed the correlator
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed.is_some()
    }

    /// Reason recorded by the first `cancel_all`
    pub fn close_reason(&self) -> Option<CancelReason> {
        self.inner.lock().closed.clone()
    }

    pub fn stats(&self) -> CorrelatorStats {
        CorrelatorStats {
            registered: self.counters.registered.load(Ordering::Relaxed),
            resolved: self.counters.resolved.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
            abandoned: self.counters.abandoned.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            unmatched: self.counters.unmatched.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            in_flight: self.pending_count(),
        }
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}
