//! RPC Client Facade.
//!
//! Owns one transport, one correlator and one dispatcher task, and drives
//! them through the lifecycle:
//!
//! ```text
//! start():    guard ─▶ Connecting ─▶ transport.connect ─▶ spawn dispatcher ─▶ Ready
//! call():     register ─▶ send ─▶ await reply | deadline
//! shutdown(): Draining (cancel_all) ─▶ stop dispatcher ─▶ close transport ─▶ Closed
//! ```
//!
//! Transport loss seen by either the dispatcher or a failed send takes the
//! same Draining path; `cancel_all` runs once, for whichever party wins the
//! `Ready -> Draining` transition.

use crate::adapters::transport_from_config;
use crate::correlator::{Correlator, CorrelatorStats, PendingHandle};
use crate::dispatcher::{DispatchCounters, Dispatcher, ExitCause, SinkSlot, SweepConfig};
use crate::domain::config::ClientConfig;
use crate::domain::correlation::CorrelationId;
use crate::domain::envelope::Notification;
use crate::domain::error::{CancelReason, RpcError, RpcResult, TransportError};
use crate::domain::network::NetworkParams;
use crate::domain::state::ClientState;
use crate::lifecycle::{Lifecycle, StateChange};
use crate::methods::{GetBlockchainInfo, RpcMethod};
use crate::ports::{NotificationSink, Transport};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Deadline carried by one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    deadline: Instant,
}

impl CallContext {
    /// Deadline `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
        }
    }

    pub fn until(deadline: Instant) -> Self {
        Self { deadline }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline (zero once passed)
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Point-in-time counters for one client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub calls: CorrelatorStats,
    /// Inbound payloads read by the dispatcher
    pub messages_received: u64,
    pub protocol_violations: u64,
    pub notifications_delivered: u64,
    pub notifications_discarded: u64,
}

/// State shared between the facade and its dispatcher task
struct Shared {
    id: Uuid,
    config: ClientConfig,
    network: OnceLock<NetworkParams>,
    lifecycle: Lifecycle,
    correlator: Arc<Correlator>,
    transport: Arc<dyn Transport>,
    sink: SinkSlot,
    counters: Arc<DispatchCounters>,
    stop: Arc<Notify>,
}

impl Shared {
    /// Win the move to `Draining` and fail every pending call.
    ///
    /// Returns false when another party already started draining.
    fn begin_draining(&self, reason: CancelReason) -> bool {
        if self
            .lifecycle
            .transition(ClientState::Draining, &reason.to_string())
            .is_err()
        {
            return false;
        }

        let cancelled = self.correlator.cancel_all(reason.clone());
        match &reason {
            CancelReason::TransportLost(e) => {
                error!(error = %e, cancelled, "Transport lost, client draining");
            }
            CancelReason::Shutdown => {
                info!(cancelled, "Client draining for shutdown");
            }
        }
        true
    }

    /// Transport failure observed on the send path
    fn transport_lost(&self, error: TransportError) {
        if self.begin_draining(CancelReason::TransportLost(error)) {
            self.stop.notify_one();
        }
    }

    /// Runs on the dispatcher task after its loop returns
    async fn dispatcher_exited(&self, cause: ExitCause) {
        match cause {
            ExitCause::TransportClosed => {
                self.begin_draining(CancelReason::TransportLost(TransportError::Closed));
            }
            ExitCause::TransportFailed(e) => {
                self.begin_draining(CancelReason::TransportLost(e));
            }
            ExitCause::StopRequested => {}
        }

        self.transport.close().await;
        if self
            .lifecycle
            .transition(ClientState::Closed, "dispatcher exited")
            .is_ok()
        {
            debug!("Dispatcher released client resources");
        }
    }
}

/// Correlating JSON-RPC client bound to one node and one network.
///
/// # Example
///
/// ```no_run
/// use btc_rpc_client::{methods::GetBlockCount, ClientConfig, Network, RpcClient};
///
/// # async fn run() -> Result<(), btc_rpc_client::RpcError> {
/// let config = ClientConfig::new(Network::Regtest, "http://127.0.0.1:18443");
/// let client = RpcClient::from_config(config)?;
/// client.start().await?;
///
/// let height = client.invoke(&GetBlockCount).await?;
/// println!("height {height}");
///
/// client.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct RpcClient {
    shared: Arc<Shared>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl RpcClient {
    /// Client over `transport`; nothing happens until [`start`](Self::start).
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: Uuid::new_v4(),
                config,
                network: OnceLock::new(),
                lifecycle: Lifecycle::new(),
                correlator: Arc::new(Correlator::new()),
                transport,
                sink: Arc::new(RwLock::new(None)),
                counters: Arc::new(DispatchCounters::default()),
                stop: Arc::new(Notify::new()),
            }),
            dispatcher: Mutex::new(None),
        }
    }

    /// Client over the transport the endpoint URL selects
    pub fn from_config(config: ClientConfig) -> RpcResult<Self> {
        let transport = transport_from_config(&config)?;
        Ok(Self::new(config, transport))
    }

    /// Construct and start in one step
    pub async fn connect(config: ClientConfig, transport: Arc<dyn Transport>) -> RpcResult<Self> {
        let client = Self::new(config, transport);
        client.start().await?;
        Ok(client)
    }

    /// Run the network identity guard, connect and start dispatching.
    ///
    /// Only valid once, from `Uninitialized`. A guard failure closes the
    /// client without touching the transport.
    pub async fn start(&self) -> RpcResult<()> {
        let state = self.state();
        if state != ClientState::Uninitialized {
            return Err(RpcError::NotReady(state));
        }

        if let Err(e) = self.shared.config.validate() {
            error!(client_id = %self.shared.id, error = %e, "Invalid client configuration");
            self.close_unstarted("invalid configuration");
            return Err(e.into());
        }

        let params = match self.shared.config.network.resolve() {
            Ok(params) => params,
            Err(e) => {
                error!(
                    client_id = %self.shared.id,
                    network = %self.shared.config.network.name,
                    error = %e,
                    "Network identity guard rejected configuration"
                );
                self.close_unstarted("unsupported network");
                return Err(e.into());
            }
        };
        let _ = self.shared.network.set(params.clone());

        self.shared
            .lifecycle
            .transition(ClientState::Connecting, "start")
            .map_err(RpcError::NotReady)?;

        let connect_timeout = self.shared.config.endpoint.connect_timeout;
        let connected = tokio::time::timeout(connect_timeout, self.shared.transport.connect())
            .await
            .unwrap_or_else(|_| {
                Err(TransportError::Connect(format!(
                    "timed out after {connect_timeout:?}"
                )))
            });
        if let Err(e) = connected {
            self.shared
                .begin_draining(CancelReason::TransportLost(e.clone()));
            self.shared.transport.close().await;
            let _ = self
                .shared
                .lifecycle
                .transition(ClientState::Closed, "connect failed");
            return Err(e.into());
        }

        self.spawn_dispatcher(&params);

        if let Err(current) = self
            .shared
            .lifecycle
            .transition(ClientState::Ready, "connected")
        {
            // Shut down (or lost the transport) while connecting
            self.shared.stop.notify_one();
            self.join_dispatcher().await;
            return Err(RpcError::NotReady(current));
        }

        info!(
            client_id = %self.shared.id,
            network = %params.name,
            url = %self.shared.config.endpoint.url,
            "RPC client ready"
        );

        if self.shared.config.verify_remote_chain {
            if let Err(e) = self.verify_remote_chain(&params).await {
                self.shutdown().await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Send `method` and wait for its reply until `ctx`'s deadline.
    ///
    /// Performs exactly one transport send. The pending call is withdrawn
    /// on every exit path, including the returned future being dropped.
    pub async fn call(&self, method: &str, params: Vec<Value>, ctx: &CallContext) -> RpcResult<Value> {
        let state = self.state();
        if state != ClientState::Ready {
            return Err(RpcError::NotReady(state));
        }
        if ctx.is_expired() {
            return Err(RpcError::Timeout {
                method: method.to_string(),
                elapsed: Duration::ZERO,
            });
        }

        let handle = match self.shared.correlator.register(method, params) {
            Ok(handle) => handle,
            // Draining began after the state check
            Err(RpcError::Cancelled(_)) => return Err(RpcError::NotReady(self.state())),
            Err(e) => return Err(e),
        };
        let PendingHandle {
            id,
            payload,
            created_at,
            mut receiver,
            ..
        } = handle;
        let mut guard = AbandonGuard::new(&self.shared.correlator, id);

        match tokio::time::timeout_at(ctx.deadline, self.shared.transport.send(payload)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(correlation_id = %id, method, error = %e, "Send failed");
                drop(guard);
                if e.is_connection_loss() {
                    self.shared.transport_lost(e.clone());
                }
                return Err(RpcError::Transport(e));
            }
            Err(_) => {
                guard.disarm();
                self.shared.correlator.expire(&id);
                return Err(self.timeout_error(id, method, created_at.elapsed()));
            }
        }

        match tokio::time::timeout_at(ctx.deadline, &mut receiver).await {
            Ok(Ok(outcome)) => {
                guard.disarm();
                outcome
            }
            Ok(Err(_)) => {
                guard.disarm();
                Err(withdrawn_error(&self.shared.correlator, id, method))
            }
            Err(_) => {
                guard.disarm();
                if self.shared.correlator.expire(&id) {
                    return Err(self.timeout_error(id, method, created_at.elapsed()));
                }
                // A resolution won the race with the deadline
                receiver.try_recv().unwrap_or_else(|_| {
                    Err(RpcError::Timeout {
                        method: method.to_string(),
                        elapsed: created_at.elapsed(),
                    })
                })
            }
        }
    }

    /// [`call`](Self::call) with the configured default timeout
    pub async fn call_default(&self, method: &str, params: Vec<Value>) -> RpcResult<Value> {
        let ctx = CallContext::with_timeout(self.shared.config.timeouts.default_call);
        self.call(method, params, &ctx).await
    }

    /// [`call`](Self::call) and decode the result as `T`
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
        ctx: &CallContext,
    ) -> RpcResult<T> {
        let value = self.call(method, params, ctx).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Call a typed method with the default timeout
    pub async fn invoke<M: RpcMethod>(&self, method: &M) -> RpcResult<M::Output> {
        let ctx = CallContext::with_timeout(self.shared.config.timeouts.default_call);
        self.invoke_with(method, &ctx).await
    }

    pub async fn invoke_with<M: RpcMethod>(&self, method: &M, ctx: &CallContext) -> RpcResult<M::Output> {
        self.call_as(M::NAME, method.params(), ctx).await
    }

    /// Route notifications to `sink`, replacing any previous sink
    pub fn set_notification_sink(&self, sink: Arc<dyn NotificationSink>) {
        *self.shared.sink.write() = Some(sink);
    }

    /// Discard notifications from now on
    pub fn clear_notification_sink(&self) {
        *self.shared.sink.write() = None;
    }

    /// Install a bounded channel as the notification sink.
    ///
    /// Notifications arriving while the channel is full are dropped.
    pub fn notifications(&self) -> mpsc::Receiver<Notification> {
        let (tx, rx) = mpsc::channel(self.shared.config.notifications.buffer);
        self.set_notification_sink(Arc::new(tx));
        rx
    }

    pub fn state(&self) -> ClientState {
        self.shared.lifecycle.current()
    }

    /// Latest state, for waiting on a particular state
    pub fn state_watch(&self) -> watch::Receiver<ClientState> {
        self.shared.lifecycle.subscribe()
    }

    /// Every subsequent transition with its cause
    pub fn state_changes(&self) -> broadcast::Receiver<StateChange> {
        self.shared.lifecycle.events()
    }

    /// Network parameters accepted by the guard; `None` before `start`
    pub fn network(&self) -> Option<&NetworkParams> {
        self.shared.network.get()
    }

    pub fn client_id(&self) -> Uuid {
        self.shared.id
    }

    pub fn stats(&self) -> ClientStats {
        let counters = &self.shared.counters;
        ClientStats {
            calls: self.shared.correlator.stats(),
            messages_received: counters.messages.load(Ordering::Relaxed),
            protocol_violations: counters.protocol_violations.load(Ordering::Relaxed),
            notifications_delivered: counters.notifications_delivered.load(Ordering::Relaxed),
            notifications_discarded: counters.notifications_discarded.load(Ordering::Relaxed),
        }
    }

    /// Fail pending calls, stop the dispatcher and close the transport.
    ///
    /// Idempotent; returns once the client is `Closed`.
    pub async fn shutdown(&self) {
        match self.state() {
            ClientState::Uninitialized => {
                self.close_unstarted("shutdown before start");
                return;
            }
            ClientState::Closed => return,
            _ => {}
        }

        self.shared.begin_draining(CancelReason::Shutdown);
        self.shared.stop.notify_one();
        self.join_dispatcher().await;

        self.shared.transport.close().await;
        if self
            .shared
            .lifecycle
            .transition(ClientState::Closed, "shutdown")
            .is_ok()
        {
            info!(client_id = %self.shared.id, "RPC client closed");
        }
    }

    fn spawn_dispatcher(&self, params: &NetworkParams) {
        let mut dispatcher = Dispatcher::new(
            Arc::clone(&self.shared.correlator),
            Arc::clone(&self.shared.transport),
            Arc::clone(&self.shared.sink),
            Arc::clone(&self.shared.counters),
            Arc::clone(&self.shared.stop),
        );
        if let Some(max_age) = self.shared.config.timeouts.stale_after {
            dispatcher = dispatcher.with_sweep(SweepConfig {
                max_age,
                interval: self.shared.config.timeouts.sweep_interval,
            });
        }

        let span = info_span!("rpc_client", client_id = %self.shared.id, network = %params.name);
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(
            async move {
                let cause = dispatcher.run().await;
                shared.dispatcher_exited(cause).await;
            }
            .instrument(span),
        );
        *self.dispatcher.lock() = Some(handle);
    }

    async fn join_dispatcher(&self) {
        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(client_id = %self.shared.id, error = %e, "Dispatcher task failed");
            }
        }
    }

    fn close_unstarted(&self, cause: &str) {
        self.shared.correlator.cancel_all(CancelReason::Shutdown);
        let _ = self.shared.lifecycle.transition(ClientState::Closed, cause);
    }

    fn timeout_error(&self, id: CorrelationId, method: &str, elapsed: Duration) -> RpcError {
        debug!(correlation_id = %id, method, elapsed_ms = elapsed.as_millis(), "Call timed out");
        RpcError::Timeout {
            method: method.to_string(),
            elapsed,
        }
    }

    async fn verify_remote_chain(&self, params: &NetworkParams) -> RpcResult<()> {
        let info = self.invoke(&GetBlockchainInfo).await?;
        if !params.accepts_chain(&info.chain) {
            error!(
                client_id = %self.shared.id,
                expected = %params.chain_name,
                actual = %info.chain,
                "Node is on a different chain"
            );
            return Err(RpcError::NetworkMismatch {
                expected: params.chain_name.clone(),
                actual: info.chain,
            });
        }
        debug!(chain = %info.chain, blocks = info.blocks, "Remote chain verified");
        Ok(())
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        match self.state() {
            ClientState::Uninitialized => self.close_unstarted("dropped"),
            ClientState::Closed => {}
            _ => {
                // The dispatcher task finishes the close
                self.shared.begin_draining(CancelReason::Shutdown);
                self.shared.stop.notify_one();
            }
        }
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .field("url", &self.shared.config.endpoint.url)
            .finish()
    }
}

/// Failure for a call whose result slot closed without a value
fn withdrawn_error(correlator: &Correlator, id: CorrelationId, method: &str) -> RpcError {
    match correlator.close_reason() {
        Some(reason) => RpcError::Cancelled(reason),
        None => RpcError::Withdrawn {
            id,
            method: method.to_string(),
        },
    }
}

/// Withdraws a pending call unless disarmed
struct AbandonGuard<'a> {
    correlator: &'a Correlator,
    id: CorrelationId,
    armed: bool,
}

impl<'a> AbandonGuard<'a> {
    fn new(correlator: &'a Correlator, id: CorrelationId) -> Self {
        Self {
            correlator,
            id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.correlator.abandon(&self.id);
        }
    }
}
