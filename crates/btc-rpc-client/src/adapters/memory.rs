//! In-process transport for tests and embedding.
//!
//! [`InMemoryTransport::pair`] returns the client half and a [`RemoteNode`]
//! that plays the node: it reads the requests the client sent and pushes
//! replies, notifications, garbage or a disconnect back.

use crate::domain::correlation::CorrelationId;
use crate::domain::error::{RemoteError, TransportError};
use crate::ports::Transport;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

type Frame = Result<Vec<u8>, TransportError>;

/// What `connect` does
#[derive(Debug, Clone, Default)]
pub enum ConnectBehavior {
    #[default]
    Succeed,
    Fail(TransportError),
    /// Never completes; exercises connect timeouts
    Hang,
}

#[derive(Debug, Default)]
struct Shared {
    connects: AtomicUsize,
    sends: AtomicUsize,
}

/// Client half of an in-memory connection
pub struct InMemoryTransport {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbound: Mutex<mpsc::UnboundedReceiver<Frame>>,
    connected: AtomicBool,
    closed: watch::Sender<bool>,
    on_connect: ConnectBehavior,
    shared: Arc<Shared>,
}

impl InMemoryTransport {
    /// Connected pair of transport and scripted node
    pub fn pair() -> (InMemoryTransport, RemoteNode) {
        Self::pair_with(ConnectBehavior::Succeed)
    }

    pub fn pair_with(on_connect: ConnectBehavior) -> (InMemoryTransport, RemoteNode) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        let shared = Arc::new(Shared::default());

        let transport = InMemoryTransport {
            outbound: out_tx,
            inbound: Mutex::new(in_rx),
            connected: AtomicBool::new(false),
            closed,
            on_connect,
            shared: Arc::clone(&shared),
        };
        let node = RemoteNode {
            requests: out_rx,
            inbound: Some(in_tx),
            shared,
        };
        (transport, node)
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        match &self.on_connect {
            ConnectBehavior::Succeed => {
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
            ConnectBehavior::Fail(e) => Err(e.clone()),
            ConnectBehavior::Hang => std::future::pending().await,
        }
    }

    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.shared.sends.fetch_add(1, Ordering::SeqCst);
        self.outbound
            .send(payload)
            .map_err(|_| TransportError::Closed)
    }

    async fn receive(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut closed = self.closed.subscribe();
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => Ok(None),
            frame = inbound.recv() => frame.transpose(),
        }
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.closed.send_replace(true);
    }
}

/// Scripted node on the far side of an [`InMemoryTransport`]
pub struct RemoteNode {
    requests: mpsc::UnboundedReceiver<Vec<u8>>,
    inbound: Option<mpsc::UnboundedSender<Frame>>,
    shared: Arc<Shared>,
}

impl RemoteNode {
    /// Next request the client sent, parsed as JSON.
    ///
    /// `None` once the client side is gone.
    pub async fn next_request(&mut self) -> Option<Value> {
        let bytes = self.requests.recv().await?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Push raw bytes to the client
    pub fn send_raw(&self, bytes: Vec<u8>) {
        if let Some(inbound) = &self.inbound {
            let _ = inbound.send(Ok(bytes));
        }
    }

    /// Successful reply for `id`
    pub fn reply(&self, id: CorrelationId, result: Value) {
        self.send_json(json!({"result": result, "error": null, "id": id}));
    }

    /// Error reply for `id`
    pub fn reply_error(&self, id: CorrelationId, error: RemoteError) {
        self.send_json(json!({"result": null, "error": error, "id": id}));
    }

    /// Unsolicited notification, btcd style
    pub fn notify(&self, method: &str, params: Value) {
        self.send_json(json!({"jsonrpc": "1.0", "method": method, "params": params, "id": null}));
    }

    /// Make the client's next `receive` fail with `error`
    pub fn fail(&self, error: TransportError) {
        if let Some(inbound) = &self.inbound {
            let _ = inbound.send(Err(error));
        }
    }

    /// Hang up; the client observes a clean end of stream
    pub fn disconnect(&mut self) {
        self.inbound = None;
    }

    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn send_count(&self) -> usize {
        self.shared.sends.load(Ordering::SeqCst)
    }

    /// Answer every request with `handler` until the client goes away
    pub fn serve<F>(mut self, handler: F) -> JoinHandle<()>
    where
        F: Fn(&str, &[Value]) -> Result<Value, RemoteError> + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(request) = self.next_request().await {
                let Some(id) = request["id"].as_u64().map(CorrelationId::from_raw) else {
                    continue;
                };
                let method = request["method"].as_str().unwrap_or_default();
                let params = request["params"].as_array().cloned().unwrap_or_default();
                match handler(method, &params) {
                    Ok(result) => self.reply(id, result),
                    Err(error) => self.reply_error(id, error),
                }
            }
        })
    }

    fn send_json(&self, value: Value) {
        self.send_raw(value.to_string().into_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_before_connect() {
        let (transport, _node) = InMemoryTransport::pair();
        assert_eq!(
            transport.send(b"{}".to_vec()).await,
            Err(TransportError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_round_trip_through_node() {
        let (transport, mut node) = InMemoryTransport::pair();
        transport.connect().await.unwrap();
        transport
            .send(br#"{"id":1,"method":"getblockcount","params":[]}"#.to_vec())
            .await
            .unwrap();

        let request = node.next_request().await.unwrap();
        assert_eq!(request["method"], "getblockcount");

        node.reply(CorrelationId::from_raw(1), json!(42));
        let bytes = transport.receive().await.unwrap().unwrap();
        let reply: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(reply["result"], 42);
        assert_eq!(node.connect_count(), 1);
        assert_eq!(node.send_count(), 1);
    }

    #[tokio::test]
    async fn test_close_ends_receive() {
        let (transport, _node) = InMemoryTransport::pair();
        transport.connect().await.unwrap();
        transport.close().await;

        assert_eq!(transport.receive().await, Ok(None));
        assert_eq!(
            transport.send(b"{}".to_vec()).await,
            Err(TransportError::Closed)
        );
    }

    #[tokio::test]
    async fn test_disconnect_and_injected_failure() {
        let (transport, mut node) = InMemoryTransport::pair();
        transport.connect().await.unwrap();

        node.fail(TransportError::Receive("reset by peer".into()));
        assert_eq!(
            transport.receive().await,
            Err(TransportError::Receive("reset by peer".into()))
        );

        node.disconnect();
        assert_eq!(transport.receive().await, Ok(None));
    }

    #[tokio::test]
    async fn test_failing_connect() {
        let (transport, node) =
            InMemoryTransport::pair_with(ConnectBehavior::Fail(TransportError::Connect(
                "connection refused".into(),
            )));
        assert!(matches!(
            transport.connect().await,
            Err(TransportError::Connect(_))
        ));
        assert_eq!(node.connect_count(), 1);
    }
}
