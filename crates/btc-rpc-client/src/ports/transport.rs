//! Bidirectional message transport consumed by the client.

use crate::domain::error::TransportError;
use async_trait::async_trait;

/// How a transport delivers replies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Independent inbound stream (WebSocket); replies may arrive in any
    /// order and interleave with notifications
    Streaming,
    /// One reply per send (HTTP POST); replies are queued by the transport
    /// and surface through [`Transport::receive`] in send order
    RequestResponse,
}

/// Message-oriented connection to a node.
///
/// # Thread Safety
///
/// `send` may be called concurrently from many callers. `receive` is only
/// ever called by the single dispatcher task of the owning client.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection and authenticate. Called once, during start-up.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Send one outbound payload.
    ///
    /// Fails with [`TransportError::NotConnected`] or
    /// [`TransportError::Closed`] when the connection is down.
    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Wait for the next inbound payload.
    ///
    /// `Ok(None)` signals a clean end of stream.
    async fn receive(&self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Close the connection; pending and future `receive` calls observe the
    /// end of stream.
    async fn close(&self);

    fn kind(&self) -> TransportKind {
        TransportKind::Streaming
    }
}
