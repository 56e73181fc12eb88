//! Client error taxonomy.
//!
//! Node-side failures keep the JSON-RPC code the node sent; everything the
//! client itself detects is an [`RpcError`] variant.

use crate::domain::config::ConfigError;
use crate::domain::correlation::CorrelationId;
use crate::domain::network::UnsupportedNetwork;
use crate::domain::state::ClientState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Error codes returned by bitcoind / btcd
pub mod codes {
    // JSON-RPC 2.0 standard errors (-32700 to -32600)
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    // General application errors
    pub const MISC_ERROR: i64 = -1;
    pub const TYPE_ERROR: i64 = -3;
    pub const INVALID_ADDRESS_OR_KEY: i64 = -5;
    pub const OUT_OF_MEMORY: i64 = -7;
    pub const INVALID_PARAMETER: i64 = -8;
    pub const DATABASE_ERROR: i64 = -20;
    pub const DESERIALIZATION_ERROR: i64 = -22;
    pub const VERIFY_ERROR: i64 = -25;
    pub const VERIFY_REJECTED: i64 = -26;
    pub const VERIFY_ALREADY_IN_CHAIN: i64 = -27;
    pub const IN_WARMUP: i64 = -28;
    pub const METHOD_DEPRECATED: i64 = -32;

    // P2P client errors
    pub const CLIENT_NOT_CONNECTED: i64 = -9;
    pub const CLIENT_IN_INITIAL_DOWNLOAD: i64 = -10;

    // Wallet errors
    pub const WALLET_ERROR: i64 = -4;
    pub const WALLET_INSUFFICIENT_FUNDS: i64 = -6;
    pub const WALLET_UNLOCK_NEEDED: i64 = -13;
    pub const WALLET_NOT_FOUND: i64 = -18;
}

/// Structured error returned by the node for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    /// JSON-RPC error code
    pub code: i64,
    /// Error message
    pub message: String,
    /// Optional additional data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RemoteError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Node is still loading its block index; the call may succeed later
    pub fn is_warming_up(&self) -> bool {
        self.code == codes::IN_WARMUP
    }

    pub fn is_method_not_found(&self) -> bool {
        self.code == codes::METHOD_NOT_FOUND
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for RemoteError {}

/// Transport-level failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport not connected")]
    NotConnected,
    #[error("connection closed")]
    Closed,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
}

impl TransportError {
    /// Whether the connection itself is gone.
    ///
    /// An HTTP status error fails one exchange; the endpoint is still usable.
    pub fn is_connection_loss(&self) -> bool {
        !matches!(self, TransportError::Http { .. })
    }
}

/// Why a batch of pending calls was failed by the client itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// The transport went away underneath the client
    TransportLost(TransportError),
    /// The owner asked the client to shut down
    Shutdown,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::TransportLost(e) => write!(f, "transport lost: {e}"),
            CancelReason::Shutdown => f.write_str("client shut down"),
        }
    }
}

/// Errors surfaced by the client
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    /// Network identity guard rejected the configured parameters
    #[error(transparent)]
    UnsupportedNetwork(#[from] UnsupportedNetwork),

    /// Sending on (or connecting) the transport failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Inbound bytes did not form a valid envelope
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Inbound response carried an id with no pending call
    #[error("no pending call for response id {0}")]
    UnmatchedResponse(CorrelationId),

    /// Deadline elapsed before the node answered
    #[error("call '{method}' timed out after {elapsed:?}")]
    Timeout { method: String, elapsed: Duration },

    /// Call attempted outside the `Ready` state
    #[error("client not ready (state: {0})")]
    NotReady(ClientState),

    /// Node answered with a structured error
    #[error("remote error: {0}")]
    Remote(RemoteError),

    /// Pending call failed by the client (transport loss or shutdown)
    #[error("call cancelled: {0}")]
    Cancelled(CancelReason),

    /// Node reports a different chain than the one configured
    #[error("network mismatch: configured {expected}, node reports {actual}")]
    NetworkMismatch { expected: String, actual: String },

    /// Params could not be encoded or a result could not be decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Pending call was removed without a result reaching its caller
    #[error("call '{method}' ({id}) was withdrawn without a result")]
    Withdrawn { id: CorrelationId, method: String },

    /// Correlation id space exhausted; the client instance is unusable
    #[error("correlation id space exhausted")]
    IdSpaceExhausted,
}

impl RpcError {
    /// True for failures caused by the transport, including calls cancelled
    /// because the transport went away.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            RpcError::Transport(_) | RpcError::Cancelled(CancelReason::TransportLost(_))
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout { .. })
    }

    /// The node's error, if this failure came from the node
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            RpcError::Remote(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RemoteError> for RpcError {
    fn from(e: RemoteError) -> Self {
        RpcError::Remote(e)
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        RpcError::Serialization(e.to_string())
    }
}

/// Result type for client operations
pub type RpcResult<T> = Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_deserialization() {
        let err: RemoteError =
            serde_json::from_str(r#"{"code":-28,"message":"Loading block index..."}"#).unwrap();
        assert!(err.is_warming_up());
        assert!(err.data.is_none());
        assert_eq!(err.to_string(), "[-28] Loading block index...");
    }

    #[test]
    fn test_remote_error_serialization_skips_empty_data() {
        let err = RemoteError::new(codes::METHOD_NOT_FOUND, "Method not found");
        let json = serde_json::to_string(&err).unwrap();
        assert!(!json.contains("data"));
        assert!(err.is_method_not_found());
    }

    #[test]
    fn test_transport_classification() {
        assert!(RpcError::Transport(TransportError::Closed).is_transport_failure());
        assert!(
            RpcError::Cancelled(CancelReason::TransportLost(TransportError::Closed))
                .is_transport_failure()
        );
        assert!(!RpcError::Cancelled(CancelReason::Shutdown).is_transport_failure());
        assert!(!RpcError::Remote(RemoteError::new(-1, "x")).is_transport_failure());
    }

    #[test]
    fn test_http_status_is_not_connection_loss() {
        assert!(TransportError::Closed.is_connection_loss());
        assert!(TransportError::Send("broken pipe".into()).is_connection_loss());
        assert!(!TransportError::Http {
            status: 503,
            body: "Work queue depth exceeded".into()
        }
        .is_connection_loss());
    }

    #[test]
    fn test_from_serde_error() {
        let json_err: Result<u64, _> = serde_json::from_str("\"not a number\"");
        let err: RpcError = json_err.unwrap_err().into();
        assert!(matches!(err, RpcError::Serialization(_)));
    }
}
