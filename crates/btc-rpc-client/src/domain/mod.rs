//! Domain types for the RPC client.
//!
//! Pure data and validation: no I/O, no async.

pub mod config;
pub mod correlation;
pub mod envelope;
pub mod error;
pub mod network;
pub mod state;

// Re-exports for convenience
pub use config::{AuthConfig, ClientConfig, ConfigError, EndpointScheme, NetworkConfig};
pub use correlation::{CorrelationId, IdAllocator};
pub use envelope::{decode_inbound, DecodeError, InboundMessage, Notification, RequestEnvelope};
pub use error::{CancelReason, RemoteError, RpcError, RpcResult, TransportError};
pub use network::{validate_network, Network, NetworkParams, UnsupportedNetwork};
pub use state::ClientState;
