#![allow(missing_docs)]

//! BTC RPC Client - correlating JSON-RPC client for Bitcoin nodes.
//!
//! Many callers share one connection to a bitcoind or btcd node. Each call
//! gets a correlation id; replies are matched back to their caller no
//! matter the order they arrive in, and id-less messages are routed to a
//! notification sink.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          RpcClient (facade)                       │
//! │   start / call / invoke / shutdown        Lifecycle state machine │
//! ├──────────────────────────────────────────────────────────────────┤
//! │   caller A ──┐                                                    │
//! │   caller B ──┼─▶ Correlator ──register──▶ envelope ──send──┐     │
//! │   caller C ──┘      ▲  (id → oneshot)                       │     │
//! │                     │ resolve                               ▼     │
//! │              Dispatcher Loop ◀────────receive──────── Transport   │
//! │                     │                           (ws / http / mem) │
//! │                     └──▶ NotificationSink (id-less messages)      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Network Identity
//!
//! A client is bound to one network (mainnet, testnet3, regtest, signet,
//! simnet). `start` refuses parameters that are not a catalogued variant
//! before any connection is attempted.
//!
//! # Usage
//!
//! ```ignore
//! use btc_rpc_client::{AuthConfig, ClientConfig, Network, RpcClient};
//! use btc_rpc_client::methods::GetBlockCount;
//!
//! let mut config = ClientConfig::new(Network::Testnet3, "ws://127.0.0.1:18334/ws");
//! config.auth = AuthConfig::basic("rpcuser", "rpcpass");
//!
//! let client = RpcClient::from_config(config)?;
//! client.start().await?;
//! let height = client.invoke(&GetBlockCount).await?;
//! client.shutdown().await;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod client;
pub mod correlator;
pub mod dispatcher;
pub mod domain;
pub mod lifecycle;
pub mod methods;
pub mod ports;

pub use adapters::{transport_from_config, HttpTransport, InMemoryTransport, RemoteNode, WsTransport};
pub use client::{CallContext, ClientStats, RpcClient};
pub use correlator::{Correlator, CorrelatorStats};
pub use domain::{
    AuthConfig, CancelReason, ClientConfig, ClientState, ConfigError, CorrelationId, Network,
    NetworkParams, Notification, RemoteError, RpcError, RpcResult, TransportError,
    UnsupportedNetwork,
};
pub use lifecycle::StateChange;
pub use methods::RpcMethod;
pub use ports::{NotificationSink, Transport, TransportKind};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
