//! # Adapters
//!
//! [`Transport`] implementations: WebSocket, HTTP and in-memory.

pub mod http;
pub mod memory;
pub mod ws;

pub use http::HttpTransport;
pub use memory::{ConnectBehavior, InMemoryTransport, RemoteNode};
pub use ws::WsTransport;

use crate::domain::config::{AuthConfig, ClientConfig, ConfigError, EndpointScheme};
use crate::ports::Transport;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::Arc;

/// Build the transport the endpoint URL asks for
pub fn transport_from_config(config: &ClientConfig) -> Result<Arc<dyn Transport>, ConfigError> {
    let endpoint = &config.endpoint;
    let transport: Arc<dyn Transport> = match endpoint.scheme()? {
        EndpointScheme::WebSocket => Arc::new(WsTransport::new(&endpoint.url, config.auth.clone())),
        EndpointScheme::Http => Arc::new(HttpTransport::new(
            &endpoint.url,
            config.auth.clone(),
            endpoint.connect_timeout,
        )),
    };
    Ok(transport)
}

/// `Authorization` header value for `auth`, if any
pub fn auth_header_value(auth: &AuthConfig) -> Option<String> {
    match auth {
        AuthConfig::None => None,
        AuthConfig::Basic { username, password } => Some(format!(
            "Basic {}",
            STANDARD.encode(format!("{username}:{password}"))
        )),
        AuthConfig::Token { token } => Some(format!("Bearer {token}")),
    }
}
