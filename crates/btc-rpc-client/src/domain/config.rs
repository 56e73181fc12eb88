//! Client configuration with validation.
//!
//! The client consumes a finished [`ClientConfig`]; loading it from files or
//! the environment is the host application's job.

use crate::domain::network::{validate_network, Network, NetworkParams, UnsupportedNetwork};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Main client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Which network the client is bound to
    pub network: NetworkConfig,
    /// Node endpoint
    pub endpoint: EndpointConfig,
    /// Credentials presented to the node
    pub auth: AuthConfig,
    /// Call and sweep timeouts
    pub timeouts: TimeoutConfig,
    /// Unsolicited notification delivery
    pub notifications: NotificationConfig,
    /// Ask the node for its chain at start-up and refuse a mismatch
    pub verify_remote_chain: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            endpoint: EndpointConfig::default(),
            auth: AuthConfig::None,
            timeouts: TimeoutConfig::default(),
            notifications: NotificationConfig::default(),
            verify_remote_chain: false,
        }
    }
}

impl ClientConfig {
    /// Config for `url` on `network` with everything else defaulted
    pub fn new(network: Network, url: impl Into<String>) -> Self {
        Self {
            network: NetworkConfig::for_network(network),
            endpoint: EndpointConfig {
                url: url.into(),
                ..EndpointConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.name.trim().is_empty() {
            return Err(ConfigError::Invalid("network name cannot be empty".into()));
        }

        self.endpoint.scheme()?;

        if self.endpoint.connect_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "connect_timeout cannot be 0".into(),
            ));
        }

        if self.timeouts.default_call.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "default call timeout cannot be 0".into(),
            ));
        }

        if self.timeouts.stale_after.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::InvalidTimeout("stale_after cannot be 0".into()));
        }

        if self.timeouts.stale_after.is_some() && self.timeouts.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "sweep_interval cannot be 0".into(),
            ));
        }

        match &self.auth {
            AuthConfig::Basic { username, .. } if username.is_empty() => {
                return Err(ConfigError::InvalidAuth("basic auth requires a username".into()));
            }
            AuthConfig::Token { token } if token.is_empty() => {
                return Err(ConfigError::InvalidAuth("token cannot be empty".into()));
            }
            _ => {}
        }

        if self.notifications.buffer == 0 {
            return Err(ConfigError::Invalid(
                "notification buffer cannot be 0".into(),
            ));
        }

        Ok(())
    }
}

/// Network selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Network name (`mainnet`, `testnet3`, `regtest`, `signet`, `simnet`)
    pub name: String,
    /// Optional magic override; must agree with `name`
    pub magic: Option<u32>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::for_network(Network::Regtest)
    }
}

impl NetworkConfig {
    pub fn for_network(network: Network) -> Self {
        Self {
            name: network.as_str().to_string(),
            magic: None,
        }
    }

    /// Run the identity guard over this selection.
    ///
    /// The magic override, when present, is the requested value and the
    /// configured name acts as the guard's override.
    pub fn resolve(&self) -> Result<NetworkParams, UnsupportedNetwork> {
        let named = Network::from_name(&self.name);
        match (self.magic, named) {
            (None, Some(network)) => validate_network(&network.params(), None),
            (Some(magic), named) => {
                let requested = Network::from_magic(magic)
                    .map(Network::params)
                    .unwrap_or_else(|| NetworkParams {
                        name: self.name.clone(),
                        magic,
                        ..Network::Mainnet.params()
                    });
                let override_ = match named {
                    Some(network) => Some(network),
                    None => {
                        return Err(UnsupportedNetwork::new(format!(
                            "unknown network name '{}'",
                            self.name
                        )))
                    }
                };
                validate_network(&requested, override_)
            }
            (None, None) => Err(UnsupportedNetwork::new(format!(
                "unknown network name '{}'",
                self.name
            ))),
        }
    }
}

/// Node endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// `ws://`, `wss://`, `http://` or `https://` URL of the node
    pub url: String,
    /// Connection / handshake timeout
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:18443".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Transport family selected by the endpoint URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointScheme {
    WebSocket,
    Http,
}

impl EndpointConfig {
    /// Classify the URL, failing on anything unusable
    pub fn scheme(&self) -> Result<EndpointScheme, ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::InvalidEndpoint("url cannot be empty".into()));
        }
        let url = reqwest::Url::parse(&self.url)
            .map_err(|e| ConfigError::InvalidEndpoint(format!("{}: {e}", self.url)))?;
        match url.scheme() {
            "ws" | "wss" => Ok(EndpointScheme::WebSocket),
            "http" | "https" => Ok(EndpointScheme::Http),
            other => Err(ConfigError::InvalidEndpoint(format!(
                "unsupported scheme '{other}'"
            ))),
        }
    }
}

/// Credentials presented to the node
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthConfig {
    #[default]
    None,
    /// HTTP basic auth (bitcoind `rpcuser` / `rpcpassword`)
    Basic { username: String, password: String },
    /// Bearer token
    Token { token: String },
}

impl AuthConfig {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        AuthConfig::Basic {
            username: username.into(),
            password: password.into(),
        }
    }
}

// Secrets never reach logs
impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthConfig::None => f.write_str("None"),
            AuthConfig::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            AuthConfig::Token { .. } => f
                .debug_struct("Token")
                .field("token", &"<redacted>")
                .finish(),
        }
    }
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline applied by `call_default`
    #[serde(with = "duration_serde")]
    pub default_call: Duration,
    /// Pending calls older than this are expired by the sweeper
    #[serde(with = "duration_serde::option")]
    pub stale_after: Option<Duration>,
    /// How often the sweeper runs
    #[serde(with = "duration_serde")]
    pub sweep_interval: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_call: Duration::from_secs(30),
            stale_after: None,
            sweep_interval: Duration::from_secs(5),
        }
    }
}

/// Notification delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Capacity of the channel returned by `RpcClient::notifications`
    pub buffer: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { buffer: 256 }
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Endpoint URL missing or unusable
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// Credentials incomplete
    #[error("invalid auth: {0}")]
    InvalidAuth(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Duration fields as `"1500ms"`, `"30s"`, `"2m"` or bare seconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    const UNITS: [(&str, u64); 3] = [("ms", 1), ("s", 1_000), ("m", 60_000)];

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let text = match duration.subsec_millis() {
            0 => format!("{}s", duration.as_secs()),
            _ => format!("{}ms", duration.as_millis()),
        };
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        parse_duration(&text).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(text: &str) -> Result<Duration, String> {
        let text = text.trim();
        let split = text
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(text.len());
        let (digits, unit) = text.split_at(split);

        let value: u64 = digits
            .parse()
            .map_err(|_| format!("invalid duration '{text}'"))?;
        let unit = unit.trim();
        if unit.is_empty() {
            return Ok(Duration::from_secs(value));
        }

        UNITS
            .iter()
            .find(|(suffix, _)| *suffix == unit)
            .and_then(|(_, millis)| value.checked_mul(*millis))
            .map(Duration::from_millis)
            .ok_or_else(|| format!("invalid duration '{text}'"))
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|s| super::parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.network.name, "regtest");
        assert_eq!(config.endpoint.scheme().unwrap(), EndpointScheme::Http);
    }

    #[test]
    fn test_scheme_selection() {
        let config = ClientConfig::new(Network::Testnet3, "wss://node.example.invalid/ws");
        assert_eq!(config.endpoint.scheme().unwrap(), EndpointScheme::WebSocket);

        let config = ClientConfig::new(Network::Testnet3, "ftp://node.example.invalid");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidEndpoint(_))
        ));

        let config = ClientConfig::new(Network::Testnet3, "");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_timeout_validation() {
        let mut config = ClientConfig::default();
        config.timeouts.default_call = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimeout(_))
        ));

        let mut config = ClientConfig::default();
        config.timeouts.stale_after = Some(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimeout(_))
        ));
    }

    #[test]
    fn test_auth_validation() {
        let mut config = ClientConfig::default();
        config.auth = AuthConfig::basic("", "pwd");
        assert!(matches!(config.validate(), Err(ConfigError::InvalidAuth(_))));

        config.auth = AuthConfig::basic("user1", "pwd");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_auth_debug_redacts_secrets() {
        let auth = AuthConfig::basic("user1", "hunter2");
        let rendered = format!("{auth:?}");
        assert!(rendered.contains("user1"));
        assert!(!rendered.contains("hunter2"));

        let token = AuthConfig::Token {
            token: "s3cr3t".into(),
        };
        assert!(!format!("{token:?}").contains("s3cr3t"));
    }

    #[test]
    fn test_network_resolution() {
        let config = NetworkConfig::for_network(Network::Testnet3);
        assert_eq!(config.resolve().unwrap(), Network::Testnet3.params());

        let config = NetworkConfig {
            name: "testnet".into(),
            magic: Some(0x0709_110b),
        };
        assert_eq!(config.resolve().unwrap().network(), Some(Network::Testnet3));

        // name and magic disagree
        let config = NetworkConfig {
            name: "mainnet".into(),
            magic: Some(0x0709_110b),
        };
        assert!(config.resolve().is_err());

        let config = NetworkConfig {
            name: "dogecoin".into(),
            magic: None,
        };
        assert!(config.resolve().is_err());
    }

    #[test]
    fn test_deserialize_from_json() {
        let json = r#"{
            "network": { "name": "testnet3" },
            "endpoint": { "url": "ws://127.0.0.1:18334/ws", "connect_timeout": "5s" },
            "auth": { "type": "basic", "username": "user1", "password": "pwd" },
            "timeouts": { "default_call": "1500ms", "stale_after": "2m" }
        }"#;
        let config: ClientConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.endpoint.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.timeouts.default_call, Duration::from_millis(1500));
        assert_eq!(config.timeouts.stale_after, Some(Duration::from_secs(120)));
        assert!(matches!(config.auth, AuthConfig::Basic { .. }));
        assert_eq!(config.notifications.buffer, 256);
    }

    #[test]
    fn test_parse_duration_formats() {
        use super::duration_serde::parse_duration;
        assert_eq!(parse_duration("30"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("3m"), Ok(Duration::from_secs(180)));
        assert_eq!(parse_duration(" 5 s "), Ok(Duration::from_secs(5)));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("10h").is_err());
    }
}
