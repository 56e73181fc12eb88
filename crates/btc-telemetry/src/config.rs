//! Telemetry configuration from environment variables.

use crate::TelemetryError;
use std::env;
use std::fmt;
use std::str::FromStr;

/// How log lines are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, ANSI coloured
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
    /// No output layer; spans and events are still filtered
    Off,
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "off" | "none" => Ok(LogFormat::Off),
            other => Err(TelemetryError::Config(format!("unknown log format '{other}'"))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
            LogFormat::Off => "off",
        })
    }
}

/// Configuration for log output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name attached to the startup line
    pub service_name: String,

    /// `EnvFilter` directives, e.g. `info` or `btc_rpc_client=debug,warn`
    pub filter: String,

    pub format: LogFormat,

    /// Network the process is bound to, for the startup line
    pub network: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "btc-connect".to_string(),
            filter: "info".to_string(),
            format: LogFormat::Pretty,
            network: "regtest".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `BTC_SERVICE_NAME`: Service name (default: btc-connect)
    /// - `BTC_LOG_LEVEL` or `RUST_LOG`: Filter directives (default: info)
    /// - `BTC_LOG_FORMAT`: `pretty`, `json` or `off` (default: json inside a
    ///   container, pretty otherwise)
    /// - `BTC_NETWORK`: Network name (default: regtest)
    pub fn from_env() -> Result<Self, TelemetryError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env), reading variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TelemetryError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let in_container =
            lookup("KUBERNETES_SERVICE_HOST").is_some() || lookup("DOCKER_CONTAINER").is_some();

        let format = match lookup("BTC_LOG_FORMAT") {
            Some(raw) => raw.parse()?,
            None if in_container => LogFormat::Json,
            None => LogFormat::Pretty,
        };

        Ok(Self {
            service_name: lookup("BTC_SERVICE_NAME").unwrap_or(defaults.service_name),
            filter: lookup("BTC_LOG_LEVEL")
                .or_else(|| lookup("RUST_LOG"))
                .unwrap_or(defaults.filter),
            format,
            network: lookup("BTC_NETWORK").unwrap_or(defaults.network),
        })
    }

    /// Configuration suited to test binaries: debug level, plain output.
    pub fn for_tests() -> Self {
        Self {
            filter: "debug".to_string(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_in(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_variables() {
        let config = TelemetryConfig::from_lookup(lookup_in(&[])).unwrap();
        assert_eq!(config, TelemetryConfig::default());
    }

    #[test]
    fn test_variables_override_defaults() {
        let config = TelemetryConfig::from_lookup(lookup_in(&[
            ("BTC_SERVICE_NAME", "wallet-sync"),
            ("RUST_LOG", "warn"),
            ("BTC_LOG_FORMAT", "JSON"),
            ("BTC_NETWORK", "testnet3"),
        ]))
        .unwrap();
        assert_eq!(config.service_name, "wallet-sync");
        assert_eq!(config.filter, "warn");
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.network, "testnet3");
    }

    #[test]
    fn test_btc_log_level_wins_over_rust_log() {
        let config = TelemetryConfig::from_lookup(lookup_in(&[
            ("BTC_LOG_LEVEL", "btc_rpc_client=trace"),
            ("RUST_LOG", "warn"),
        ]))
        .unwrap();
        assert_eq!(config.filter, "btc_rpc_client=trace");
    }

    #[test]
    fn test_container_defaults_to_json() {
        let config =
            TelemetryConfig::from_lookup(lookup_in(&[("KUBERNETES_SERVICE_HOST", "10.0.0.1")]))
                .unwrap();
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        let result = TelemetryConfig::from_lookup(lookup_in(&[("BTC_LOG_FORMAT", "xml")]));
        assert!(matches!(result, Err(TelemetryError::Config(_))));
    }
}
