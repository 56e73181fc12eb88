//! # BTC Telemetry
//!
//! Structured logging bootstrap for BTC-Connect processes and tests, built
//! on `tracing-subscriber`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use btc_telemetry::{init_tracing, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env()?;
//! let _guard = init_tracing(&config)?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BTC_LOG_LEVEL` | `info` | Filter directives (falls back to `RUST_LOG`) |
//! | `BTC_LOG_FORMAT` | `pretty` | `pretty`, `json` or `off` |
//! | `BTC_SERVICE_NAME` | `btc-connect` | Service name on the startup line |
//! | `BTC_NETWORK` | `regtest` | Network name on the startup line |

mod config;
mod tracing_setup;

pub use config::{LogFormat, TelemetryConfig};
pub use tracing_setup::{init_test_tracing, init_tracing, TracingGuard};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("global subscriber already initialized: {0}")]
    AlreadyInitialized(String),

    #[error("invalid telemetry configuration: {0}")]
    Config(String),
}
