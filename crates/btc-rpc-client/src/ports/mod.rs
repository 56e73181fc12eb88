//! # Ports
//!
//! Capabilities the client consumes ([`Transport`]) and exposes
//! ([`NotificationSink`]). The correlator and dispatcher are written once
//! against these traits.

pub mod notifications;
pub mod transport;

pub use notifications::NotificationSink;
pub use transport::{Transport, TransportKind};
