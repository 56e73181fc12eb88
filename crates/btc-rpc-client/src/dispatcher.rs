//! Dispatcher Loop - the single reader of a client's transport.
//!
//! Decodes each inbound payload and routes it: correlated responses to the
//! [`Correlator`], id-less messages to the registered notification sink.
//! Malformed payloads are counted and dropped; only transport closure or a
//! stop request ends the loop.

use crate::correlator::{Correlator, Resolution};
use crate::domain::envelope::{decode_inbound, InboundMessage, Notification};
use crate::domain::error::{RpcError, TransportError};
use crate::ports::{NotificationSink, Transport};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, warn};

/// Slot holding the optional notification sink, shared with the facade
pub type SinkSlot = Arc<RwLock<Option<Arc<dyn NotificationSink>>>>;

/// Why the loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitCause {
    /// Transport reported a clean end of stream
    TransportClosed,
    /// Transport failed while receiving
    TransportFailed(TransportError),
    /// Owner asked the loop to stop
    StopRequested,
}

/// Counters kept by the dispatcher
#[derive(Debug, Default)]
pub struct DispatchCounters {
    pub messages: AtomicU64,
    pub protocol_violations: AtomicU64,
    pub notifications_delivered: AtomicU64,
    pub notifications_discarded: AtomicU64,
}

/// Stale-call sweep settings
#[derive(Debug, Clone, Copy)]
pub struct SweepConfig {
    pub max_age: Duration,
    pub interval: Duration,
}

pub struct Dispatcher {
    correlator: Arc<Correlator>,
    transport: Arc<dyn Transport>,
    sink: SinkSlot,
    counters: Arc<DispatchCounters>,
    stop: Arc<Notify>,
    sweep: Option<SweepConfig>,
}

impl Dispatcher {
    pub fn new(
        correlator: Arc<Correlator>,
        transport: Arc<dyn Transport>,
        sink: SinkSlot,
        counters: Arc<DispatchCounters>,
        stop: Arc<Notify>,
    ) -> Self {
        Self {
            correlator,
            transport,
            sink,
            counters,
            stop,
            sweep: None,
        }
    }

    /// Periodically expire pending calls older than `config.max_age`
    pub fn with_sweep(mut self, config: SweepConfig) -> Self {
        self.sweep = Some(config);
        self
    }

    /// Run until the transport closes or a stop is requested.
    ///
    /// The caller owns what happens next (draining the correlator and
    /// moving the lifecycle on); the returned cause says why the loop ended.
    pub async fn run(self) -> ExitCause {
        let mut sweep = self.sweep.map(|config| {
            let mut interval = tokio::time::interval(config.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            (interval, config.max_age)
        });

        loop {
            tokio::select! {
                biased;
                _ = self.stop.notified() => {
                    debug!("Dispatcher stop requested");
                    return ExitCause::StopRequested;
                }
                received = self.transport.receive() => match received {
                    Ok(Some(bytes)) => {
                        if let Err(anomaly) = self.dispatch(&bytes) {
                            debug!(error = %anomaly, "Inbound message dropped");
                        }
                    }
                    Ok(None) => {
                        warn!("Transport closed, stopping dispatcher");
                        return ExitCause::TransportClosed;
                    }
                    Err(e) => {
                        warn!(error = %e, "Transport receive failed, stopping dispatcher");
                        return ExitCause::TransportFailed(e);
                    }
                },
                max_age = next_sweep(&mut sweep) => {
                    let removed = self.correlator.expire_stale(max_age);
                    if removed > 0 {
                        debug!(removed, "Swept stale pending calls");
                    }
                }
            }
        }
    }

    /// Route one inbound payload.
    ///
    /// Payloads that reach no caller come back as
    /// [`RpcError::ProtocolViolation`] or [`RpcError::UnmatchedResponse`];
    /// both are absorbed here and never stop the loop.
    fn dispatch(&self, bytes: &[u8]) -> Result<(), RpcError> {
        self.counters.messages.fetch_add(1, Ordering::Relaxed);

        match decode_inbound(bytes) {
            Ok(InboundMessage::Response(response)) => {
                match self.correlator.resolve(response.id, response.outcome) {
                    Resolution::Unmatched => Err(RpcError::UnmatchedResponse(response.id)),
                    Resolution::Delivered | Resolution::CallerGone => Ok(()),
                }
            }
            Ok(InboundMessage::Notification(notification)) => {
                self.notify(notification);
                Ok(())
            }
            Err(e) => {
                self.counters
                    .protocol_violations
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    error = %e,
                    len = bytes.len(),
                    preview = %preview(bytes),
                    "Protocol violation, dropping inbound message"
                );
                Err(RpcError::ProtocolViolation(e.to_string()))
            }
        }
    }

    fn notify(&self, notification: Notification) {
        let sink = self.sink.read().clone();
        match sink {
            Some(sink) => {
                self.counters
                    .notifications_delivered
                    .fetch_add(1, Ordering::Relaxed);
                sink.deliver(notification);
            }
            None => {
                self.counters
                    .notifications_discarded
                    .fetch_add(1, Ordering::Relaxed);
                debug!(
                    method = notification.method.as_deref().unwrap_or("<none>"),
                    "No notification sink, discarding"
                );
            }
        }
    }
}

/// Resolves at the next sweep tick; never resolves when sweeping is off.
async fn next_sweep(sweep: &mut Option<(Interval, Duration)>) -> Duration {
    match sweep {
        Some((interval, max_age)) => {
            interval.tick().await;
            *max_age
        }
        None => std::future::pending().await,
    }
}

/// First bytes of a payload, lossily decoded, for log lines
fn preview(bytes: &[u8]) -> String {
    const MAX: usize = 64;
    let head = &bytes[..bytes.len().min(MAX)];
    String::from_utf8_lossy(head).into_owned()
}
