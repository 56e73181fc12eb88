//! Correlation ID for request tracking.
//!
//! Ids are allocated from a per-client monotonic counter and echoed by the
//! node in the `id` field of its reply.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Correlation ID tagging one outstanding call.
///
/// Plain `u64` on the wire so that bitcoind and btcd echo it untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(u64);

impl CorrelationId {
    /// Wrap a raw id (used when decoding inbound envelopes)
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CorrelationId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<CorrelationId> for u64 {
    fn from(id: CorrelationId) -> Self {
        id.0
    }
}

/// Monotonic id source scoped to one client instance.
///
/// Never wraps: once `u64::MAX` has been handed out, [`IdAllocator::next`]
/// returns `None` for the rest of the allocator's life.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// Allocator whose first id is 1
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Allocator whose first id is `first`
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Allocate a fresh id, or `None` once the id space is exhausted.
    pub fn next(&self) -> Option<CorrelationId> {
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                // u64::MAX is the "exhausted" sentinel and is never handed out
                (n != u64::MAX).then(|| n + 1)
            })
            .ok()
            .map(CorrelationId)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_ids_are_monotonic() {
        let alloc = IdAllocator::new();
        let a = alloc.next().unwrap();
        let b = alloc.next().unwrap();
        assert_eq!(a.as_u64(), 1);
        assert!(b > a);
    }

    #[test]
    fn test_correlation_id_serialization() {
        let id = CorrelationId::from_raw(42);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "42");
        let parsed: CorrelationId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_exhaustion_is_sticky() {
        let alloc = IdAllocator::starting_at(u64::MAX - 1);
        assert_eq!(alloc.next().map(|id| id.as_u64()), Some(u64::MAX - 1));
        assert!(alloc.next().is_none());
        assert!(alloc.next().is_none());
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let alloc = Arc::new(IdAllocator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let alloc = Arc::clone(&alloc);
                std::thread::spawn(move || {
                    (0..500).map(|_| alloc.next().unwrap()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 8 * 500);
    }
}
