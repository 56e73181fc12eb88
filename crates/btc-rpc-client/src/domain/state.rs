//! Client lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an [`RpcClient`](crate::RpcClient).
///
/// ```text
/// Uninitialized ──start──▶ Connecting ──handshake ok──▶ Ready
///       │                      │                          │
///       │ guard fails          │ connect fails            │ transport lost / shutdown
///       ▼                      ▼                          ▼
///     Closed ◀──────────────Draining ◀────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClientState {
    Uninitialized,
    Connecting,
    Ready,
    Draining,
    Closed,
}

impl ClientState {
    /// Whether the state machine permits `self -> next`.
    pub fn can_transition_to(self, next: ClientState) -> bool {
        use ClientState::*;
        matches!(
            (self, next),
            (Uninitialized, Connecting)
                | (Uninitialized, Closed)
                | (Connecting, Ready)
                | (Connecting, Draining)
                | (Ready, Draining)
                | (Draining, Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ClientState::Closed
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClientState::Uninitialized => "uninitialized",
            ClientState::Connecting => "connecting",
            ClientState::Ready => "ready",
            ClientState::Draining => "draining",
            ClientState::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ClientState::*;

    #[test]
    fn test_happy_path_transitions() {
        assert!(Uninitialized.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Draining));
        assert!(Draining.can_transition_to(Closed));
    }

    #[test]
    fn test_guard_failure_skips_connecting() {
        assert!(Uninitialized.can_transition_to(Closed));
    }

    #[test]
    fn test_closed_is_terminal() {
        for next in [Uninitialized, Connecting, Ready, Draining, Closed] {
            assert!(!Closed.can_transition_to(next));
        }
        assert!(Closed.is_terminal());
    }

    #[test]
    fn test_no_restart_from_draining() {
        assert!(!Draining.can_transition_to(Ready));
        assert!(!Draining.can_transition_to(Connecting));
    }
}
