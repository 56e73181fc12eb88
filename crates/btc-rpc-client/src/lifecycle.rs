//! Lifecycle state holder.
//!
//! Transitions are compare-and-set against [`ClientState::can_transition_to`].
//! Each one is published twice: the latest state on a `watch` channel, and
//! a [`StateChange`] event on a broadcast channel, in transition order.

use crate::domain::state::ClientState;
use tokio::sync::{broadcast, watch};
use tracing::info;

/// Buffered events per subscriber; a full lifecycle is four transitions
const EVENT_CAPACITY: usize = 16;

/// One observed transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub from: ClientState,
    pub to: ClientState,
    pub cause: String,
}

pub struct Lifecycle {
    state: watch::Sender<ClientState>,
    events: broadcast::Sender<StateChange>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ClientState::Uninitialized);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { state, events }
    }

    pub fn current(&self) -> ClientState {
        *self.state.borrow()
    }

    /// Receiver that observes every subsequent transition
    pub fn subscribe(&self) -> watch::Receiver<ClientState> {
        self.state.subscribe()
    }

    /// Receiver for every subsequent [`StateChange`]
    pub fn events(&self) -> broadcast::Receiver<StateChange> {
        self.events.subscribe()
    }

    /// Move to `next` if the state machine allows it from the current state.
    ///
    /// Returns the previous state on success, or the current state when the
    /// transition is not permitted. Exactly one of several racing callers
    /// wins a given transition.
    pub fn transition(&self, next: ClientState, cause: &str) -> Result<ClientState, ClientState> {
        let mut outcome = Err(ClientState::Uninitialized);
        self.state.send_if_modified(|state| {
            if state.can_transition_to(next) {
                outcome = Ok(*state);
                // Published under the state lock to keep events ordered
                let _ = self.events.send(StateChange {
                    from: *state,
                    to: next,
                    cause: cause.to_string(),
                });
                *state = next;
                true
            } else {
                outcome = Err(*state);
                false
            }
        });

        if let Ok(previous) = outcome {
            info!(from = %previous, to = %next, cause, "Client state transition");
        }
        outcome
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_initial_state() {
        assert_eq!(Lifecycle::new().current(), ClientState::Uninitialized);
    }

    #[test]
    fn test_illegal_transition_reports_current() {
        let lifecycle = Lifecycle::new();
        assert_eq!(
            lifecycle.transition(ClientState::Ready, "test"),
            Err(ClientState::Uninitialized)
        );
        assert_eq!(lifecycle.current(), ClientState::Uninitialized);
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let lifecycle = Lifecycle::new();
        let mut rx = lifecycle.subscribe();

        lifecycle.transition(ClientState::Connecting, "start").unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ClientState::Connecting);
    }

    #[test]
    fn test_events_record_cause_in_order() {
        let lifecycle = Lifecycle::new();
        let mut events = lifecycle.events();

        lifecycle.transition(ClientState::Connecting, "start").unwrap();
        lifecycle.transition(ClientState::Draining, "connect failed").unwrap();
        lifecycle.transition(ClientState::Closed, "dispatcher exited").unwrap();
        assert!(lifecycle.transition(ClientState::Ready, "late").is_err());

        let seen: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert_eq!(
            seen.iter().map(|e| e.to).collect::<Vec<_>>(),
            vec![ClientState::Connecting, ClientState::Draining, ClientState::Closed]
        );
        assert_eq!(seen[1].from, ClientState::Connecting);
        assert_eq!(seen[1].cause, "connect failed");
    }

    #[test]
    fn test_exactly_one_racer_wins() {
        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle.transition(ClientState::Connecting, "start").unwrap();
        lifecycle.transition(ClientState::Ready, "connected").unwrap();

        let winners: usize = (0..8)
            .map(|_| {
                let lifecycle = Arc::clone(&lifecycle);
                std::thread::spawn(move || {
                    lifecycle.transition(ClientState::Draining, "race").is_ok() as usize
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .sum();

        assert_eq!(winners, 1);
        assert_eq!(lifecycle.current(), ClientState::Draining);
    }
}
