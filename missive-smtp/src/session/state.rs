//! Session states and the events that move between them.
//!
//! Transitions are pure: [`State::transition`] performs no I/O, it only
//! records which state a finished transaction should fall back to. The
//! session drives it with one [`Event`] per completed protocol step.

use core::fmt::{self, Display, Formatter};

use missive_common::{internal, traits::fsm::FiniteStateMachine};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum State {
    #[default]
    Unconnected,
    /// Greeted with EHLO or HELO over a plain connection.
    Connected,
    /// Encrypted, via STARTTLS or from the first byte.
    SecurityNegotiated,
    Authenticated,
    /// `MAIL FROM` was accepted; recipients and data may follow.
    TransactionOpen,
    Closed,
}

impl State {
    /// States in which a new transaction may begin.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(
            self,
            Self::Connected | Self::SecurityNegotiated | Self::Authenticated
        )
    }

    /// States that need a fresh connection before anything can be sent.
    #[must_use]
    pub const fn needs_connection(self) -> bool {
        matches!(self, Self::Unconnected | Self::Closed)
    }
}

impl Display for State {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Self::Unconnected => "unconnected",
            Self::Connected => "connected",
            Self::SecurityNegotiated => "encrypted",
            Self::Authenticated => "authenticated",
            Self::TransactionOpen => "in a transaction",
            Self::Closed => "closed",
        })
    }
}

/// A completed protocol step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// Greeting read and EHLO/HELO accepted.
    Greeted,
    /// TLS handshake finished and EHLO re-issued.
    TlsEstablished,
    /// AUTH accepted.
    Authenticated,
    /// `MAIL FROM` accepted.
    MailAccepted,
    /// The data phase was acknowledged, or the transaction was reset.
    TransactionEnded,
    Quit,
    /// The connection can no longer be trusted.
    Failed,
}

/// What the state machine remembers between transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionState {
    /// The state a finished or aborted transaction returns to.
    ready: State,
}

impl SessionState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ready: State::Unconnected,
        }
    }

    #[must_use]
    pub const fn ready(&self) -> State {
        self.ready
    }
}

impl FiniteStateMachine for State {
    type Input = Event;
    type Context = SessionState;

    /// Pairs not listed below leave the state unchanged.
    fn transition(self, input: Self::Input, context: &mut Self::Context) -> Self {
        let next = match (self, input) {
            (_, Event::Quit | Event::Failed) => Self::Closed,
            (Self::Unconnected, Event::Greeted) => Self::Connected,
            (Self::Connected, Event::TlsEstablished) => Self::SecurityNegotiated,
            (Self::Connected | Self::SecurityNegotiated, Event::Authenticated) => {
                Self::Authenticated
            }
            (state, Event::MailAccepted) if state.is_ready() => Self::TransactionOpen,
            (Self::TransactionOpen, Event::TransactionEnded) => context.ready,
            (state, event) => {
                internal!(
                    level = DEBUG,
                    "Ignoring {event:?} while {state}"
                );
                return state;
            }
        };

        if next.is_ready() {
            context.ready = next;
        }

        internal!("{self} -> {next} on {input:?}");
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(events: &[Event]) -> (State, SessionState) {
        let mut context = SessionState::new();
        let state = events
            .iter()
            .fold(State::default(), |state, &event| state.transition(event, &mut context));
        (state, context)
    }

    #[test]
    fn test_plain_session() {
        let (state, context) = run(&[Event::Greeted]);
        assert_eq!(state, State::Connected);
        assert_eq!(context.ready(), State::Connected);
    }

    #[test]
    fn test_full_negotiation() {
        let (state, context) = run(&[Event::Greeted, Event::TlsEstablished, Event::Authenticated]);
        assert_eq!(state, State::Authenticated);
        assert_eq!(context.ready(), State::Authenticated);
    }

    #[test]
    fn test_transaction_returns_to_ready_state() {
        let (state, _) = run(&[
            Event::Greeted,
            Event::TlsEstablished,
            Event::MailAccepted,
            Event::TransactionEnded,
        ]);
        assert_eq!(state, State::SecurityNegotiated);

        let (state, _) = run(&[Event::Greeted, Event::MailAccepted]);
        assert_eq!(state, State::TransactionOpen);
    }

    #[test]
    fn test_invalid_events_leave_state_unchanged() {
        let (state, _) = run(&[Event::MailAccepted]);
        assert_eq!(state, State::Unconnected);

        let (state, _) = run(&[Event::Greeted, Event::TransactionEnded]);
        assert_eq!(state, State::Connected);

        let (state, _) = run(&[Event::Greeted, Event::MailAccepted, Event::Authenticated]);
        assert_eq!(state, State::TransactionOpen);

        let (state, _) = run(&[Event::Greeted, Event::Greeted]);
        assert_eq!(state, State::Connected);
    }

    #[test]
    fn test_closed_from_anywhere() {
        for prefix in [
            &[][..],
            &[Event::Greeted][..],
            &[Event::Greeted, Event::MailAccepted][..],
        ] {
            let mut events = prefix.to_vec();
            events.push(Event::Failed);
            assert_eq!(run(&events).0, State::Closed);
        }

        let (state, _) = run(&[Event::Quit, Event::Greeted]);
        assert_eq!(state, State::Closed);
    }

    #[test]
    fn test_readiness() {
        assert!(State::Authenticated.is_ready());
        assert!(!State::TransactionOpen.is_ready());
        assert!(State::Closed.needs_connection());
        assert!(!State::Connected.needs_connection());
    }
}
