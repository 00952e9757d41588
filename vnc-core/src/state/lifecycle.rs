//! Session lifecycle state machine.
//!
//! `SessionState` models the full lifecycle of one session, with
//! validated transitions that return `Result` instead of panicking.
//! Reconnecting always means building a new session; nothing here
//! ever moves backwards.

use crate::error::VncError;

// ── SessionState ─────────────────────────────────────────────────

/// The current lifecycle state of a session.
///
/// ```text
///  Created ──► Connecting ──► Connected
///                  │              │
///                  ▼              ▼
///             Disconnected ◄──────┘
///
///  (any non-Destroyed) ──cleanup()──► Destroyed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// Engine allocated, no connection attempted yet.
    #[default]
    Created,

    /// `connect()` is blocked inside the engine handshake.
    Connecting,

    /// Handshake complete; the reader loop is pumping messages.
    Connected,

    /// The connection attempt failed or the connection ended.
    Disconnected,

    /// The engine has been released. Terminal.
    Destroyed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Destroyed => write!(f, "Destroyed"),
        }
    }
}

impl SessionState {
    /// Returns `true` when the engine may be used for protocol traffic.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` once the engine has been released.
    pub fn is_destroyed(self) -> bool {
        matches!(self, Self::Destroyed)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn allows(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Created, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Created | Connecting | Connected | Disconnected, Destroyed)
        )
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Connecting`.
    ///
    /// Valid from: `Created`. A second `connect()` lands here.
    pub fn begin_connect(&mut self) -> Result<(), VncError> {
        match self {
            Self::Created => {
                *self = Self::Connecting;
                Ok(())
            }
            Self::Destroyed => Err(VncError::Misuse("cannot connect: session destroyed")),
            _ => Err(VncError::Misuse(
                "cannot connect: session already used; create a new one",
            )),
        }
    }

    /// Transition to `Connected`.
    ///
    /// Valid from: `Connecting`.
    pub fn complete_connect(&mut self) -> Result<(), VncError> {
        match self {
            Self::Connecting => {
                *self = Self::Connected;
                Ok(())
            }
            _ => Err(VncError::Misuse(
                "cannot complete connect: not in Connecting state",
            )),
        }
    }

    /// Transition to `Disconnected`.
    ///
    /// Valid from: `Connecting` (handshake failure), `Connected`
    /// (protocol error, peer close, explicit disconnect).
    pub fn disconnect(&mut self) -> Result<(), VncError> {
        match self {
            Self::Connecting | Self::Connected => {
                *self = Self::Disconnected;
                Ok(())
            }
            _ => Err(VncError::Misuse(
                "cannot disconnect: not in Connecting or Connected state",
            )),
        }
    }

    /// Transition to `Destroyed`.
    ///
    /// Returns `false` if the session was already destroyed, which makes
    /// repeated teardown a no-op.
    pub fn destroy(&mut self) -> bool {
        if self.is_destroyed() {
            return false;
        }
        *self = Self::Destroyed;
        true
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SessionState; 5] = [
        SessionState::Created,
        SessionState::Connecting,
        SessionState::Connected,
        SessionState::Disconnected,
        SessionState::Destroyed,
    ];

    #[test]
    fn happy_path_lifecycle() {
        let mut state = SessionState::default();
        assert_eq!(state, SessionState::Created);

        state.begin_connect().unwrap();
        assert_eq!(state, SessionState::Connecting);

        state.complete_connect().unwrap();
        assert!(state.is_connected());

        state.disconnect().unwrap();
        assert_eq!(state, SessionState::Disconnected);

        assert!(state.destroy());
        assert!(state.is_destroyed());
    }

    #[test]
    fn connect_twice_is_misuse() {
        let mut state = SessionState::Connected;
        assert!(matches!(state.begin_connect(), Err(VncError::Misuse(_))));
        assert_eq!(state, SessionState::Connected);
    }

    #[test]
    fn handshake_failure_disconnects() {
        let mut state = SessionState::Connecting;
        state.disconnect().unwrap();
        assert_eq!(state, SessionState::Disconnected);
    }

    #[test]
    fn disconnected_is_terminal_for_connection() {
        let mut state = SessionState::Disconnected;
        assert!(state.begin_connect().is_err());
        assert!(state.complete_connect().is_err());
        assert!(state.disconnect().is_err());
    }

    #[test]
    fn destroy_from_any_state_once() {
        for from in ALL {
            let mut state = from;
            let first = state.destroy();
            assert_eq!(first, from != SessionState::Destroyed);
            assert!(!state.destroy());
            assert!(state.is_destroyed());
        }
    }

    #[test]
    fn destroyed_rejects_everything() {
        let mut state = SessionState::Destroyed;
        assert!(state.begin_connect().is_err());
        assert!(state.complete_connect().is_err());
        assert!(state.disconnect().is_err());
        assert_eq!(state, SessionState::Destroyed);
    }

    #[test]
    fn transitions_agree_with_allows() {
        for from in ALL {
            let mut s = from;
            assert_eq!(s.begin_connect().is_ok(), from.allows(SessionState::Connecting));
            let mut s2 = from;
            assert_eq!(
                s2.complete_connect().is_ok(),
                from.allows(SessionState::Connected)
            );
            let mut s3 = from;
            assert_eq!(
                s3.disconnect().is_ok(),
                from.allows(SessionState::Disconnected)
            );
            let mut s4 = from;
            assert_eq!(s4.destroy(), from.allows(SessionState::Destroyed));
        }
    }

    #[test]
    fn no_backward_transitions() {
        for from in ALL {
            assert!(!from.allows(SessionState::Created));
            assert!(!SessionState::Destroyed.allows(from));
        }
    }

    #[test]
    fn display_format() {
        assert_eq!(SessionState::Created.to_string(), "Created");
        assert_eq!(SessionState::Connecting.to_string(), "Connecting");
        assert_eq!(SessionState::Connected.to_string(), "Connected");
        assert_eq!(SessionState::Disconnected.to_string(), "Disconnected");
        assert_eq!(SessionState::Destroyed.to_string(), "Destroyed");
    }
}
