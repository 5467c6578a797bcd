//! Connection State Machine
//!
//! ```text
//! disconnected --connect()--> connecting
//! connecting   --open-------> connected
//! connecting   --failure----> error
//! connected    --normal close-----> disconnected
//! connected    --abnormal close---> reconnecting
//! connected    --pong timeout-----> reconnecting
//! reconnecting --attempt ok-------> connected
//! reconnecting --attempts spent---> disconnected
//! any          --disconnect()-----> disconnected
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Close code for a normal closure.
pub const NORMAL_CLOSE_CODE: u16 = 1000;

/// Connection state owned by a single connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected.
    #[default]
    Disconnected,
    /// Initial connect in progress.
    Connecting,
    /// Transport open.
    Connected,
    /// Waiting on or running a reconnect attempt.
    Reconnecting,
    /// Initial connect failed.
    Error,
}

impl ConnectionState {
    /// Check if a state transition is valid.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Disconnected | Self::Error, Self::Connecting)
                | (Self::Connecting | Self::Reconnecting, Self::Connected)
                | (Self::Connecting, Self::Error)
                | (Self::Connected, Self::Reconnecting)
                | (
                    Self::Connecting | Self::Connected | Self::Reconnecting | Self::Error,
                    Self::Disconnected
                )
        )
    }

    /// Whether outbound messages can be written.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// State after the transport closed while connected.
    #[must_use]
    pub const fn after_close(code: Option<u16>) -> Self {
        match code {
            Some(NORMAL_CLOSE_CODE) => Self::Disconnected,
            _ => Self::Reconnecting,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(ConnectionState::Disconnected, ConnectionState::Connecting, true)]
    #[test_case(ConnectionState::Connecting, ConnectionState::Connected, true)]
    #[test_case(ConnectionState::Connecting, ConnectionState::Error, true)]
    #[test_case(ConnectionState::Connected, ConnectionState::Reconnecting, true)]
    #[test_case(ConnectionState::Reconnecting, ConnectionState::Connected, true)]
    #[test_case(ConnectionState::Reconnecting, ConnectionState::Disconnected, true)]
    #[test_case(ConnectionState::Error, ConnectionState::Connecting, true)]
    #[test_case(ConnectionState::Disconnected, ConnectionState::Connected, false)]
    #[test_case(ConnectionState::Disconnected, ConnectionState::Reconnecting, false)]
    #[test_case(ConnectionState::Connected, ConnectionState::Connecting, false)]
    #[test_case(ConnectionState::Error, ConnectionState::Connected, false)]
    fn transitions(from: ConnectionState, to: ConnectionState, valid: bool) {
        assert_eq!(from.can_transition_to(to), valid);
    }

    #[test]
    fn close_code_decides_next_state() {
        assert_eq!(
            ConnectionState::after_close(Some(NORMAL_CLOSE_CODE)),
            ConnectionState::Disconnected
        );
        assert_eq!(
            ConnectionState::after_close(Some(1006)),
            ConnectionState::Reconnecting
        );
        assert_eq!(ConnectionState::after_close(None), ConnectionState::Reconnecting);
    }

    #[test]
    fn display_is_lowercase() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
    }
}
