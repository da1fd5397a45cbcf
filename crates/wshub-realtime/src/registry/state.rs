//! Registry lifecycle state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// `Ready → Started → ShuttingDown → Stopped`. Never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    /// Constructed, not yet accepting sessions.
    Ready,
    /// Accepting sessions.
    Started,
    /// Closing every session.
    ShuttingDown,
    /// Terminal.
    Stopped,
}

impl ServerState {
    /// Whether sessions are accepted and operations allowed.
    pub fn is_started(self) -> bool {
        self == Self::Started
    }

    /// Whether settings that only apply while idle may change.
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Ready | Self::Stopped)
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Started => write!(f, "started"),
            Self::ShuttingDown => write!(f, "shutting_down"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_states_are_ordered() {
        assert!(ServerState::Ready < ServerState::Started);
        assert!(ServerState::Started < ServerState::ShuttingDown);
        assert!(ServerState::ShuttingDown < ServerState::Stopped);
    }

    #[test]
    fn test_idle_states() {
        assert!(ServerState::Ready.is_idle());
        assert!(ServerState::Stopped.is_idle());
        assert!(!ServerState::Started.is_idle());
        assert!(!ServerState::ShuttingDown.is_idle());
    }
}
